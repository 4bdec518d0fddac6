use std::path::PathBuf;
use std::time::Duration;

/// Logical topic name for job work items.
pub const JOBS_TOPIC: &str = "jobs";

/// Broker-facing identity and provisioning settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Consumer group shared by all worker instances.
    pub group_id: String,
    /// Partition count used when the work topic is first provisioned.
    pub partitions: usize,
    /// Replication factor used when the work topic is first provisioned.
    pub replication_factor: u16,
    /// Principal granted write access to the work topic.
    pub submitter_principal: String,
    /// Principal granted read access to the work topic and the group.
    pub worker_principal: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            group_id: "jobmill-workers".to_string(),
            partitions: 8,
            replication_factor: 1,
            submitter_principal: "svc_jobs_gateway".to_string(),
            worker_principal: "svc_jobs_worker".to_string(),
        }
    }
}

/// Thresholds for the resource admission gate.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum jobs in flight on this host before new work is deferred.
    pub max_running_jobs: usize,
    /// Maximum allowed fraction of busy CPU time.
    pub cpu_threshold: f64,
    /// Maximum allowed fraction of used memory.
    pub memory_threshold: f64,
    /// Maximum allowed fraction of used disk under the jobs directory.
    pub disk_threshold: f64,
    /// Gap between the two CPU counter samples used to derive load.
    pub cpu_sample_interval: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_running_jobs: 16,
            cpu_threshold: 0.8,
            memory_threshold: 0.8,
            disk_threshold: 0.8,
            cpu_sample_interval: Duration::from_millis(250),
        }
    }
}

/// Where per-job execution directories are allocated.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    pub jobs_dir: PathBuf,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            jobs_dir: std::env::temp_dir().join("jobmill-jobs"),
        }
    }
}

/// Process execution limits.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Captured output beyond this many bytes is truncated.
    pub result_cap_bytes: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            result_cap_bytes: 50 * 1024 * 1024,
        }
    }
}

/// Worker consume-loop pacing.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between consume iterations.
    pub iteration_delay: Duration,
    /// How long a single poll waits for a message before giving up.
    pub poll_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            iteration_delay: Duration::from_millis(500),
            poll_timeout: Duration::from_secs(1),
        }
    }
}

/// Lost-job recovery settings.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub enabled: bool,
    /// Interval between store scans.
    pub scan_interval: Duration,
    /// Grace added on top of each job's own timeout before it counts as lost.
    pub lost_grace: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_interval: Duration::from_secs(5),
            lost_grace: Duration::from_secs(60),
        }
    }
}

/// Submission validation limits.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_script_bytes: usize,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_script_bytes: 64 * 1024,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60 * 60),
        }
    }
}
