//! Shared harness for pipeline integration tests: an embedded node with
//! fast timings plus eventually-style assertion helpers.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jobmill::broker::{provision, MemoryBroker};
use jobmill::config::{
    AdmissionConfig, BrokerConfig, EnvironmentConfig, GatewayConfig, RunnerConfig, WatchdogConfig,
    WorkerConfig, JOBS_TOPIC,
};
use jobmill::error::Result;
use jobmill::gateway::SubmissionGateway;
use jobmill::store::{JobStore, MemoryJobStore};
use jobmill::worker::{
    AdmissionController, ConsumerWorker, CpuStat, DirJobEnvironment, DiskStat, JobEnvironment,
    MemStat, ProcessRunner, ResourceReader, RunningGauge,
};

/// Worker pacing tuned for tests.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        iteration_delay: Duration::from_millis(20),
        poll_timeout: Duration::from_millis(100),
    }
}

/// Admission config that skips the CPU sampling delay.
pub fn fast_admission_config() -> AdmissionConfig {
    AdmissionConfig {
        cpu_sample_interval: Duration::ZERO,
        ..AdmissionConfig::default()
    }
}

/// Gateway config permitting sub-second job timeouts.
pub fn fast_gateway_config() -> GatewayConfig {
    GatewayConfig {
        min_timeout: Duration::from_millis(1),
        ..GatewayConfig::default()
    }
}

/// Resource reader reporting a lightly loaded host; CPU counters advance
/// on every sample so the two-sample load computation stays meaningful.
pub struct SteadyReader {
    ticks: AtomicU64,
}

impl SteadyReader {
    pub fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl ResourceReader for SteadyReader {
    async fn cpu(&self) -> Result<CpuStat> {
        let step = self.ticks.fetch_add(1, Ordering::SeqCst);
        Ok(CpuStat {
            total: 1000 + step * 100,
            idle: 900 + step * 90,
        })
    }

    async fn memory(&self) -> Result<MemStat> {
        Ok(MemStat {
            total_kib: 1000,
            available_kib: 800,
        })
    }

    async fn disk(&self, _path: &Path) -> Result<DiskStat> {
        Ok(DiskStat {
            total_bytes: 1000,
            available_bytes: 700,
        })
    }
}

/// Embedded pipeline: broker, store, N workers, and a gateway, all wired
/// the way the binary wires them but with test timings.
pub struct Pipeline {
    pub broker: MemoryBroker,
    pub broker_config: BrokerConfig,
    pub store: Arc<dyn JobStore>,
    pub gauge: RunningGauge,
    pub gateway: SubmissionGateway,
    pub token: CancellationToken,
    jobs_root: tempfile::TempDir,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    pub async fn start(workers: usize) -> Self {
        let broker = MemoryBroker::new();
        let broker_config = BrokerConfig::default();
        provision(&broker, &broker_config)
            .await
            .expect("provisioning failed");

        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let gauge = RunningGauge::new();
        let token = CancellationToken::new();
        let jobs_root = tempfile::tempdir().expect("tempdir");
        let environment_config = EnvironmentConfig {
            jobs_dir: jobs_root.path().to_path_buf(),
        };

        let mut handles = Vec::new();
        for _ in 0..workers {
            let consumer = Arc::new(
                broker
                    .subscribe(
                        JOBS_TOPIC,
                        &broker_config.group_id,
                        &broker_config.worker_principal,
                    )
                    .expect("subscribe failed"),
            );
            let admission = Arc::new(AdmissionController::new(
                Arc::new(SteadyReader::new()),
                gauge.clone(),
                environment_config.jobs_dir.clone(),
                fast_admission_config(),
            ));
            let environment: Arc<dyn JobEnvironment> =
                Arc::new(DirJobEnvironment::new(environment_config.clone()));
            let worker = ConsumerWorker::new(
                consumer,
                store.clone(),
                admission,
                environment,
                Arc::new(ProcessRunner::new(RunnerConfig::default())),
                gauge.clone(),
                fast_worker_config(),
            );
            let worker_token = token.clone();
            handles.push(tokio::spawn(async move { worker.run(worker_token).await }));
        }

        let producer = Arc::new(broker.producer(JOBS_TOPIC, &broker_config.submitter_principal));
        let gateway = SubmissionGateway::new(
            store.clone(),
            producer,
            broker_config.submitter_principal.clone(),
            fast_gateway_config(),
        );

        Self {
            broker,
            broker_config,
            store,
            gauge,
            gateway,
            token,
            jobs_root,
            handles,
        }
    }

    pub fn spawn_watchdog(&mut self, config: WatchdogConfig) {
        let watchdog = jobmill::watchdog::LostJobWatchdog::new(self.store.clone(), config);
        let token = self.token.clone();
        self.handles
            .push(tokio::spawn(async move { watchdog.run(token).await }));
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

/// Wait for a condition to become true with timeout.
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_duration: Duration,
    poll_interval: Duration,
) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true.
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(25)).await;
    assert!(result, "condition not met within timeout: {message}");
}
