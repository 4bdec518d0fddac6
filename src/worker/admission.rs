use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AdmissionConfig;
use crate::error::{MillError, Result};

/// Cumulative CPU counters at one point in time.
#[derive(Debug, Clone, Copy)]
pub struct CpuStat {
    pub total: u64,
    pub idle: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct MemStat {
    pub total_kib: u64,
    pub available_kib: u64,
}

impl MemStat {
    pub fn usage(&self) -> f64 {
        1.0 - self.available_kib as f64 / self.total_kib as f64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiskStat {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskStat {
    pub fn usage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        1.0 - self.available_bytes as f64 / self.total_bytes as f64
    }
}

/// Host resource probes consulted by the admission gate.
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn cpu(&self) -> Result<CpuStat>;
    async fn memory(&self) -> Result<MemStat>;
    async fn disk(&self, path: &Path) -> Result<DiskStat>;
}

/// Reads CPU and memory counters from procfs and disk headroom via sysinfo.
#[derive(Debug, Clone)]
pub struct LinuxResourceReader {
    cpu_stat_path: PathBuf,
    meminfo_path: PathBuf,
}

impl Default for LinuxResourceReader {
    fn default() -> Self {
        Self {
            cpu_stat_path: PathBuf::from("/proc/stat"),
            meminfo_path: PathBuf::from("/proc/meminfo"),
        }
    }
}

impl LinuxResourceReader {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn with_paths(cpu_stat_path: PathBuf, meminfo_path: PathBuf) -> Self {
        Self {
            cpu_stat_path,
            meminfo_path,
        }
    }
}

fn parse_or_zero(field: &str) -> u64 {
    field.parse().unwrap_or(0)
}

#[async_trait]
impl ResourceReader for LinuxResourceReader {
    async fn cpu(&self) -> Result<CpuStat> {
        let stat = tokio::fs::read_to_string(&self.cpu_stat_path).await?;
        let first = stat
            .lines()
            .next()
            .ok_or_else(|| MillError::ResourceProbe("cpu stat file is empty".to_string()))?;

        // cpu user nice system idle iowait irq softirq steal guest guest_nice
        let ticks: Vec<u64> = first
            .split_whitespace()
            .skip(1)
            .map(parse_or_zero)
            .collect();
        if ticks.len() < 4 {
            return Err(MillError::ResourceProbe(format!(
                "unexpected cpu stat line: {first}"
            )));
        }
        Ok(CpuStat {
            total: ticks.iter().sum(),
            idle: ticks[3],
        })
    }

    async fn memory(&self) -> Result<MemStat> {
        let meminfo = tokio::fs::read_to_string(&self.meminfo_path).await?;
        let mut total_kib = None;
        let mut available_kib = None;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kib = rest.split_whitespace().next().map(parse_or_zero);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kib = rest.split_whitespace().next().map(parse_or_zero);
            }
        }
        match (total_kib, available_kib) {
            (Some(total_kib), Some(available_kib)) if total_kib > 0 => Ok(MemStat {
                total_kib,
                available_kib,
            }),
            _ => Err(MillError::ResourceProbe(
                "meminfo is missing MemTotal/MemAvailable".to_string(),
            )),
        }
    }

    async fn disk(&self, path: &Path) -> Result<DiskStat> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        // Longest mount point that is a prefix of the jobs directory.
        let best = disks
            .list()
            .iter()
            .filter(|d| path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                MillError::ResourceProbe(format!("no mount point covers {}", path.display()))
            })?;
        Ok(DiskStat {
            total_bytes: best.total_space(),
            available_bytes: best.available_space(),
        })
    }
}

/// Count of jobs currently executing on this host, shared between workers
/// and the admission gate. The guard decrements on drop so the count never
/// leaks on a failure path.
#[derive(Debug, Clone, Default)]
pub struct RunningGauge(Arc<AtomicUsize>);

impl RunningGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn enter(&self) -> RunningGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        RunningGuard(self.0.clone())
    }
}

pub struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Boolean capacity gate evaluated once per consumed message, before a
/// claim is attempted. A denial is a throttle signal, not an error: the
/// message stays uncommitted and is retried on a later poll.
pub struct AdmissionController {
    reader: Arc<dyn ResourceReader>,
    gauge: RunningGauge,
    jobs_dir: PathBuf,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(
        reader: Arc<dyn ResourceReader>,
        gauge: RunningGauge,
        jobs_dir: PathBuf,
        config: AdmissionConfig,
    ) -> Self {
        Self {
            reader,
            gauge,
            jobs_dir,
            config,
        }
    }

    pub async fn can_run_new_job(&self, token: &CancellationToken) -> Result<bool> {
        let running = self.gauge.count();
        if running >= self.config.max_running_jobs {
            tracing::info!(running, "running job count at limit, deferring new work");
            return Ok(false);
        }

        let cpu = self.cpu_load(token).await?;
        if cpu > self.config.cpu_threshold {
            tracing::info!(cpu, "cpu load over threshold, deferring new work");
            return Ok(false);
        }

        let memory = self.reader.memory().await?;
        if memory.usage() > self.config.memory_threshold {
            tracing::info!(usage = memory.usage(), "memory over threshold, deferring new work");
            return Ok(false);
        }

        let disk = self.reader.disk(&self.jobs_dir).await?;
        if disk.usage() > self.config.disk_threshold {
            tracing::info!(usage = disk.usage(), "disk over threshold, deferring new work");
            return Ok(false);
        }

        Ok(true)
    }

    /// Busy fraction over one sample interval; two counter snapshots.
    async fn cpu_load(&self, token: &CancellationToken) -> Result<f64> {
        let first = self.reader.cpu().await?;
        tokio::select! {
            _ = token.cancelled() => return Ok(0.0),
            _ = tokio::time::sleep(self.config.cpu_sample_interval) => {}
        }
        let second = self.reader.cpu().await?;

        let diff_total = second.total.saturating_sub(first.total);
        if diff_total == 0 {
            return Ok(0.0);
        }
        let diff_idle = second.idle.saturating_sub(first.idle);
        Ok(1.0 - diff_idle as f64 / diff_total as f64)
    }
}
