//! Best-effort CPU / memory probe for a supervised child

use std::time::Duration;

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use thiserror::Error;

/// Resource usage as reported to callers. Zeroed when nothing can be measured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ProcessStats {
    /// Percent of one core over the sampling interval.
    pub cpu: f64,
    /// Resident set size in MB, one decimal place.
    pub ram: f64,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("process {0} not found")]
    NoSuchProcess(u32),
    #[error("probe task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Sample `pid` twice, `interval` apart, on the blocking pool.
pub async fn probe(pid: u32, interval: Duration) -> Result<ProcessStats, ProbeError> {
    tokio::task::spawn_blocking(move || probe_blocking(pid, interval)).await?
}

fn probe_blocking(pid: u32, interval: Duration) -> Result<ProcessStats, ProbeError> {
    let target = Pid::from_u32(pid);
    let kind = ProcessRefreshKind::new().with_cpu().with_memory();
    let mut system = System::new();

    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, kind);
    if system.process(target).is_none() {
        return Err(ProbeError::NoSuchProcess(pid));
    }

    // cpu_usage is computed from the delta between two refreshes
    std::thread::sleep(interval);
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, kind);

    let process = system
        .process(target)
        .ok_or(ProbeError::NoSuchProcess(pid))?;
    Ok(ProcessStats {
        cpu: round1(f64::from(process.cpu_usage())),
        ram: bytes_to_mb(process.memory()),
    })
}

fn bytes_to_mb(bytes: u64) -> f64 {
    round1(bytes as f64 / 1024.0 / 1024.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_to_mb_rounds_to_one_decimal() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(15_938_355), 15.2);
        assert_eq!(bytes_to_mb(1024 * 1024 * 3 / 2), 1.5);
    }

    #[test]
    fn test_zeroed_stats_serialize_as_cpu_and_ram() {
        let json = serde_json::to_value(ProcessStats::default()).unwrap();
        assert_eq!(json, serde_json::json!({ "cpu": 0.0, "ram": 0.0 }));
    }

    #[tokio::test]
    async fn test_probe_self_reports_memory() {
        let stats = probe(std::process::id(), Duration::from_millis(50))
            .await
            .unwrap();
        assert!(stats.ram > 0.0);
        assert!(stats.cpu >= 0.0);
    }

    #[tokio::test]
    async fn test_probe_unknown_pid_fails() {
        // Above PID_MAX_LIMIT on Linux
        let result = probe(4_194_400, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(ProbeError::NoSuchProcess(4_194_400))));
    }
}
