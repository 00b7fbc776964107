//! Process handle — one spawned script child
//!
//! Spawning splits a child into two halves:
//! - [`ProcessHandle`]: identity and termination, owned by the registry.
//! - [`ExitWaiter`]: the only way to reap the child, owned by the
//!   auto-restart loop of the generation that spawned it.
//!
//! The waiter publishes the exit status on a watch channel so that handle
//! holders can tell a dead child from a live one without reaping it.

use std::ffi::OsString;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::log_sink::LogSink;

/// Command line and environment for one script launch.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Error)]
pub enum TerminateError {
    #[error("process already exited")]
    AlreadyExited,
    #[error("failed to signal process: {0}")]
    Signal(#[from] Errno),
}

/// Registry-side view of a spawned child. Clones observe the same exit.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: u32,
    started_at: Instant,
    exit_rx: watch::Receiver<Option<ExitStatus>>,
}

/// Loop-side half of a spawned child. Consumed by [`ExitWaiter::wait`].
#[derive(Debug)]
pub struct ExitWaiter {
    child: Child,
    exit_tx: watch::Sender<Option<ExitStatus>>,
}

/// Spawn `spec` with stdout and stderr appended to `sink`.
///
/// The log file is opened before the child starts so nothing it prints is
/// lost.
pub fn spawn(spec: &LaunchSpec, sink: &LogSink) -> io::Result<(ProcessHandle, ExitWaiter)> {
    let (stdout, stderr) = sink.stdio_pair()?;

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(std::process::Stdio::null())
        .stdout(stdout)
        .stderr(stderr);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &spec.env {
        cmd.env(key, value);
    }

    let child = cmd.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "child exited before pid was read"))?;

    let (exit_tx, exit_rx) = watch::channel(None);
    Ok((
        ProcessHandle {
            pid,
            started_at: Instant::now(),
            exit_rx,
        },
        ExitWaiter { child, exit_tx },
    ))
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// True once the owning loop has reaped the child (or given up on it).
    pub fn has_exited(&self) -> bool {
        self.exit_rx.borrow().is_some() || self.exit_rx.has_changed().is_err()
    }

    /// Send SIGTERM. A child that is already gone is reported as
    /// [`TerminateError::AlreadyExited`]; callers treat that as success.
    pub fn terminate(&self) -> Result<(), TerminateError> {
        self.signal(Signal::SIGTERM)
    }

    /// Send SIGKILL.
    pub fn kill(&self) -> Result<(), TerminateError> {
        self.signal(Signal::SIGKILL)
    }

    fn signal(&self, signal: Signal) -> Result<(), TerminateError> {
        // A reaped pid may already belong to someone else
        if self.has_exited() {
            return Err(TerminateError::AlreadyExited);
        }
        match kill(Pid::from_raw(self.pid as i32), signal) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(TerminateError::AlreadyExited),
            Err(e) => Err(TerminateError::Signal(e)),
        }
    }

    /// Wait up to `timeout` for the exit to be observed. Returns whether it was.
    pub async fn wait_exited(&self, timeout: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        let observed = tokio::time::timeout(timeout, rx.wait_for(|status| status.is_some()))
            .await
            .is_ok();
        observed || self.has_exited()
    }
}

impl ExitWaiter {
    /// Wait for the child to exit and publish the status to every handle.
    pub async fn wait(mut self) -> io::Result<ExitStatus> {
        let status = self.child.wait().await?;
        self.exit_tx.send_replace(Some(status));
        Ok(status)
    }
}

/// Short human form of an exit status for logs.
pub fn describe_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(sig)) => format!("signal {sig}"),
        (None, None) => "unknown status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> LaunchSpec {
        LaunchSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".into(), script.into()],
            working_dir: None,
            env: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_spawn_writes_both_streams_to_sink() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "both.sh");
        let (handle, waiter) = spawn(&sh("echo out; echo err >&2"), &sink).unwrap();
        assert!(handle.pid() > 0);

        let status = waiter.wait().await.unwrap();
        assert!(status.success());
        assert!(handle.has_exited());

        let text = sink.tail(6000).await.unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
    }

    #[tokio::test]
    async fn test_env_is_passed_to_child() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "env.sh");
        let mut spec = sh("echo mode=$PANEL_MODE");
        spec.env.push(("PANEL_MODE".into(), "test".into()));
        let (_handle, waiter) = spawn(&spec, &sink).unwrap();
        waiter.wait().await.unwrap();
        assert!(sink.tail(6000).await.unwrap().contains("mode=test"));
    }

    #[tokio::test]
    async fn test_terminate_live_then_dead() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "sleep.sh");
        let (handle, waiter) = spawn(&sh("exec sleep 30"), &sink).unwrap();
        assert!(!handle.has_exited());

        handle.terminate().unwrap();
        let status = waiter.wait().await.unwrap();
        assert_eq!(describe_exit(&status), "signal 15");

        assert!(handle.wait_exited(Duration::from_millis(10)).await);
        assert!(matches!(
            handle.terminate(),
            Err(TerminateError::AlreadyExited)
        ));
    }

    #[tokio::test]
    async fn test_wait_exited_times_out_for_live_child() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "slow.sh");
        let (handle, waiter) = spawn(&sh("exec sleep 30"), &sink).unwrap();
        let reaper = tokio::spawn(waiter.wait());

        assert!(!handle.wait_exited(Duration::from_millis(50)).await);
        handle.kill().unwrap();
        assert!(handle.wait_exited(Duration::from_secs(5)).await);
        let status = reaper.await.unwrap().unwrap();
        assert_eq!(describe_exit(&status), "signal 9");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::new(dir.path(), "missing.py");
        let spec = LaunchSpec {
            program: "/nonexistent/interpreter".into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        };
        assert!(spawn(&spec, &sink).is_err());
    }
}
