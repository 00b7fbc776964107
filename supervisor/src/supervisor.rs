//! Lifecycle controller — start, stop, restart, delete and queries by name
//!
//! Every state change happens inside one registry critical section; the
//! slow parts (waiting for a child to die, cooldown sleeps, stats sampling)
//! run after the lock is released.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::log_sink::LogSink;
use crate::process::{self, LaunchSpec, ProcessHandle, TerminateError};
use crate::registry::{DesiredState, EntrySnapshot, Registry};
use crate::respawn;
use crate::stats::{self, ProcessStats};

/// State shared between the controller and every auto-restart loop.
pub(crate) struct Shared {
    pub(crate) registry: Registry,
    pub(crate) config: SupervisorConfig,
}

impl Shared {
    fn script_path(&self, name: &str) -> PathBuf {
        self.config.paths.scripts_dir.join(name)
    }

    pub(crate) fn log_sink(&self, name: &str) -> LogSink {
        LogSink::new(&self.config.paths.logs_dir, name)
    }

    pub(crate) fn launch_spec(&self, name: &str) -> LaunchSpec {
        let launcher = &self.config.launcher;
        let mut args: Vec<OsString> = launcher
            .interpreter_args
            .iter()
            .map(OsString::from)
            .collect();
        args.push(self.script_path(name).into_os_string());

        let mut env: Vec<(String, String)> = launcher
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.sort();

        LaunchSpec {
            program: launcher.interpreter.clone(),
            args,
            working_dir: Some(self.config.paths.scripts_dir.clone()),
            env,
        }
    }
}

/// One tracked script as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptStatus {
    pub name: String,
    #[serde(flatten)]
    pub state: EntrySnapshot,
}

/// Handle to the supervision core. Cheap to clone; all clones share one
/// registry.
#[derive(Clone)]
pub struct Supervisor {
    shared: Arc<Shared>,
}

impl Supervisor {
    pub fn new(mut config: SupervisorConfig) -> Self {
        // Children run with the scripts dir as cwd, so paths handed to them
        // must not be relative to ours
        config.paths.scripts_dir = absolutize(&config.paths.scripts_dir);
        config.paths.logs_dir = absolutize(&config.paths.logs_dir);

        info!(
            scripts_dir = %config.paths.scripts_dir.display(),
            logs_dir = %config.paths.logs_dir.display(),
            interpreter = %config.launcher.interpreter,
            "Supervisor initialised"
        );

        Self {
            shared: Arc::new(Shared {
                registry: Registry::new(),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.shared.config
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Launch `name` and attach an auto-restart loop to it.
    pub async fn start(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if !self.shared.script_path(name).is_file() {
            return Err(SupervisorError::not_found(name));
        }

        let spec = self.shared.launch_spec(name);
        let sink = self.shared.log_sink(name);

        let (generation, pid, waiter) = self
            .shared
            .registry
            .upsert(name, |entry, generations| {
                // A child still dying from an earlier stop counts as running
                if entry.is_occupied() {
                    return Err(SupervisorError::already_running(name));
                }
                entry.stopping = None;
                let generation = generations.next();
                entry.generation = generation;
                entry.restarts = 0;
                match process::spawn(&spec, &sink) {
                    Ok((handle, waiter)) => {
                        let pid = handle.pid();
                        entry.handle = Some(handle);
                        entry.desired = DesiredState::Running;
                        Ok((generation, pid, waiter))
                    }
                    Err(source) => {
                        entry.desired = DesiredState::Stopped;
                        Err(SupervisorError::Spawn {
                            name: name.to_string(),
                            source,
                        })
                    }
                }
            })
            .await?;

        info!(script = %name, pid, generation, "Script started");
        respawn::spawn_loop(Arc::clone(&self.shared), name.to_string(), generation, waiter);
        Ok(())
    }

    /// Stop `name`. Succeeds whether or not it was running.
    pub async fn stop(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if let Some(handle) = self.detach(name).await {
            self.send_terminate(name, &handle);
            self.ensure_exited(name, handle).await;
            info!(script = %name, "Script stopped");
        }
        Ok(())
    }

    /// Stop, wait one cooldown, start again.
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.stop(name).await?;
        tokio::time::sleep(self.shared.config.supervision.restart_cooldown()).await;
        match self.start(name).await {
            Err(SupervisorError::AlreadyRunning { .. }) => {
                debug!(script = %name, "Already relaunched by a concurrent caller");
                Ok(())
            }
            other => other,
        }
    }

    /// Restart every script that is running right now. Returns the names
    /// that came back up.
    ///
    /// The snapshot is taken once: a script stopped by someone else during
    /// the cooldown is still started again.
    pub async fn restart_all(&self) -> Vec<String> {
        let names = self.shared.registry.list_running().await;
        info!(count = names.len(), "Restarting all running scripts");

        let mut stopping = Vec::with_capacity(names.len());
        for name in &names {
            if let Some(handle) = self.detach(name).await {
                self.send_terminate(name, &handle);
                stopping.push((name, handle));
            }
        }
        for (name, handle) in stopping {
            self.ensure_exited(name, handle).await;
        }

        tokio::time::sleep(self.shared.config.supervision.restart_cooldown()).await;

        let mut restarted = Vec::with_capacity(names.len());
        for name in names {
            match self.start(&name).await {
                Ok(()) => restarted.push(name),
                Err(e) => warn!(script = %name, "Failed to restart: {e}"),
            }
        }
        restarted
    }

    /// Stop `name`, forget it, and remove its script file.
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.stop(name).await?;

        if let Some(entry) = self.shared.registry.remove(name).await {
            // Started by someone else between the stop and the purge
            if let Some(handle) = entry.handle {
                self.send_terminate(name, &handle);
                self.ensure_exited(name, handle).await;
            }
        }

        match tokio::fs::remove_file(self.shared.script_path(name)).await {
            Ok(()) => {
                info!(script = %name, "Script deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SupervisorError::not_found(name))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Stop everything still tracked. Used on daemon shutdown.
    pub async fn shutdown(&self) {
        let names = self.shared.registry.names().await;
        info!(count = names.len(), "Stopping all scripts...");

        let mut stopping = Vec::new();
        for name in &names {
            if let Some(handle) = self.detach(name).await {
                self.send_terminate(name, &handle);
                stopping.push((name, handle));
            }
        }
        for (name, handle) in stopping {
            self.ensure_exited(name, handle).await;
        }
        info!("All scripts stopped");
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Tail of the script's log, empty if it never wrote one.
    pub async fn log_text(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        let tail = self
            .shared
            .log_sink(name)
            .tail(self.shared.config.supervision.log_tail_bytes)
            .await?;
        Ok(tail)
    }

    /// CPU and memory of the running child. Zeroes on any failure.
    pub async fn stats(&self, name: &str) -> ProcessStats {
        if validate_name(name).is_err() {
            return ProcessStats::default();
        }
        let pid = match self.shared.registry.get(name).await {
            Some(EntrySnapshot {
                pid: Some(pid),
                alive: true,
                ..
            }) => pid,
            _ => return ProcessStats::default(),
        };

        match stats::probe(pid, self.shared.config.supervision.stats_sample()).await {
            Ok(stats) => stats,
            Err(e) => {
                debug!(script = %name, pid, "Stats probe failed: {e}");
                ProcessStats::default()
            }
        }
    }

    /// Script files present in the scripts directory, sorted.
    pub fn list_scripts(&self) -> Result<Vec<String>> {
        let dir = &self.shared.config.paths.scripts_dir;
        let entries = match std::fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let extension = self.shared.config.launcher.script_extension.as_str();
        let mut names: Vec<String> = entries
            .flatten()
            .filter(|entry| entry.path().is_file())
            .filter(|entry| {
                extension.is_empty()
                    || entry.path().extension().and_then(|e| e.to_str()) == Some(extension)
            })
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    pub async fn list_running(&self) -> Vec<String> {
        self.shared.registry.list_running().await
    }

    pub async fn status(&self, name: &str) -> Option<ScriptStatus> {
        self.shared
            .registry
            .get(name)
            .await
            .map(|state| ScriptStatus {
                name: name.to_string(),
                state,
            })
    }

    pub async fn status_all(&self) -> Vec<ScriptStatus> {
        self.shared
            .registry
            .snapshot_all()
            .await
            .into_iter()
            .map(|(name, state)| ScriptStatus { name, state })
            .collect()
    }

    // ------------------------------------------------------------------
    // Termination helpers
    // ------------------------------------------------------------------

    /// Mark `name` stopped and park its handle in `stopping` until the child
    /// is gone. Returns the child still to be terminated, if any, including
    /// one a concurrent stop is already waiting on.
    async fn detach(&self, name: &str) -> Option<ProcessHandle> {
        self.shared
            .registry
            .update(name, |entry| {
                entry.desired = DesiredState::Stopped;
                if let Some(handle) = entry.handle.take() {
                    entry.stopping = Some(handle);
                }
                entry.stopping.clone().filter(|h| !h.has_exited())
            })
            .await
            .flatten()
    }

    fn send_terminate(&self, name: &str, handle: &ProcessHandle) {
        match handle.terminate() {
            Ok(()) => debug!(script = %name, pid = handle.pid(), "Sent SIGTERM"),
            Err(TerminateError::AlreadyExited) => {
                debug!(script = %name, pid = handle.pid(), "Script already exited")
            }
            Err(e) => warn!(script = %name, pid = handle.pid(), "Failed to terminate: {e}"),
        }
    }

    /// Give the child the grace period, then SIGKILL. The pid stays ours
    /// until the loop reaps it, so the kill cannot hit a stranger.
    ///
    /// The stopping slot is released only once the exit has been observed,
    /// so `start` cannot spawn a second child while this one lingers.
    async fn ensure_exited(&self, name: &str, handle: ProcessHandle) {
        let grace = self.shared.config.supervision.stop_grace();
        if !handle.wait_exited(grace).await {
            warn!(
                script = %name,
                pid = handle.pid(),
                "Script ignored SIGTERM for {grace:?}, sending SIGKILL"
            );
            match handle.kill() {
                Ok(()) | Err(TerminateError::AlreadyExited) => {}
                Err(e) => warn!(script = %name, pid = handle.pid(), "Failed to kill: {e}"),
            }
            if !handle.wait_exited(grace).await {
                warn!(script = %name, pid = handle.pid(), "Script not reaped after SIGKILL");
            }
        }

        self.shared
            .registry
            .update(name, |entry| {
                if entry.stopping.as_ref().is_some_and(ProcessHandle::has_exited) {
                    entry.stopping = None;
                }
            })
            .await;
    }
}

/// Names are plain file names inside the scripts directory.
fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(SupervisorError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
