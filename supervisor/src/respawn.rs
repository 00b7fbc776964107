//! Auto-restart loop — keeps one supervision lineage alive
//!
//! One task per `(name, generation)`. It owns the exit waiter of the child it
//! launched, so it is the only place that reaps that child. After each exit it
//! asks the registry whether its generation is still the wanted one; if not,
//! it ends without touching the entry.

use std::io;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::process::{self, describe_exit, ExitWaiter};
use crate::supervisor::Shared;

enum LoopState {
    Launched(ExitWaiter),
    Exited,
    Relaunching,
    Obsolete,
}

enum Relaunch {
    Launched(ExitWaiter),
    Failed(io::Error),
    Obsolete,
}

pub(crate) fn spawn_loop(
    shared: Arc<Shared>,
    name: String,
    generation: u64,
    waiter: ExitWaiter,
) {
    tokio::spawn(run(shared, name, generation, waiter));
}

async fn run(shared: Arc<Shared>, name: String, generation: u64, waiter: ExitWaiter) {
    let backoff = shared.config.supervision.relaunch_backoff();
    let mut state = LoopState::Launched(waiter);

    loop {
        state = match state {
            LoopState::Launched(waiter) => {
                match waiter.wait().await {
                    Ok(status) => info!(
                        script = %name,
                        generation,
                        status = %describe_exit(&status),
                        "Script exited"
                    ),
                    Err(e) => warn!(script = %name, generation, "Failed to wait for script: {e}"),
                }
                LoopState::Exited
            }
            LoopState::Exited => {
                let current = shared
                    .registry
                    .update(&name, |entry| entry.is_current(generation))
                    .await
                    .unwrap_or(false);
                if current {
                    LoopState::Relaunching
                } else {
                    LoopState::Obsolete
                }
            }
            LoopState::Relaunching => {
                tokio::time::sleep(backoff).await;
                match relaunch(&shared, &name, generation).await {
                    Relaunch::Launched(waiter) => LoopState::Launched(waiter),
                    Relaunch::Obsolete => LoopState::Obsolete,
                    Relaunch::Failed(e) => {
                        warn!(script = %name, generation, "Relaunch failed: {e}");
                        if let Err(log_err) = shared
                            .log_sink(&name)
                            .append_error(&format!("relaunch failed: {e}"))
                        {
                            warn!(script = %name, "Failed to write log: {log_err}");
                        }
                        LoopState::Exited
                    }
                }
            }
            LoopState::Obsolete => {
                debug!(script = %name, generation, "Supervision loop finished");
                break;
            }
        };
    }
}

/// Re-check ownership and spawn under the registry lock, so a concurrent
/// stop or start can never interleave between the check and the store.
async fn relaunch(shared: &Shared, name: &str, generation: u64) -> Relaunch {
    let spec = shared.launch_spec(name);
    let sink = shared.log_sink(name);

    shared
        .registry
        .update(name, |entry| {
            if !entry.is_current(generation) {
                return Relaunch::Obsolete;
            }
            match process::spawn(&spec, &sink) {
                Ok((handle, waiter)) => {
                    entry.restarts += 1;
                    info!(
                        script = %name,
                        generation,
                        pid = handle.pid(),
                        restarts = entry.restarts,
                        "Script relaunched"
                    );
                    entry.handle = Some(handle);
                    Relaunch::Launched(waiter)
                }
                Err(e) => Relaunch::Failed(e),
            }
        })
        .await
        .unwrap_or(Relaunch::Obsolete)
}
