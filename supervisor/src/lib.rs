//! Script supervisor — keeps a named set of scripts running as child
//! processes, relaunching them when they exit until told to stop.
//!
//! [`Supervisor`] is the entry point for callers such as an HTTP panel:
//! start, stop, restart, delete, log tail, and stats by script name.

pub mod config;
pub mod error;
pub mod log_sink;
pub mod process;
pub mod registry;
mod respawn;
pub mod stats;
mod supervisor;

pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use registry::{DesiredState, EntrySnapshot};
pub use stats::ProcessStats;
pub use supervisor::{ScriptStatus, Supervisor};
