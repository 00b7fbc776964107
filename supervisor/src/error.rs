//! Error types surfaced by the supervisor to its callers

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Failures a caller of the lifecycle operations can observe.
///
/// Expected races against process teardown (signalling a process that is
/// already gone, sampling a dead pid) never show up here; they are absorbed
/// where they happen.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("script {name} is already running")]
    AlreadyRunning { name: String },

    #[error("script {name} not found")]
    NotFound { name: String },

    #[error("invalid script name: {name:?}")]
    InvalidName { name: String },

    #[error("failed to spawn script {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn not_found(name: &str) -> Self {
        Self::NotFound {
            name: name.to_string(),
        }
    }

    pub fn already_running(name: &str) -> Self {
        Self::AlreadyRunning {
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SupervisorError::already_running("a.py").to_string(),
            "script a.py is already running"
        );
        assert_eq!(
            SupervisorError::not_found("b.py").to_string(),
            "script b.py not found"
        );
    }

    #[test]
    fn test_spawn_error_keeps_source() {
        use std::error::Error as _;
        let err = SupervisorError::Spawn {
            name: "a.py".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no python3"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("no python3"));
    }
}
