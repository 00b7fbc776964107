//! Supervisor configuration loading and parsing

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "supervisor.toml";
const CONFIG_ENV: &str = "SCRIPT_SUPERVISOR_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SupervisorConfig {
    #[serde(default)]
    pub system: SystemConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub launcher: LauncherConfig,
    #[serde(default)]
    pub supervision: SupervisionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            logs_dir: default_logs_dir(),
        }
    }
}

/// How a script file is turned into a command line.
#[derive(Debug, Clone, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default)]
    pub interpreter_args: Vec<String>,
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    #[serde(default = "default_env")]
    pub env: HashMap<String, String>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            interpreter_args: Vec::new(),
            script_extension: default_script_extension(),
            env: default_env(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisionConfig {
    #[serde(default = "default_restart_cooldown")]
    pub restart_cooldown_ms: u64,
    #[serde(default = "default_relaunch_backoff")]
    pub relaunch_backoff_ms: u64,
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    #[serde(default = "default_stats_sample")]
    pub stats_sample_ms: u64,
    #[serde(default = "default_log_tail")]
    pub log_tail_bytes: u64,
    #[serde(default)]
    pub autostart: Vec<String>,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            restart_cooldown_ms: default_restart_cooldown(),
            relaunch_backoff_ms: default_relaunch_backoff(),
            stop_grace_ms: default_stop_grace(),
            stats_sample_ms: default_stats_sample(),
            log_tail_bytes: default_log_tail(),
            autostart: Vec::new(),
        }
    }
}

impl SupervisionConfig {
    pub fn restart_cooldown(&self) -> Duration {
        Duration::from_millis(self.restart_cooldown_ms)
    }

    pub fn relaunch_backoff(&self) -> Duration {
        Duration::from_millis(self.relaunch_backoff_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn stats_sample(&self) -> Duration {
        Duration::from_millis(self.stats_sample_ms)
    }
}

// Default value functions
fn default_log_level() -> String { "info".into() }
fn default_scripts_dir() -> PathBuf { "scripts".into() }
fn default_logs_dir() -> PathBuf { "logs".into() }
fn default_interpreter() -> String { "python3".into() }
fn default_script_extension() -> String { "py".into() }
fn default_env() -> HashMap<String, String> {
    HashMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())])
}
fn default_restart_cooldown() -> u64 { 1000 }
fn default_relaunch_backoff() -> u64 { 2000 }
fn default_stop_grace() -> u64 { 5000 }
fn default_stats_sample() -> u64 { 100 }
fn default_log_tail() -> u64 { 6000 }

/// Load configuration from `$SCRIPT_SUPERVISOR_CONFIG` or `./supervisor.toml`
pub fn load_config() -> Result<SupervisorConfig> {
    let config_path =
        std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    load_config_from(Path::new(&config_path))
}

pub fn load_config_from(path: &Path) -> Result<SupervisorConfig> {
    if path.exists() {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: SupervisorConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    } else {
        tracing::warn!("Config file not found at {}, using defaults", path.display());
        Ok(SupervisorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SupervisorConfig::default();
        assert_eq!(config.system.log_level, "info");
        assert_eq!(config.paths.scripts_dir, PathBuf::from("scripts"));
        assert_eq!(config.launcher.interpreter, "python3");
        assert_eq!(config.supervision.restart_cooldown(), Duration::from_secs(1));
        assert_eq!(config.supervision.relaunch_backoff(), Duration::from_secs(2));
        assert_eq!(config.supervision.stats_sample(), Duration::from_millis(100));
        assert_eq!(config.supervision.log_tail_bytes, 6000);
        assert_eq!(
            config.launcher.env.get("PYTHONUNBUFFERED").map(String::as_str),
            Some("1")
        );
    }

    #[test]
    fn test_parse_minimal_config() {
        let toml_str = r#"
[paths]
scripts_dir = "/srv/panel/scripts"

[supervision]
relaunch_backoff_ms = 500
"#;
        let config: SupervisorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.paths.scripts_dir, PathBuf::from("/srv/panel/scripts"));
        assert_eq!(config.paths.logs_dir, PathBuf::from("logs"));
        assert_eq!(config.supervision.relaunch_backoff_ms, 500);
        assert_eq!(config.supervision.restart_cooldown_ms, 1000);
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[system]
log_level = "debug"

[paths]
scripts_dir = "scripts"
logs_dir = "/var/log/panel"

[launcher]
interpreter = "/usr/bin/python3"
interpreter_args = ["-u"]
script_extension = "py"

[launcher.env]
BOT_MODE = "prod"

[supervision]
restart_cooldown_ms = 1000
relaunch_backoff_ms = 2000
stop_grace_ms = 3000
stats_sample_ms = 100
log_tail_bytes = 8192
autostart = ["bot.py", "worker.py"]
"#;
        let config: SupervisorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.system.log_level, "debug");
        assert_eq!(config.launcher.interpreter_args, vec!["-u".to_string()]);
        assert_eq!(config.launcher.env.len(), 1);
        assert_eq!(config.supervision.stop_grace(), Duration::from_secs(3));
        assert_eq!(config.supervision.autostart, vec!["bot.py", "worker.py"]);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.supervision.log_tail_bytes, 6000);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[supervision\nrelaunch_backoff_ms = ").unwrap();
        assert!(load_config_from(&path).is_err());
    }
}
