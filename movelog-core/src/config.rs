use figment::{Figment, providers::{Env, Format, Serialized, Yaml}};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MovelogConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Listener and request-handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    /// Largest accepted POST body. Larger bodies get a 413.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Idle/read timeout per connection. 0 = no timeout.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
    /// How long shutdown waits for in-flight connections before aborting them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
}

/// Append-only log file settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
    /// `sync_data` after every batch.
    #[serde(default)]
    pub sync_writes: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "default_true")]
    pub access_log: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

// ── Defaults ──────────────────────────────────────────────────

fn default_addr() -> String { "0.0.0.0:8000".into() }
fn default_max_body_bytes() -> usize { 1024 * 1024 }
fn default_read_timeout() -> u64 { 30_000 }
fn default_shutdown_grace() -> u64 { 10_000 }
fn default_log_path() -> PathBuf { PathBuf::from("game_log.csv") }
fn default_true() -> bool { true }

// ── Impls ─────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            max_body_bytes: default_max_body_bytes(),
            read_timeout_ms: default_read_timeout(),
            shutdown_grace_ms: default_shutdown_grace(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
            sync_writes: false,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Plain,
            access_log: true,
        }
    }
}

impl MovelogConfig {
    /// Load configuration from defaults, an optional YAML file, then
    /// `MOVELOG_`-prefixed env overrides (`MOVELOG_SERVER__ADDR`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(MovelogConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: MovelogConfig = figment
            .merge(Env::prefixed("MOVELOG_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.addr.trim().is_empty() {
            anyhow::bail!("server.addr must not be empty");
        }
        if self.server.max_body_bytes == 0 {
            anyhow::bail!("server.max_body_bytes must be greater than 0");
        }
        if self.log.path.as_os_str().is_empty() {
            anyhow::bail!("log.path must not be empty");
        }
        Ok(())
    }

    /// Read timeout as a `Duration`, `None` when disabled.
    pub fn read_timeout(&self) -> Option<std::time::Duration> {
        match self.server.read_timeout_ms {
            0 => None,
            ms => Some(std::time::Duration::from_millis(ms)),
        }
    }

    pub fn shutdown_grace(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.server.shutdown_grace_ms)
    }
}
