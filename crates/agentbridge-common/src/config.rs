//! Server configuration: defaults, TOML file, environment overlay.
//!
//! Layering order (highest wins), per the wire spec: CLI flags > config
//! file > environment variables > built-in defaults. This module owns the
//! file/defaults layers; `agentbridge-cli` applies the environment and CLI
//! layers on top by calling the `apply_env` / setter methods below.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Prefix for environment variable overrides, e.g. `AGENTBRIDGE_PORT`.
pub const ENV_PREFIX: &str = "AGENTBRIDGE_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub limits: LimitsConfig,
    pub execution: ExecutionConfig,
    pub log: LogConfig,
    pub governor: GovernorConfig,
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            limits: LimitsConfig::default(),
            execution: ExecutionConfig::default(),
            log: LogConfig::default(),
            governor: GovernorConfig::default(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
    /// Allowed `Origin` header values; empty means "accept any origin".
    pub allowed_origins: Vec<String>,
    pub ping_interval_secs: u64,
    /// A missed pong beyond this many intervals closes the connection.
    pub pong_timeout_intervals: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            allowed_origins: Vec::new(),
            ping_interval_secs: 30,
            pong_timeout_intervals: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_connections: usize,
    pub max_connections_per_ip: usize,
    pub max_frame_size_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub rate_limit_per_sec: u32,
    pub rate_limit_burst: u32,
    pub max_prompt_len: usize,
    pub max_projects: usize,
    /// If non-empty, `project_create` paths must fall under one of these
    /// prefixes.
    pub allowed_root_prefixes: Vec<PathBuf>,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: 1024,
            max_connections_per_ip: 32,
            max_frame_size_bytes: 1_000_000,
            outbound_queue_capacity: 256,
            rate_limit_per_sec: 20,
            rate_limit_burst: 40,
            max_prompt_len: 100_000,
            max_projects: 256,
            allowed_root_prefixes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Path (or bare name, resolved via `PATH`) of the agent CLI binary.
    pub cli_path: String,
    /// Extra arguments appended after the whitelisted options, before the
    /// prompt.
    pub extra_args: Vec<String>,
    pub deadline_secs: u64,
    pub grace_period_secs: u64,
    pub max_concurrent_executions: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            extra_args: vec!["--output-format".to_string(), "stream-json".to_string()],
            deadline_secs: 300,
            grace_period_secs: 5,
            max_concurrent_executions: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub segment_cap_bytes: u64,
    pub segment_cap_entries: u64,
    pub retention_days: u64,
    pub flush_interval_ms: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            segment_cap_bytes: 1_073_741_824, // ~1 GiB
            segment_cap_entries: 10_000,
            retention_days: 30,
            flush_interval_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    pub sample_interval_secs: u64,
    pub soft_memory_bytes: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: 10,
            soft_memory_bytes: 2_147_483_648, // 2 GiB
        }
    }
}

impl ServerConfig {
    /// Load a config file, falling back to defaults for anything it
    /// doesn't set (`#[serde(default)]` on every nested struct).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Overlay `AGENTBRIDGE_*` environment variables onto an already-loaded
    /// config. Called after `load`/`default` and before CLI flags.
    pub fn apply_env(mut self) -> Self {
        if let Some(v) = env_var("HOST") {
            self.network.host = v;
        }
        if let Some(v) = env_var("PORT").and_then(|v| v.parse().ok()) {
            self.network.port = v;
        }
        if let Some(v) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_var("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = env_var("MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            self.limits.max_connections = v;
        }
        self
    }
}

fn env_var(suffix: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{suffix}")).ok()
}
