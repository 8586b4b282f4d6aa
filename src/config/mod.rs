//! Daemon configuration: compiled-in defaults layered under an optional TOML
//! file, itself layered under `CCROTATE_*` environment overrides.

mod types;

pub use types::{AppConfig, HistoryConfig, LogConfig, ProbeDefaults, RotationDefaults};

use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

impl AppConfig {
    /// Load configuration: start from [`AppConfig::default`], overlay a TOML
    /// file if `path` is given and exists, then overlay environment
    /// variables. Mirrors the source project's config-file-then-env
    /// layering for its own `CCSTATUS_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = path {
            if path.exists() {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CCROTATE_LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Ok(v) = std::env::var("CCROTATE_WORKING_DIR") {
            self.working_dir = v.into();
        }
        if let Ok(v) = std::env::var("CCROTATE_PROBE_TIMEOUT_MS") {
            if let Ok(ms) = v.parse() {
                self.default_probe.timeout_ms = ms;
            }
        }
        if let Ok(v) = std::env::var("CCROTATE_LOG_LEVEL") {
            self.log.tracing_filter = v;
        }
    }
}
