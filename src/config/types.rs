use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level daemon configuration.
///
/// Loaded via [`super::AppConfig::load`]: compiled-in [`Default`], then an
/// optional TOML file, then `CCROTATE_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Address the API façade (HTTP + WebSocket) binds to.
    pub listen_addr: String,
    /// Directory used for history CSVs and the debug log.
    pub working_dir: PathBuf,
    pub default_probe: ProbeDefaults,
    pub rotation: RotationDefaults,
    pub history: HistoryConfig,
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8787".to_string(),
            working_dir: default_working_dir(),
            default_probe: ProbeDefaults::default(),
            rotation: RotationDefaults::default(),
            history: HistoryConfig::default(),
            log: LogConfig::default(),
        }
    }
}

/// Falls back to the current directory when no platform data directory is
/// resolvable, the same degrade-gracefully pattern the source project uses
/// around its own `dirs::home_dir()` calls.
fn default_working_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("rotaproxyd"))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default probe options handed to the Prober when a request omits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeDefaults {
    pub destination_url: String,
    pub timeout_ms: u32,
    pub measure_speed: bool,
    pub ipv4_only: bool,
}

impl Default for ProbeDefaults {
    fn default() -> Self {
        Self {
            destination_url: "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
            timeout_ms: 5_000,
            measure_speed: false,
            ipv4_only: false,
        }
    }
}

/// Bounds for the rotation engine's timers, independent of any single
/// [`ProxyInstance`](crate::core::types::ProxyInstance)'s `interval_s`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationDefaults {
    /// `interval_s` values below this are still honored verbatim; this only
    /// documents the practical floor operators should use. `0` is the
    /// explicit "rotation disabled" sentinel (§4.4) and is never clamped.
    pub min_interval_s: u64,
    pub backoff_initial_s: u64,
    pub backoff_cap_s: u64,
    pub failure_threshold: u32,
    pub liveness_probe_floor_s: u64,
}

impl Default for RotationDefaults {
    fn default() -> Self {
        Self {
            min_interval_s: 30,
            backoff_initial_s: 10,
            backoff_cap_s: 120,
            failure_threshold: 3,
            liveness_probe_floor_s: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub http_history_path: PathBuf,
    pub scan_history_path: PathBuf,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            http_history_path: PathBuf::from("http_test_history.csv"),
            scan_history_path: PathBuf::from("cf_scan_history.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub debug_log_path: PathBuf,
    pub rotation_size_mb: u64,
    pub max_archives: u32,
    pub tracing_filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug_log_path: PathBuf::from("rotaproxyd-debug.log"),
            rotation_size_mb: 8,
            max_archives: 5,
            tracing_filter: "info".to_string(),
        }
    }
}
