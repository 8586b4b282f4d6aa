//! Shared data model: the types every component passes across its boundary.

use serde::{Deserialize, Serialize};

/// An outbound, described as an opaque connection URI (e.g. `socks5://host:port`).
/// Immutable once admitted to a pool.
pub type ProxyConfig = String;

/// Result of a successful [`crate::core::Prober::probe`] call, attached to an
/// outbound while it is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundHealth {
    pub config: ProxyConfig,
    pub delay_ms: u64,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub location: Option<String>,
    pub last_ok_at: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationState {
    Idle,
    Probing,
    Switching,
    Active,
    Stalled,
    Stopping,
    Stopped,
}

/// Local listener spec the Proxy Core binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundSpec {
    pub protocol: String,
    pub addr: String,
    pub port: u16,
    pub orig_link: Option<String>,
}

/// Operator-supplied configuration for `StartProxy`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyStartConfig {
    pub inbound: InboundSpec,
    pub pool: Vec<ProxyConfig>,
    pub interval_s: u64,
    #[serde(default)]
    pub options: crate::core::prober::ProbeOptions,
}

/// Snapshot of the single live proxy instance, read lock-free by status
/// queries (§4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyInstance {
    pub inbound: InboundSpec,
    pub active: Option<OutboundHealth>,
    pub pool: Vec<ProxyConfig>,
    pub interval_s: u64,
    pub rotation_state: RotationState,
    pub next_rotation_at: Option<i64>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Idle,
    Running,
    Stopping,
}

/// Terminal value carried by the `http_test_status` / `cfscan_status`
/// events (§4.5/§4.6), distinct from the polled [`JobStatus`]: a job's
/// event stream ends with exactly one of these, while `Get*Status` reflects
/// `idle`/`running`/`stopping` throughout the job's life.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobTerminalStatus {
    Finished,
    Stopped,
}

/// One row of the HTTP tester's history CSV / `http_result` event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResult {
    pub link: String,
    pub delay_ms: Option<u64>,
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
    pub status: String,
    pub location: Option<String>,
    pub error: Option<String>,
}

/// One row of the scanner's history CSV / `cfscan_result` event payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub ip: String,
    pub delay_ms: Option<u64>,
    pub loss_pct: f64,
    pub location: Option<String>,
}
