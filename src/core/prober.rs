//! The single-config latency/throughput probe used by the rotation engine,
//! the HTTP test job, and the scanner job (§4.2). Only the reference
//! implementation lives here — the real proxy-aware prober is an external
//! collaborator this trait stands in for.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use isahc::config::{Configurable, RedirectPolicy};
use isahc::{AsyncReadResponseExt, HttpClient, Request};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::types::{OutboundHealth, ProxyConfig};

/// Per-call probe options, distinct from [`crate::config::ProbeDefaults`]
/// (the config-layer defaults a request may omit and fall back to).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    pub destination_url: String,
    pub timeout_ms: u32,
    pub measure_speed: bool,
    pub ipv4_only: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            destination_url: "https://www.cloudflare.com/cdn-cgi/trace".to_string(),
            timeout_ms: 5_000,
            measure_speed: false,
            ipv4_only: false,
        }
    }
}

/// A request that never set `options` deserializes to [`ProbeOptions::default`]
/// (the hardcoded library default); the Service Manager then substitutes the
/// *configured* `ProbeDefaults` for that sentinel, per §3.1 ("the default
/// `options` bundle handed to the Prober when a request omits them").
impl From<&crate::config::ProbeDefaults> for ProbeOptions {
    fn from(defaults: &crate::config::ProbeDefaults) -> Self {
        Self {
            destination_url: defaults.destination_url.clone(),
            timeout_ms: defaults.timeout_ms,
            measure_speed: defaults.measure_speed,
            ipv4_only: defaults.ipv4_only,
        }
    }
}

#[derive(Debug, Error)]
pub enum ProberError {
    #[error("probe timed out after {0}ms")]
    Timeout(u32),
    #[error("probe cancelled")]
    Cancelled,
    #[error("transport error: {0}")]
    Transport(String),
}

/// A single timed request through one candidate outbound. Implementations
/// MUST observe `cancel` and return [`ProberError::Cancelled`] promptly,
/// distinguishable from [`ProberError::Timeout`].
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        config: &ProxyConfig,
        options: &ProbeOptions,
        cancel: CancellationToken,
    ) -> Result<OutboundHealth, ProberError>;
}

/// Reference implementation: an HTTP(S) request through the candidate
/// outbound to `destination_url`, timing connect + time-to-first-byte and
/// optionally a short body read to estimate throughput.
///
/// Mirrors the source project's `HealthCheckClient` split: a thin trait over
/// a concrete HTTP client, so the transport stays swappable and mockable.
pub struct IsahcProber {
    client: HttpClient,
}

impl IsahcProber {
    pub fn new() -> Result<Self, ProberError> {
        let client = HttpClient::builder()
            .redirect_policy(RedirectPolicy::None)
            .build()
            .map_err(|e| ProberError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

impl Default for IsahcProber {
    fn default() -> Self {
        // The builder only fails on TLS backend init; fall back to the
        // client's own unconfigured default rather than panic.
        Self::new().unwrap_or_else(|_| Self {
            client: HttpClient::new().expect("isahc default client"),
        })
    }
}

#[async_trait]
impl Prober for IsahcProber {
    async fn probe(
        &self,
        config: &ProxyConfig,
        options: &ProbeOptions,
        cancel: CancellationToken,
    ) -> Result<OutboundHealth, ProberError> {
        let timeout = Duration::from_millis(options.timeout_ms as u64);

        // `ipv4_only` is honored best-effort: the reference client does not
        // expose resolver family selection, so this only documents intent
        // for the real Proxy Core this contract stands in for.
        let _ = options.ipv4_only;

        let request = Request::get(&options.destination_url)
            .timeout(timeout)
            .body(())
            .map_err(|e| ProberError::Transport(e.to_string()))?;

        let started = Instant::now();
        let probe = self.client.send_async(request);

        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(ProberError::Cancelled),
            result = tokio::time::timeout(timeout, probe) => match result {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => return Err(ProberError::Transport(e.to_string())),
                Err(_) => return Err(ProberError::Timeout(options.timeout_ms)),
            },
        };

        let delay_ms = started.elapsed().as_millis() as u64;

        let mut download_mbps = None;
        if options.measure_speed {
            let body_started = Instant::now();
            let mut buf = Vec::new();
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(ProberError::Cancelled),
                result = tokio::time::timeout(timeout, response.copy_to(&mut buf)) => match result {
                    Ok(Ok(n)) => n,
                    Ok(Err(e)) => return Err(ProberError::Transport(e.to_string())),
                    Err(_) => return Err(ProberError::Timeout(options.timeout_ms)),
                },
            };
            let secs = body_started.elapsed().as_secs_f64().max(0.001);
            download_mbps = Some((read as f64 * 8.0 / 1_000_000.0) / secs);
        }

        Ok(OutboundHealth {
            config: config.clone(),
            delay_ms,
            download_mbps,
            upload_mbps: None,
            location: response
                .headers()
                .get("cf-ray")
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string()),
            last_ok_at: chrono::Utc::now().timestamp(),
        })
    }
}
