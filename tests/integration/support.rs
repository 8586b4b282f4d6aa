//! Shared mocks for the integration tests in this directory. The `Prober`
//! is faked (no real network calls belong in a test run), but the
//! `ProxyCore` is the real [`TcpProxyCore`] bound to an ephemeral local
//! port — these are true integration tests exercising the manager, the
//! rotation engine, and the listener lifecycle together.

use std::sync::Arc;

use async_trait::async_trait;
use rotaproxyd::core::prober::{ProbeOptions, Prober, ProberError};
use rotaproxyd::core::types::OutboundHealth;
use rotaproxyd::core::{EventBus, HistoryStore, ServiceManager, TcpProxyCore};
use tokio_util::sync::CancellationToken;

pub struct AlwaysOkProber;

#[async_trait]
impl Prober for AlwaysOkProber {
    async fn probe(
        &self,
        config: &String,
        _options: &ProbeOptions,
        _cancel: CancellationToken,
    ) -> Result<OutboundHealth, ProberError> {
        Ok(OutboundHealth {
            config: config.clone(),
            delay_ms: 7,
            download_mbps: None,
            upload_mbps: None,
            location: Some("SJC".to_string()),
            last_ok_at: 0,
        })
    }
}

pub fn test_manager(dir: &std::path::Path) -> ServiceManager {
    ServiceManager::new(
        Arc::new(AlwaysOkProber),
        Arc::new(TcpProxyCore::new()),
        Arc::new(HistoryStore::new(
            &rotaproxyd::config::HistoryConfig::default(),
            dir,
        )),
        Arc::new(EventBus::new()),
    )
}

pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: std::time::Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}

/// Like [`wait_until`], but for a condition that itself needs to `.await`
/// (polling an async manager accessor rather than reading a plain
/// `arc-swap` snapshot).
pub async fn wait_until_async<Fut, F>(mut condition: F, timeout: std::time::Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
}
