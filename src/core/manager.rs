//! The Service Manager (§4.7): the process-wide coordinator that owns the
//! lifecycle of the three long-running jobs, serializes mutually exclusive
//! operations on them, and mediates the Event Bus. A single `tokio::Mutex`
//! guards job state; status reads go through `arc-swap` snapshots each job
//! publishes itself, so a stalled probe never blocks a status poll (§4.7,
//! §9 "atomic outbound snapshot").

use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::{info, warn};

use crate::config::{ProbeDefaults, RotationDefaults};
use crate::core::events::{Event, EventBus};
use crate::core::history::HistoryStore;
use crate::core::jobs::{http_test, scanner, HttpTestHandles, HttpTestRequest, ScannerHandles, ScannerRequest};
use crate::core::prober::{ProbeOptions, Prober};
use crate::core::proxy_core::ProxyCore;
use crate::core::rotation;
use crate::core::rotation::RotationHandles;
use crate::core::types::{
    HttpResult, JobStatus, ProxyInstance, ProxyStartConfig, RotationState, ScanResult,
};
use crate::error::{AppError, AppResult};

/// Rejects a pool containing a `ProxyConfig` that doesn't even parse as a
/// URI (§3 "ProxyConfig... protocol URI", §7 `Validation`: "unknown
/// config"). This is a cheap sanity check, not a reachability probe — the
/// rotation engine's sweep is what actually proves a config is live.
fn validate_pool(pool: &[String]) -> AppResult<()> {
    for config in pool {
        if url::Url::parse(config).is_err() {
            return Err(AppError::validation(format!(
                "invalid proxy config (not a parseable URI): {config}"
            )));
        }
    }
    Ok(())
}

/// Polled status for the proxy subsystem (§4.7 `GetProxyStatus`), distinct
/// from the rotation engine's internal [`RotationState`]: `starting` covers
/// the window between `StartProxy` returning and the engine's first state
/// publication, which `RotationState` has no variant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct ProxyRuntime {
    handles: RotationHandles,
}

struct HttpTestRuntime {
    handles: HttpTestHandles,
}

struct ScannerRuntime {
    handles: ScannerHandles,
}

/// `ServiceManager` owns zero-or-one proxy instance and zero-or-one each of
/// the tester/scanner jobs (§3 invariant 1, invariant 5). Mutating or
/// inspecting that ownership takes `state`; the job's own progress is read
/// through its `arc-swap` snapshot without the lock (§4.7).
pub struct ServiceManager {
    state: tokio::sync::Mutex<ManagerState>,
    events: Arc<EventBus>,
    prober: Arc<dyn Prober>,
    proxy_core: Arc<dyn ProxyCore>,
    history: Arc<HistoryStore>,
    default_probe: ProbeDefaults,
    rotation_defaults: RotationDefaults,
}

#[derive(Default)]
struct ManagerState {
    proxy: Option<ProxyRuntime>,
    proxy_status: Option<Arc<ArcSwap<ProxyStatus>>>,
    http_test: Option<HttpTestRuntime>,
    scanner: Option<ScannerRuntime>,
}

impl ServiceManager {
    pub fn new(
        prober: Arc<dyn Prober>,
        proxy_core: Arc<dyn ProxyCore>,
        history: Arc<HistoryStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self::with_defaults(
            prober,
            proxy_core,
            history,
            events,
            ProbeDefaults::default(),
            RotationDefaults::default(),
        )
    }

    /// Like [`Self::new`], but with the configured `ProbeDefaults`/
    /// `RotationDefaults` (§3.1) applied instead of their hardcoded
    /// fallbacks — this is what `main` wires up from the loaded [`AppConfig`].
    pub fn with_defaults(
        prober: Arc<dyn Prober>,
        proxy_core: Arc<dyn ProxyCore>,
        history: Arc<HistoryStore>,
        events: Arc<EventBus>,
        default_probe: ProbeDefaults,
        rotation_defaults: RotationDefaults,
    ) -> Self {
        Self {
            state: tokio::sync::Mutex::new(ManagerState::default()),
            events,
            prober,
            proxy_core,
            history,
            default_probe,
            rotation_defaults,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Substitutes the configured `ProbeDefaults` for a request's hardcoded
    /// `ProbeOptions::default()` sentinel (§3.1: "the default `options`
    /// bundle handed to the Prober when a request omits them"). A request
    /// that explicitly set any field differently is passed through as-is.
    fn resolve_options(&self, options: ProbeOptions) -> ProbeOptions {
        if options == ProbeOptions::default() {
            ProbeOptions::from(&self.default_probe)
        } else {
            options
        }
    }

    // ---- Proxy ----------------------------------------------------------

    pub async fn start_proxy(&self, mut cfg: ProxyStartConfig) -> AppResult<ProxyStatus> {
        if cfg.pool.is_empty() {
            return Err(AppError::validation("pool must not be empty"));
        }
        validate_pool(&cfg.pool)?;
        cfg.options = self.resolve_options(cfg.options);

        let mut state = self.state.lock().await;
        if state.proxy.is_some() {
            return Err(AppError::conflict("proxy instance already running"));
        }

        let status = Arc::new(ArcSwap::from_pointee(ProxyStatus::Starting));
        let handles = rotation::spawn(
            cfg,
            self.prober.clone(),
            self.proxy_core.clone(),
            self.events.clone(),
            self.rotation_defaults.clone(),
        );
        status.store(Arc::new(ProxyStatus::Running));

        state.proxy = Some(ProxyRuntime { handles });
        state.proxy_status = Some(status);
        info!("proxy instance started");
        Ok(ProxyStatus::Running)
    }

    pub async fn stop_proxy(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        let Some(runtime) = state.proxy.take() else {
            return Err(AppError::not_found("no proxy instance"));
        };
        if let Some(status) = &state.proxy_status {
            status.store(Arc::new(ProxyStatus::Stopping));
        }

        // Await the engine's own shutdown outside the manager's "is there an
        // instance" bookkeeping; the lock is only held for the bookkeeping
        // swap above and release below (§5 "mutex held only across
        // state inspection/mutation, never across I/O").
        drop(state);

        runtime.handles.stop.cancel();
        match runtime.handles.join.await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "rotation engine task panicked");
                self.events.publish(Event::log(
                    "ServiceManager",
                    format!("rotation engine task panicked: {e}"),
                ));
                self.events.publish(Event::ProxyStatus {
                    status: RotationState::Stopped,
                });
            }
        }

        let mut state = self.state.lock().await;
        state.proxy_status = None;
        Ok(())
    }

    pub async fn rotate_proxy(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        let Some(runtime) = &state.proxy else {
            return Err(AppError::conflict("no proxy instance"));
        };

        let snapshot = runtime.handles.snapshot.load_full();
        match snapshot.rotation_state {
            RotationState::Active | RotationState::Stalled => {
                runtime.handles.rotate_now.notify_one();
                Ok(())
            }
            _ => Err(AppError::conflict(format!(
                "cannot rotate while {:?}",
                snapshot.rotation_state
            ))),
        }
    }

    pub async fn proxy_status(&self) -> ProxyStatus {
        let state = self.state.lock().await;
        state
            .proxy_status
            .as_ref()
            .map(|s| *s.load_full())
            .unwrap_or(ProxyStatus::Stopped)
    }

    /// Lock-free relative to job execution: the snapshot handle is cloned
    /// under the manager mutex, but read afterwards without it, so a
    /// stalled probe inside the rotation engine never blocks this call
    /// (§4.7).
    pub async fn proxy_details(&self) -> AppResult<ProxyInstance> {
        let state = self.state.lock().await;
        let runtime = state
            .proxy
            .as_ref()
            .ok_or_else(|| AppError::not_found("no proxy instance"))?;
        let snapshot = runtime.handles.snapshot.clone();
        drop(state);
        Ok((*snapshot.load_full()).clone())
    }

    // ---- HTTP test job ---------------------------------------------------

    pub async fn start_http_test(&self, mut req: HttpTestRequest) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = &state.http_test {
            if **existing.handles.status.load() != JobStatus::Idle {
                return Err(AppError::conflict("http test already running"));
            }
        }
        if req.links.is_empty() {
            return Err(AppError::validation("links must not be empty"));
        }
        req.options = self.resolve_options(req.options);

        let handles = http_test::spawn(req, self.prober.clone(), self.history.clone(), self.events.clone());
        state.http_test = Some(HttpTestRuntime { handles });
        Ok(())
    }

    pub async fn stop_http_test(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if let Some(runtime) = &state.http_test {
            if **runtime.handles.status.load() == JobStatus::Running {
                runtime.handles.status.store(Arc::new(JobStatus::Stopping));
            }
            runtime.handles.stop.cancel();
        }
        Ok(())
    }

    pub async fn http_test_status(&self) -> JobStatus {
        let state = self.state.lock().await;
        state
            .http_test
            .as_ref()
            .map(|r| *r.handles.status.load_full())
            .unwrap_or(JobStatus::Idle)
    }

    pub async fn http_test_history(&self) -> AppResult<Vec<HttpResult>> {
        self.history
            .load_http_results()
            .await
            .map_err(|e| AppError::fatal(e.to_string()))
    }

    pub async fn clear_http_test_history(&self) -> AppResult<()> {
        self.history
            .clear_http_history()
            .await
            .map_err(|e| AppError::fatal(e.to_string()))
    }

    // ---- Scanner job ------------------------------------------------------

    pub async fn start_scanner(&self, mut req: ScannerRequest) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(existing) = &state.scanner {
            if **existing.handles.status.load() != JobStatus::Idle {
                return Err(AppError::conflict("scanner already running"));
            }
        }
        req.probe_options = self.resolve_options(req.probe_options);

        let handles = scanner::spawn(req, self.prober.clone(), self.history.clone(), self.events.clone());
        state.scanner = Some(ScannerRuntime { handles });
        Ok(())
    }

    pub async fn stop_scanner(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if let Some(runtime) = &state.scanner {
            if **runtime.handles.status.load() == JobStatus::Running {
                runtime.handles.status.store(Arc::new(JobStatus::Stopping));
            }
            runtime.handles.stop.cancel();
        }
        Ok(())
    }

    pub async fn scanner_status(&self) -> JobStatus {
        let state = self.state.lock().await;
        state
            .scanner
            .as_ref()
            .map(|r| *r.handles.status.load_full())
            .unwrap_or(JobStatus::Idle)
    }

    pub async fn is_scanning(&self) -> bool {
        matches!(
            self.scanner_status().await,
            JobStatus::Running | JobStatus::Stopping
        )
    }

    pub async fn scan_history(&self) -> AppResult<Vec<ScanResult>> {
        self.history
            .load_scan_results()
            .await
            .map_err(|e| AppError::fatal(e.to_string()))
    }

    pub async fn clear_scan_history(&self) -> AppResult<()> {
        self.history
            .clear_scan_history()
            .await
            .map_err(|e| AppError::fatal(e.to_string()))
    }

    // ---- Shutdown ---------------------------------------------------------

    /// Reverse-order teardown (§9): scanner, tester, proxy.
    pub async fn shutdown(&self) {
        if let Err(e) = self.stop_scanner().await {
            warn!(error = %e, "error stopping scanner during shutdown");
        }
        if let Err(e) = self.stop_http_test().await {
            warn!(error = %e, "error stopping http test during shutdown");
        }
        if let Err(e) = self.stop_proxy().await {
            if !matches!(e, AppError::NotFound(_)) {
                warn!(error = %e, "error stopping proxy during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;
    use crate::core::prober::{ProbeOptions, ProberError};
    use crate::core::proxy_core::ProxyCoreError;
    use crate::core::types::InboundSpec;

    struct AlwaysOkProber;

    #[async_trait::async_trait]
    impl Prober for AlwaysOkProber {
        async fn probe(
            &self,
            config: &String,
            _options: &ProbeOptions,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> Result<crate::core::types::OutboundHealth, ProberError> {
            Ok(crate::core::types::OutboundHealth {
                config: config.clone(),
                delay_ms: 5,
                download_mbps: None,
                upload_mbps: None,
                location: None,
                last_ok_at: 0,
            })
        }
    }

    struct NoopProxyCore;

    #[async_trait::async_trait]
    impl ProxyCore for NoopProxyCore {
        async fn bind_inbound(
            &self,
            _inbound: &InboundSpec,
            initial_outbound: String,
        ) -> Result<crate::core::proxy_core::ProxyCoreHandle, ProxyCoreError> {
            let outbound = Arc::new(ArcSwap::from_pointee(initial_outbound));
            let cancel = tokio_util::sync::CancellationToken::new();
            let accept_cancel = cancel.clone();
            let accept_loop = tokio::spawn(async move { accept_cancel.cancelled().await });
            Ok(crate::core::proxy_core::ProxyCoreHandle {
                outbound,
                accept_loop,
                cancel,
            })
        }

        fn swap_outbound(&self, handle: &crate::core::proxy_core::ProxyCoreHandle, config: String) {
            handle.outbound.store(Arc::new(config));
        }

        async fn close(&self, handle: crate::core::proxy_core::ProxyCoreHandle) {
            handle.cancel.cancel();
            handle.accept_loop.abort();
            let _ = handle.accept_loop.await;
        }
    }

    fn test_manager(dir: &std::path::Path) -> ServiceManager {
        ServiceManager::new(
            Arc::new(AlwaysOkProber),
            Arc::new(NoopProxyCore),
            Arc::new(HistoryStore::new(&HistoryConfig::default(), dir)),
            Arc::new(EventBus::new()),
        )
    }

    fn proxy_cfg(pool: Vec<&str>) -> ProxyStartConfig {
        ProxyStartConfig {
            inbound: InboundSpec {
                protocol: "socks5".to_string(),
                addr: "127.0.0.1".to_string(),
                port: 0,
                orig_link: None,
            },
            pool: pool.into_iter().map(|s| s.to_string()).collect(),
            interval_s: 3600,
            options: ProbeOptions::default(),
        }
    }

    #[tokio::test]
    async fn start_proxy_twice_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        manager
            .start_proxy(proxy_cfg(vec!["socks5://a.example:1080"]))
            .await
            .unwrap();
        let err = manager
            .start_proxy(proxy_cfg(vec!["socks5://a.example:1080"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        manager.stop_proxy().await.unwrap();
    }

    #[tokio::test]
    async fn stop_proxy_without_instance_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let err = manager.stop_proxy().await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn rotate_without_instance_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let err = manager.rotate_proxy().await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn http_test_rejects_empty_link_list() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        let err = manager
            .start_http_test(HttpTestRequest {
                links: vec![],
                thread_count: 4,
                options: ProbeOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn http_test_busy_while_running() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());

        manager
            .start_http_test(HttpTestRequest {
                links: vec!["https://example.com".to_string()],
                thread_count: 1,
                options: ProbeOptions::default(),
            })
            .await
            .unwrap();

        let err = manager
            .start_http_test(HttpTestRequest {
                links: vec!["https://example.com".to_string()],
                thread_count: 1,
                options: ProbeOptions::default(),
            })
            .await;

        // The first run may already have finished against the mock prober
        // by the time the second call lands; only a still-running job must
        // conflict.
        if let Err(e) = err {
            assert!(matches!(e, AppError::Conflict(_)));
        }
    }

    #[tokio::test]
    async fn scanner_status_reflects_idle_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = test_manager(dir.path());
        assert!(!manager.is_scanning().await);
    }

    #[tokio::test]
    async fn configured_probe_defaults_fill_in_an_omitted_options_field() {
        let dir = tempfile::tempdir().unwrap();
        let configured = crate::config::ProbeDefaults {
            destination_url: "https://configured.example/probe".to_string(),
            timeout_ms: 1234,
            measure_speed: true,
            ipv4_only: true,
        };
        let manager = ServiceManager::with_defaults(
            Arc::new(AlwaysOkProber),
            Arc::new(NoopProxyCore),
            Arc::new(HistoryStore::new(&HistoryConfig::default(), dir.path())),
            Arc::new(EventBus::new()),
            configured.clone(),
            RotationDefaults::default(),
        );

        assert_eq!(
            manager.resolve_options(ProbeOptions::default()),
            ProbeOptions::from(&configured),
            "an untouched request must inherit the configured ProbeDefaults, not the library default"
        );

        let explicit = ProbeOptions {
            destination_url: "https://operator-chosen.example".to_string(),
            timeout_ms: 999,
            measure_speed: false,
            ipv4_only: false,
        };
        assert_eq!(
            manager.resolve_options(explicit.clone()),
            explicit,
            "a request that set its own options must not be overridden"
        );
    }
}
