use std::sync::Arc;

use rotaproxyd::api;
use rotaproxyd::cli::Cli;
use rotaproxyd::config::AppConfig;
use rotaproxyd::core::{
    DebugLogger, EventBus, HistoryStore, IsahcProber, ServiceManager, TcpProxyCore,
};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse_args();

    let mut config = AppConfig::load(cli.config.as_deref())?;
    if let Some(listen) = &cli.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(log_level) = &cli.log_level {
        config.log.tracing_filter = log_level.clone();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log.tracing_filter)
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let debug_log = Arc::new(DebugLogger::from_config(&config.log, &config.working_dir));
    let events = Arc::new(EventBus::with_debug_log(debug_log.clone()));
    let history = Arc::new(HistoryStore::new(&config.history, &config.working_dir));
    let prober = Arc::new(IsahcProber::default());
    let proxy_core = Arc::new(TcpProxyCore::new());

    let manager = Arc::new(ServiceManager::with_defaults(
        prober,
        proxy_core,
        history,
        events,
        config.default_probe.clone(),
        config.rotation.clone(),
    ));

    let app = api::router(manager.clone());
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "rotaproxyd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Tear jobs down in reverse order (scanner, tester, proxy) now that the
    // façade has stopped accepting new work (§9).
    manager.shutdown().await;
    tracing::info!("rotaproxyd shut down cleanly");

    Ok(())
}

/// Resolves on SIGINT/SIGTERM, or plain Ctrl-C on platforms without POSIX
/// signals (§2.1 ambient stack).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
