//! The HTTP/WebSocket façade (§4.8, §6): a thin translation layer between
//! `/api/v1/*` requests and [`ServiceManager`] operations, plus a `/ws`
//! upgrade that subscribes the connection to the Event Bus. Holds no state
//! of its own and never retains the manager mutex across a WebSocket's
//! lifetime.

mod handlers;
mod ws;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::ServiceManager;

pub type AppState = Arc<ServiceManager>;

pub fn router(manager: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/ws", get(ws::upgrade))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/proxy/start", post(handlers::proxy_start))
        .route("/proxy/stop", post(handlers::proxy_stop))
        .route("/proxy/rotate", post(handlers::proxy_rotate))
        .route("/proxy/status", get(handlers::proxy_status))
        .route("/proxy/details", get(handlers::proxy_details))
        .route("/http/test", post(handlers::http_test_start))
        .route("/http/test/stop", post(handlers::http_test_stop))
        .route("/http/test/status", get(handlers::http_test_status))
        .route("/http/test/history", get(handlers::http_test_history))
        .route(
            "/http/test/clear_history",
            post(handlers::http_test_clear_history),
        )
        .route("/scanner/cf/start", post(handlers::scanner_start))
        .route("/scanner/cf/stop", post(handlers::scanner_stop))
        .route("/scanner/cf/status", get(handlers::scanner_status))
        .route("/scanner/cf/history", get(handlers::scanner_history))
        .route(
            "/scanner/cf/clear_history",
            post(handlers::scanner_clear_history),
        )
        .route("/scanner/cf/ranges", get(handlers::scanner_ranges))
}
