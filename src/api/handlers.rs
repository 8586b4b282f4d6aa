//! One handler per `/api/v1/*` route (§6), each translating its request
//! body/query straight into a single [`ServiceManager`] call.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::core::jobs::{HttpTestRequest, ScannerRequest};
use crate::core::ranges;
use crate::core::types::ProxyStartConfig;
use crate::error::AppError;

use super::AppState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, err: &AppError) -> Response {
    (status, Json(ErrorBody { error: err.user_message() })).into_response()
}

/// Default status mapping from §7's taxonomy; individual handlers override
/// it where §6's table asks for a different code on a specific route.
fn default_status(err: &AppError) -> StatusCode {
    match err {
        AppError::Validation(_) => StatusCode::BAD_REQUEST,
        AppError::Conflict(_) => StatusCode::CONFLICT,
        AppError::NotFound(_) => StatusCode::NOT_FOUND,
        AppError::Transient(_) | AppError::Fatal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Serialize)]
struct StatusBody<T: Serialize> {
    status: T,
}

// ---- Proxy ----------------------------------------------------------------

pub async fn proxy_start(
    State(manager): State<AppState>,
    body: Result<Json<ProxyStartConfig>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(cfg) = match body {
        Ok(json) => json,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &AppError::validation(e.to_string()),
            )
        }
    };

    match manager.start_proxy(cfg).await {
        Ok(status) => Json(StatusBody { status }).into_response(),
        // §6: proxy/start returns 500 on "busy" (an instance already exists)
        // rather than the usual 409 a Conflict maps to elsewhere.
        Err(e @ AppError::Conflict(_)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn proxy_stop(State(manager): State<AppState>) -> Response {
    match manager.stop_proxy().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn proxy_rotate(State(manager): State<AppState>) -> Response {
    match manager.rotate_proxy().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(StatusCode::CONFLICT, &e),
    }
}

pub async fn proxy_status(State(manager): State<AppState>) -> Response {
    let status = manager.proxy_status().await;
    Json(StatusBody { status }).into_response()
}

pub async fn proxy_details(State(manager): State<AppState>) -> Response {
    match manager.proxy_details().await {
        Ok(details) => Json(details).into_response(),
        Err(e) => error_response(StatusCode::NOT_FOUND, &e),
    }
}

// ---- HTTP test job ----------------------------------------------------------

pub async fn http_test_start(
    State(manager): State<AppState>,
    body: Result<Json<HttpTestRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(json) => json,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &AppError::validation(e.to_string()),
            )
        }
    };

    match manager.start_http_test(req).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn http_test_stop(State(manager): State<AppState>) -> Response {
    match manager.stop_http_test().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn http_test_status(State(manager): State<AppState>) -> Response {
    let status = manager.http_test_status().await;
    Json(StatusBody { status }).into_response()
}

pub async fn http_test_history(State(manager): State<AppState>) -> Response {
    match manager.http_test_history().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

pub async fn http_test_clear_history(State(manager): State<AppState>) -> Response {
    match manager.clear_http_test_history().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

// ---- Scanner job ------------------------------------------------------------

pub async fn scanner_start(
    State(manager): State<AppState>,
    body: Result<Json<ScannerRequest>, axum::extract::rejection::JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(json) => json,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &AppError::validation(e.to_string()),
            )
        }
    };

    match manager.start_scanner(req).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn scanner_stop(State(manager): State<AppState>) -> Response {
    match manager.stop_scanner().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(default_status(&e), &e),
    }
}

pub async fn scanner_status(State(manager): State<AppState>) -> Response {
    let is_scanning = manager.is_scanning().await;
    Json(serde_json::json!({ "is_scanning": is_scanning })).into_response()
}

pub async fn scanner_history(State(manager): State<AppState>) -> Response {
    match manager.scan_history().await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

pub async fn scanner_clear_history(State(manager): State<AppState>) -> Response {
    match manager.clear_scan_history().await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e),
    }
}

pub async fn scanner_ranges(State(_manager): State<AppState>) -> Response {
    let ranges = ranges::fetch_ranges().await;
    Json(serde_json::json!({ "ranges": ranges })).into_response()
}
