//! Error taxonomy shared across the Service Manager, jobs, and the API façade.
//!
//! Mirrors the propagation policy: `Validation`/`Conflict`/`NotFound` are
//! surfaced directly to the operator, `Transient` errors are logged and
//! recovered locally, `Fatal` errors terminate only the owning job.

use thiserror::Error;

/// Top-level error taxonomy. Each job/manager operation returns one of these
/// variants rather than an opaque `anyhow`/`Box<dyn Error>`, so the API
/// façade can map it to an HTTP status without inspecting strings.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("fatal error: {0}")]
    Fatal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Short human-readable message safe to return to the operator.
    /// Verbose diagnostics belong on the WebSocket `log` channel instead.
    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;
