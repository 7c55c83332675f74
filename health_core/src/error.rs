//! Error types for check registration and check execution

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HealthError>;

/// Configuration and programmer errors. These surface at startup, before
/// any run, and are meant to abort it.
#[derive(Error, Debug)]
pub enum HealthError {
    #[error("Health check name cannot be empty")]
    EmptyName,

    #[error("Health check '{0}' is already registered")]
    DuplicateName(String),

    #[error("Invalid URL for health check '{name}': {reason}")]
    InvalidUrl { name: String, reason: String },

    #[error("Health check registered as '{registered}' reports its name as '{reported}'")]
    NameMismatch { registered: String, reported: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl IntoResponse for HealthError {
    fn into_response(self) -> Response {
        tracing::error!("Health endpoint error: {}", self);

        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let body = Json(json!({
            "error": "Internal server error",
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

/// A fault raised while evaluating a single check. The runner catches every
/// one of these at the per-check boundary and records the check as Red.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("'{target}' took more than {timeout_ms} ms to respond")]
    Timeout { target: String, timeout_ms: u64 },

    #[error("Health check run was cancelled")]
    Cancelled,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("'{url}' responded with unsuccessful status {status}")]
    UnsuccessfulStatus { url: String, status: u16 },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Health check panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Failed(#[from] anyhow::Error),

    /// The outcome of a check run once on behalf of several concurrent callers.
    #[error(transparent)]
    Shared(Arc<CheckError>),
}

impl CheckError {
    pub fn is_timeout(&self) -> bool {
        match self {
            CheckError::Timeout { .. } => true,
            CheckError::Shared(inner) => inner.is_timeout(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            CheckError::Cancelled => true,
            CheckError::Shared(inner) => inner.is_cancelled(),
            _ => false,
        }
    }
}
