//! HTTP endpoint adapters for the health and metadata endpoints

pub mod health;
pub mod metadata;

pub use health::{BeforeSerialization, HealthCheckEndpoint, HealthCheckOptions};
pub use metadata::{MetadataEndpoint, MetadataModel, MetadataOptions, MetadataVersion};

use crate::error::{HealthError, Result};
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T, indent: bool) -> Result<String> {
    let body = if indent {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    Ok(body)
}

pub(crate) fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))],
        body,
    )
        .into_response()
}

pub(crate) fn validate_path(path: &str) -> Result<()> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(HealthError::InvalidConfiguration(format!(
            "endpoint path '{}' must start with '/'",
            path
        )));
    }
    Ok(())
}
