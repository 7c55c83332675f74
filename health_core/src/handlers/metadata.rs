//! The metadata endpoint: a static dump of build and deployment information.

use super::{json_response, to_json, validate_path};
use crate::error::{HealthError, Result};
use crate::middleware::gate::BeforeInvoke;
use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_METADATA_PATH: &str = "/api/_meta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataVersion {
    pub major: u32,
    pub minor: Option<u32>,
    pub patch: Option<u32>,
    pub revision: Option<u32>,
    pub alias: Option<String>,
}

impl MetadataVersion {
    pub fn new(major: u32) -> Self {
        Self {
            major,
            minor: None,
            patch: None,
            revision: None,
            alias: None,
        }
    }

    /// Parses `major[.minor[.patch[.revision]]]` with an optional
    /// `-prerelease` or `+build` suffix. The full input is kept as the alias.
    pub fn parse(version: &str) -> Result<Self> {
        let version = version.trim();
        let core = version
            .split(|c: char| c == '-' || c == '+')
            .next()
            .unwrap_or_default();

        let mut numbers = Vec::with_capacity(4);
        for part in core.split('.') {
            let number = part.parse::<u32>().map_err(|_| {
                HealthError::InvalidConfiguration(format!("invalid version '{}'", version))
            })?;
            numbers.push(number);
        }
        if numbers.len() > 4 {
            return Err(HealthError::InvalidConfiguration(format!(
                "invalid version '{}': at most four components",
                version
            )));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers.get(1).copied(),
            patch: numbers.get(2).copied(),
            revision: numbers.get(3).copied(),
            alias: Some(version.to_string()),
        })
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataModel {
    pub name: Option<String>,
    pub environment: Option<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub version: Option<MetadataVersion>,
}

#[derive(Debug, Clone)]
pub struct MetadataOptions {
    pub path: String,
    pub indent_json: bool,
    pub include_null_properties: bool,
    pub name: Option<String>,
    pub environment: Option<String>,
    pub started_on: Option<DateTime<Utc>>,
    pub version: Option<MetadataVersion>,
    pub before_invoke: Option<BeforeInvoke>,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_METADATA_PATH.to_string(),
            indent_json: true,
            include_null_properties: false,
            name: None,
            environment: None,
            started_on: None,
            version: None,
            before_invoke: None,
        }
    }
}

impl MetadataOptions {
    pub fn model(&self) -> MetadataModel {
        MetadataModel {
            name: self.name.clone(),
            environment: self.environment.clone(),
            started_on: self.started_on,
            version: self.version.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MetadataEndpoint {
    options: Arc<MetadataOptions>,
}

impl MetadataEndpoint {
    pub fn new(options: MetadataOptions) -> Result<Self> {
        validate_path(&options.path)?;
        Ok(Self {
            options: Arc::new(options),
        })
    }

    pub fn options(&self) -> &MetadataOptions {
        &self.options
    }

    pub fn render(&self) -> Result<String> {
        let mut value = serde_json::to_value(self.options.model())?;
        if !self.options.include_null_properties {
            strip_nulls(&mut value);
        }
        to_json(&value, self.options.indent_json)
    }

    pub fn routes<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let path = self.options.path.clone();
        Router::new()
            .route(&path, get(handle_metadata))
            .with_state(self)
    }
}

pub async fn handle_metadata(
    State(endpoint): State<MetadataEndpoint>,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();

    if let Some(gate) = &endpoint.options.before_invoke {
        if let Some(rejection) = gate.check(&parts).await {
            debug!(status = rejection.status().as_u16(), "Metadata request rejected by gate");
            return rejection;
        }
    }

    match endpoint.render() {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => e.into_response(),
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}
