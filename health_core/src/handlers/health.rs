//! The health endpoint: gate, run, hook, encode.

use super::{json_response, to_json, validate_path};
use crate::error::Result;
use crate::health::{ExecutionMode, HealthCheckReport, HealthCheckRegistry, HealthCheckRunner, CheckContext};
use crate::middleware::gate::BeforeInvoke;
use axum::{
    extract::{Request, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_HEALTH_PATH: &str = "/api/_health";

/// Async hook applied to the report after the run and before encoding.
pub type BeforeSerialization =
    Arc<dyn Fn(&Parts, HealthCheckReport) -> BoxFuture<'static, HealthCheckReport> + Send + Sync>;

#[derive(Clone)]
pub struct HealthCheckOptions {
    pub path: String,
    pub indent_json: bool,
    pub string_enum: bool,
    pub parallel_execution: bool,
    pub before_invoke: Option<BeforeInvoke>,
    pub before_serialization: Option<BeforeSerialization>,
}

impl Default for HealthCheckOptions {
    fn default() -> Self {
        Self {
            path: DEFAULT_HEALTH_PATH.to_string(),
            indent_json: true,
            string_enum: true,
            parallel_execution: true,
            before_invoke: None,
            before_serialization: None,
        }
    }
}

impl std::fmt::Debug for HealthCheckOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckOptions")
            .field("path", &self.path)
            .field("indent_json", &self.indent_json)
            .field("string_enum", &self.string_enum)
            .field("parallel_execution", &self.parallel_execution)
            .field("before_invoke", &self.before_invoke.is_some())
            .field("before_serialization", &self.before_serialization.is_some())
            .finish()
    }
}

impl HealthCheckOptions {
    pub fn with_before_invoke(mut self, gate: BeforeInvoke) -> Self {
        self.before_invoke = Some(gate);
        self
    }

    pub fn with_before_serialization<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(&Parts, HealthCheckReport) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HealthCheckReport> + Send + 'static,
    {
        let hook: BeforeSerialization = Arc::new(
            move |parts: &Parts, report: HealthCheckReport| -> BoxFuture<'static, HealthCheckReport> {
                Box::pin(hook(parts, report))
            },
        );
        self.before_serialization = Some(hook);
        self
    }

    fn runner(&self) -> HealthCheckRunner {
        if self.parallel_execution {
            HealthCheckRunner::new(ExecutionMode::Parallel)
        } else {
            HealthCheckRunner::new(ExecutionMode::Sequential)
        }
    }
}

#[derive(Clone)]
pub struct HealthCheckEndpoint {
    registry: Arc<HealthCheckRegistry>,
    context: CheckContext,
    options: Arc<HealthCheckOptions>,
}

impl HealthCheckEndpoint {
    pub fn new(
        registry: HealthCheckRegistry,
        context: CheckContext,
        options: HealthCheckOptions,
    ) -> Result<Self> {
        validate_path(&options.path)?;

        Ok(Self {
            registry: Arc::new(registry),
            context,
            options: Arc::new(options),
        })
    }

    pub fn options(&self) -> &HealthCheckOptions {
        &self.options
    }

    /// Resolves the registered checks and runs them once.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<HealthCheckReport> {
        let checks = self.registry.resolve(&self.context)?;
        Ok(self.options.runner().run(checks, cancel).await)
    }

    /// Serves one request against an externally owned cancellation token.
    pub async fn respond(&self, parts: &Parts, cancel: &CancellationToken) -> Response {
        if let Some(gate) = &self.options.before_invoke {
            if let Some(rejection) = gate.check(parts).await {
                debug!(status = rejection.status().as_u16(), "Health request rejected by gate");
                return rejection;
            }
        }

        if cancel.is_cancelled() {
            warn!("Health request aborted before checks started");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }

        debug!("Checking all health checks");
        let mut report = match self.run(cancel).await {
            Ok(report) => report,
            Err(e) => return e.into_response(),
        };

        if let Some(hook) = &self.options.before_serialization {
            report = hook(parts, report).await;
        }

        let status = if report.is_serving() {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };

        match render_report(&report, self.options.indent_json, self.options.string_enum) {
            Ok(body) => json_response(status, body),
            Err(e) => e.into_response(),
        }
    }

    pub fn routes<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let path = self.options.path.clone();
        Router::new()
            .route(&path, get(handle_health))
            .with_state(self)
    }
}

pub async fn handle_health(
    State(endpoint): State<HealthCheckEndpoint>,
    request: Request,
) -> Response {
    let (parts, _body) = request.into_parts();

    // Dropping this handler (client went away) cancels every in-flight check.
    let cancel = CancellationToken::new();
    let _abort_on_drop = cancel.clone().drop_guard();

    endpoint.respond(&parts, &cancel).await
}

/// Encodes a report, rendering statuses as names or as ordinals.
pub fn render_report(report: &HealthCheckReport, indent: bool, string_enum: bool) -> Result<String> {
    if string_enum {
        return to_json(report, indent);
    }

    let mut value = serde_json::to_value(report)?;
    value["status"] = json!(report.status.ordinal());
    if let Value::Object(dependencies) = &mut value["dependencies"] {
        for (name, dependency) in &report.dependencies {
            if let Some(entry) = dependencies.get_mut(name) {
                entry["status"] = json!(dependency.status.ordinal());
            }
        }
    }

    to_json(&value, indent)
}
