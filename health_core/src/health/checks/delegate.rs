use crate::error::CheckError;
use crate::health::check::{HealthCheck, HealthCheckProperties, StatusCell};
use crate::health::status::CheckStatus;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub type CheckFuture = BoxFuture<'static, anyhow::Result<CheckStatus>>;

pub type CheckFn = Arc<dyn Fn(CancellationToken) -> CheckFuture + Send + Sync>;

/// Wraps an application-supplied async function. Errors returned by the
/// function propagate to the caller unchanged.
pub struct DelegatingHealthCheck {
    properties: HealthCheckProperties,
    action: CheckFn,
    status: StatusCell,
}

impl DelegatingHealthCheck {
    pub fn new<F, Fut>(properties: HealthCheckProperties, action: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<CheckStatus>> + Send + 'static,
    {
        let boxed: CheckFn =
            Arc::new(move |cancel: CancellationToken| -> CheckFuture { Box::pin(action(cancel)) });
        Self::from_fn(properties, boxed)
    }

    pub fn from_fn(properties: HealthCheckProperties, action: CheckFn) -> Self {
        Self {
            properties,
            action,
            status: StatusCell::default(),
        }
    }
}

#[async_trait::async_trait]
impl HealthCheck for DelegatingHealthCheck {
    fn name(&self) -> &str {
        self.properties.name()
    }

    fn required(&self) -> bool {
        self.properties.is_required()
    }

    fn tags(&self) -> &[String] {
        self.properties.tags()
    }

    fn status(&self) -> CheckStatus {
        self.status.get()
    }

    async fn update_status(&self, cancel: &CancellationToken) -> Result<CheckStatus, CheckError> {
        debug!(name = self.name(), "Invoking delegate health check");
        let status = (self.action)(cancel.clone()).await?;
        Ok(self.status.set(status))
    }
}
