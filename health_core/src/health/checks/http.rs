use crate::error::{CheckError, HealthError, Result};
use crate::health::check::{HealthCheck, HealthCheckProperties, StatusCell};
use crate::health::status::CheckStatus;
use reqwest::{Client, Url};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

pub const HTTP_TAG: &str = "http";

/// Endpoint and request policy for an HTTP check.
#[derive(Debug, Clone)]
pub struct HttpHealthCheckProperties {
    properties: HealthCheckProperties,
    url: Url,
    timeout: Duration,
    ensure_successful_status: bool,
}

impl HttpHealthCheckProperties {
    pub fn new(mut properties: HealthCheckProperties, url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| HealthError::InvalidUrl {
            name: properties.name().to_string(),
            reason: e.to_string(),
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(HealthError::InvalidUrl {
                name: properties.name().to_string(),
                reason: format!("unsupported scheme '{}'", url.scheme()),
            });
        }

        properties.push_tag(HTTP_TAG);

        Ok(Self {
            properties,
            url,
            timeout: DEFAULT_TIMEOUT,
            ensure_successful_status: true,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        if timeout.is_zero() {
            return Err(HealthError::InvalidConfiguration(format!(
                "Timeout of health check '{}' must be greater than 0",
                self.properties.name()
            )));
        }
        self.timeout = timeout;
        Ok(self)
    }

    pub fn ensure_successful_status(mut self, ensure: bool) -> Self {
        self.ensure_successful_status = ensure;
        self
    }

    pub fn name(&self) -> &str {
        self.properties.name()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Issues a GET against the configured URL with its own timeout. The timeout
/// elapsing is reported as [`CheckError::Timeout`]; the run being cancelled
/// is reported as [`CheckError::Cancelled`].
pub struct HttpHealthCheck {
    properties: HttpHealthCheckProperties,
    client: Client,
    status: StatusCell,
}

impl HttpHealthCheck {
    pub fn new(properties: HttpHealthCheckProperties, client: Client) -> Self {
        Self {
            properties,
            client,
            status: StatusCell::default(),
        }
    }

    async fn request_endpoint(&self) -> std::result::Result<CheckStatus, CheckError> {
        let url = &self.properties.url;

        let response = tokio::time::timeout(self.properties.timeout, self.client.get(url.clone()).send())
            .await
            .map_err(|_| CheckError::Timeout {
                target: url.to_string(),
                timeout_ms: self.properties.timeout.as_millis() as u64,
            })??;

        let status = response.status();
        debug!(name = self.name(), %url, status = status.as_u16(), "Endpoint responded");

        if self.properties.ensure_successful_status && !status.is_success() {
            return Err(CheckError::UnsuccessfulStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(CheckStatus::Green)
    }
}

#[async_trait::async_trait]
impl HealthCheck for HttpHealthCheck {
    fn name(&self) -> &str {
        self.properties.name()
    }

    fn required(&self) -> bool {
        self.properties.properties.is_required()
    }

    fn tags(&self) -> &[String] {
        self.properties.properties.tags()
    }

    fn status(&self) -> CheckStatus {
        self.status.get()
    }

    async fn update_status(&self, cancel: &CancellationToken) -> std::result::Result<CheckStatus, CheckError> {
        debug!(name = self.name(), url = %self.properties.url, "Performing health check");

        let status = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CheckError::Cancelled),
            outcome = self.request_endpoint() => outcome?,
        };

        Ok(self.status.set(status))
    }
}
