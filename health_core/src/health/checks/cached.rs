use crate::error::{CheckError, HealthError, Result};
use crate::health::cache::HealthCheckCache;
use crate::health::check::{HealthCheck, StatusCell};
use crate::health::status::CheckStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long a cached status stays valid, and whether failures are cached too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedHealthCheckProperties {
    expiration: Duration,
    cache_exceptions: bool,
}

impl CachedHealthCheckProperties {
    pub fn new(expiration: Duration) -> Result<Self> {
        if expiration.is_zero() {
            return Err(HealthError::InvalidConfiguration(
                "Cache expiration must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            expiration,
            cache_exceptions: false,
        })
    }

    /// Caches a failing inner check as Red instead of re-probing it on the
    /// next request.
    pub fn cache_exceptions(mut self, cache_exceptions: bool) -> Self {
        self.cache_exceptions = cache_exceptions;
        self
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn caches_exceptions(&self) -> bool {
        self.cache_exceptions
    }
}

pub struct CachedHealthCheck {
    inner: Arc<dyn HealthCheck>,
    cache: HealthCheckCache,
    properties: CachedHealthCheckProperties,
    cache_key: String,
    status: StatusCell,
}

impl CachedHealthCheck {
    pub fn new(
        inner: Arc<dyn HealthCheck>,
        cache: HealthCheckCache,
        properties: CachedHealthCheckProperties,
    ) -> Self {
        let cache_key = format!("CachedHealthCheck->{}", inner.name());
        Self {
            inner,
            cache,
            properties,
            cache_key,
            status: StatusCell::default(),
        }
    }

    pub fn cache_key(&self) -> &str {
        &self.cache_key
    }

    async fn refresh(&self, cancel: &CancellationToken) -> std::result::Result<CheckStatus, CheckError> {
        debug!(
            name = self.name(),
            expiration = ?self.properties.expiration,
            "Expired cache status, updating to the most recent status"
        );

        match self.inner.update_status(cancel).await {
            Ok(status) => Ok(status),
            Err(e) if self.properties.cache_exceptions && !e.is_cancelled() => {
                warn!(name = self.name(), error = %e, "Inner health check failed but status 'Red' will be cached");
                Ok(CheckStatus::Red)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait::async_trait]
impl HealthCheck for CachedHealthCheck {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn required(&self) -> bool {
        self.inner.required()
    }

    fn tags(&self) -> &[String] {
        self.inner.tags()
    }

    fn status(&self) -> CheckStatus {
        self.status.get()
    }

    async fn update_status(&self, cancel: &CancellationToken) -> std::result::Result<CheckStatus, CheckError> {
        let status = self
            .cache
            .get_or_populate(&self.cache_key, self.properties.expiration, || self.refresh(cancel))
            .await?;

        Ok(self.status.set(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::check::HealthCheckProperties;
    use crate::health::checks::DelegatingHealthCheck;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_check(calls: &Arc<AtomicUsize>, fail: bool) -> Arc<dyn HealthCheck> {
        let calls = Arc::clone(calls);
        let properties = HealthCheckProperties::new("db").unwrap().required(true).with_tags(["sql"]);
        Arc::new(DelegatingHealthCheck::new(properties, move |_| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                if fail {
                    anyhow::bail!("connection refused");
                }
                Ok(CheckStatus::Green)
            }
        }))
    }

    fn expiring_in(seconds: u64) -> CachedHealthCheckProperties {
        CachedHealthCheckProperties::new(Duration::from_secs(seconds)).unwrap()
    }

    #[test]
    fn test_properties_reject_zero_expiration() {
        assert!(CachedHealthCheckProperties::new(Duration::ZERO).is_err());
        let properties = expiring_in(30);
        assert!(!properties.caches_exceptions());
        assert!(properties.cache_exceptions(true).caches_exceptions());
    }

    #[test]
    fn test_cached_check_mirrors_inner_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let check = CachedHealthCheck::new(counting_check(&calls, false), HealthCheckCache::new(), expiring_in(30));

        assert_eq!(check.name(), "db");
        assert!(check.required());
        assert_eq!(check.tags(), &["sql".to_string()]);
        assert_eq!(check.cache_key(), "CachedHealthCheck->db");
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_updates_call_inner_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = HealthCheckCache::new();
        let inner = counting_check(&calls, false);
        let first = CachedHealthCheck::new(Arc::clone(&inner), cache.clone(), expiring_in(30));
        let second = CachedHealthCheck::new(inner, cache, expiring_in(30));
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(first.update_status(&cancel), second.update_status(&cancel));
        assert_eq!(a.unwrap(), CheckStatus::Green);
        assert_eq!(b.unwrap(), CheckStatus::Green);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(31)).await;
        first.update_status(&cancel).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_propagate_and_are_not_cached_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let check = CachedHealthCheck::new(counting_check(&calls, true), HealthCheckCache::new(), expiring_in(30));
        let cancel = CancellationToken::new();

        assert!(check.update_status(&cancel).await.is_err());
        assert!(check.update_status(&cancel).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failures_call_inner_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = HealthCheckCache::new();
        let inner = counting_check(&calls, true);
        let checks: Vec<_> = (0..4)
            .map(|_| CachedHealthCheck::new(Arc::clone(&inner), cache.clone(), expiring_in(30)))
            .collect();
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let results = futures::future::join_all(checks.iter().map(|check| check.update_status(&cancel))).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::from_millis(20));
        for result in results {
            assert_eq!(result.unwrap_err().to_string(), "connection refused");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_cached_as_red_when_enabled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let properties = expiring_in(30).cache_exceptions(true);
        let check = CachedHealthCheck::new(counting_check(&calls, true), HealthCheckCache::new(), properties);
        let cancel = CancellationToken::new();

        assert_eq!(check.update_status(&cancel).await.unwrap(), CheckStatus::Red);
        assert_eq!(check.update_status(&cancel).await.unwrap(), CheckStatus::Red);
        assert_eq!(check.status(), CheckStatus::Red);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
