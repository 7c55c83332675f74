//! Runs a set of checks and rolls their outcomes up into one report.

use crate::error::CheckError;
use crate::health::check::HealthCheck;
use crate::health::report::{DependencyReport, HealthCheckReport};
use crate::health::status::CheckStatus;
use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One task per check, all joined before the rollup.
    #[default]
    Parallel,
    /// Checks run one after the other, in registration order.
    Sequential,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthCheckRunner {
    mode: ExecutionMode,
}

impl HealthCheckRunner {
    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn parallel() -> Self {
        Self::new(ExecutionMode::Parallel)
    }

    pub fn sequential() -> Self {
        Self::new(ExecutionMode::Sequential)
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Runs every check to completion and returns the composite report.
    /// Never fails: each check's faults are contained and recorded as Red.
    pub async fn run(
        &self,
        checks: Vec<Arc<dyn HealthCheck>>,
        cancel: &CancellationToken,
    ) -> HealthCheckReport {
        let mut report = HealthCheckReport::new(Utc::now());
        let total = checks.len();

        match self.mode {
            ExecutionMode::Sequential => {
                debug!("Running {} health checks sequentially", total);
                for check in checks {
                    let status = evaluate(&check, cancel).await;
                    record(&mut report, check.as_ref(), status);
                }
            }
            ExecutionMode::Parallel => {
                debug!("Running {} health checks in parallel", total);
                let tasks: Vec<_> = checks
                    .iter()
                    .map(|check| {
                        let check = Arc::clone(check);
                        let cancel = cancel.clone();
                        tokio::spawn(async move { evaluate(&check, &cancel).await })
                    })
                    .collect();

                let results = futures::future::join_all(tasks).await;

                for (check, joined) in checks.iter().zip(results) {
                    let status = joined.unwrap_or_else(|e| {
                        error!(name = check.name(), error = %e, "Health check task failed");
                        CheckStatus::Red
                    });
                    record(&mut report, check.as_ref(), status);
                }
            }
        }

        let report = report.finish(Utc::now());
        info!(
            "Health check run completed - {} checks, overall status: {}",
            total, report.status
        );
        report
    }
}

fn record(report: &mut HealthCheckReport, check: &dyn HealthCheck, status: CheckStatus) {
    let dependency = DependencyReport {
        status,
        required: check.required(),
        tags: check.tags().to_vec(),
    };

    if report.add_dependency(check.name().to_string(), dependency) {
        warn!(name = check.name(), "Duplicate health check name, previous result overwritten");
    }
}

/// The isolation boundary: errors, panics and cancellation all become Red.
async fn evaluate(check: &Arc<dyn HealthCheck>, cancel: &CancellationToken) -> CheckStatus {
    let span = info_span!("health_check", name = check.name());

    async move {
        debug!("Performing an health check");
        let start = Instant::now();

        let update = AssertUnwindSafe(check.update_status(cancel)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CheckError::Cancelled),
            caught = update => caught.unwrap_or_else(|panic| Err(CheckError::Panicked(panic_message(panic)))),
        };

        let elapsed = start.elapsed();
        match outcome {
            Ok(CheckStatus::Green) => {
                debug!("Health check passed in {:?}", elapsed);
                CheckStatus::Green
            }
            Ok(CheckStatus::Red) => {
                warn!("Health check reported Red in {:?}", elapsed);
                CheckStatus::Red
            }
            Err(CheckError::Cancelled) => {
                warn!("Health check cancelled after {:?}", elapsed);
                CheckStatus::Red
            }
            Err(e) => {
                error!(error = %e, "Health check failed in {:?}", elapsed);
                CheckStatus::Red
            }
        }
    }
    .instrument(span)
    .await
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
