//! Health check aggregation: check types, registration, execution and rollup.

pub mod builder;
pub mod cache;
pub mod check;
pub mod checks;
pub mod report;
pub mod runner;
pub mod status;


pub use builder::{CheckContext, CheckFactory, HealthCheckBuilder, HealthCheckDescriptor, HealthCheckRegistry, Lifetime};
pub use cache::HealthCheckCache;
pub use check::{HealthCheck, HealthCheckProperties, StatusCell};
pub use checks::{
    CachedHealthCheck, CachedHealthCheckProperties, DelegatingHealthCheck, HttpHealthCheck,
    HttpHealthCheckProperties, SqlHealthCheck,
};
pub use report::{DependencyReport, HealthCheckReport};
pub use runner::{ExecutionMode, HealthCheckRunner};
pub use status::{CheckStatus, GlobalStatus};
