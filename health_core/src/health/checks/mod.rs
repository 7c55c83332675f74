//! Check implementations: delegate, SQL, HTTP and the caching decorator.

pub mod cached;
pub mod delegate;
pub mod http;
pub mod sql;

pub use cached::{CachedHealthCheck, CachedHealthCheckProperties};
pub use delegate::{CheckFn, CheckFuture, DelegatingHealthCheck};
pub use http::{HttpHealthCheck, HttpHealthCheckProperties};
pub use sql::{ConnectionFactory, ConnectionFuture, SqlHealthCheck};
