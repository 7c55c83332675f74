//! Request gates and the request tracing layer

pub mod gate;
pub mod insights;
pub mod logging;

pub use gate::BeforeInvoke;
pub use insights::{LastRequest, RequestInsights};
pub use logging::logging_layer;
