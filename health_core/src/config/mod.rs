//! Layered application configuration

pub mod settings;

pub use settings::{
    AppConfig, CheckConfig, HealthConfig, HttpCheckConfig, MetadataConfig, ServerConfig,
    SqlCheckConfig,
};
