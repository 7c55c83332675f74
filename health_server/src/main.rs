//! Main entry point for the health server binary

use anyhow::Result;
use health_core::handlers::MetadataVersion;
use health_core::{
    create_app_with_insights, run_server, AppConfig, CheckContext, CheckStatus, HealthCheckEndpoint,
    HealthCheckProperties, MetadataEndpoint,
};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::load()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", config.bind_address());

    let addr: SocketAddr = config.bind_address().parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address: {}", e))?;

    let started_on = chrono::Utc::now();
    let version = MetadataVersion::parse(env!("CARGO_PKG_VERSION")).ok();

    let builder = config
        .health_check_builder()?
        .add_delegate(HealthCheckProperties::new("self")?, |_| async {
            Ok(CheckStatus::Green)
        })?;

    info!(
        "Registered {} health checks: {}",
        builder.len(),
        builder.descriptors().iter().map(|d| d.name()).collect::<Vec<_>>().join(", ")
    );

    let health = HealthCheckEndpoint::new(builder.build(), CheckContext::new(), config.health.options())?;
    let metadata = MetadataEndpoint::new(config.metadata.options(started_on, version))?;

    info!("Health endpoint mounted at {}", config.health.path);
    info!("Metadata endpoint mounted at {}", config.metadata.path);

    let insights = config.insights.insights();
    if let Some(insights) = &insights {
        info!("Request insights mounted at {}", insights.path());
    }

    let app = create_app_with_insights(health, Some(metadata), insights)?;

    run_server(app, addr).await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            let default_level = if cfg!(debug_assertions) {
                "debug"
            } else {
                "info"
            };

            format!(
                "{}={level},health_core={level},tower_http=info",
                env!("CARGO_CRATE_NAME").replace('-', "_"),
                level = default_level
            ).into()
        });

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let is_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    if is_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer.pretty())
            .init();
    }
}
