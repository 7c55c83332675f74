//! Health check aggregation and metadata endpoints for axum applications.

pub mod config;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;

pub use config::AppConfig;
pub use error::{CheckError, HealthError, Result};
pub use handlers::{HealthCheckEndpoint, HealthCheckOptions, MetadataEndpoint, MetadataOptions, MetadataVersion};
pub use health::{
    CheckContext, CheckStatus, GlobalStatus, HealthCheck, HealthCheckBuilder, HealthCheckProperties,
    HealthCheckRegistry, HealthCheckReport, HealthCheckRunner,
};
pub use middleware::{BeforeInvoke, RequestInsights};

use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};

/// Mounts the health endpoint and, when given, the metadata endpoint, with
/// request tracing on top.
pub fn create_app(health: HealthCheckEndpoint, metadata: Option<MetadataEndpoint>) -> Result<Router> {
    create_app_with_insights(health, metadata, None)
}

/// Like [`create_app`], additionally recording every request into `insights`
/// and serving them on the insights path.
pub fn create_app_with_insights(
    health: HealthCheckEndpoint,
    metadata: Option<MetadataEndpoint>,
    insights: Option<RequestInsights>,
) -> Result<Router> {
    let mut paths = vec![("health", health.options().path.clone())];
    if let Some(metadata) = &metadata {
        paths.push(("metadata", metadata.options().path.clone()));
    }
    if let Some(insights) = &insights {
        paths.push(("insights", insights.path().to_string()));
    }
    for (i, (name, path)) in paths.iter().enumerate() {
        if let Some((other, _)) = paths[..i].iter().find(|(_, earlier)| earlier == path) {
            return Err(HealthError::InvalidConfiguration(format!(
                "{} and {} endpoints cannot share the path '{}'",
                other, name, path
            )));
        }
    }

    let mut router = Router::new().merge(health.routes::<()>());

    if let Some(metadata) = metadata {
        router = router.merge(metadata.routes::<()>());
    }

    if let Some(insights) = insights {
        router = router.merge(insights.clone().routes::<()>());
        router = insights.record_requests(router);
    }

    Ok(router.layer(middleware::logging::logging_layer()))
}

pub async fn run_server(app: Router, addr: SocketAddr) -> Result<()> {
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Peer addresses feed the local-only gate.
    let app = app.into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
