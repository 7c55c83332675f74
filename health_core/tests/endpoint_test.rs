use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    routing::get,
    Router,
};
use health_core::{
    config::{CheckConfig, HttpCheckConfig, SqlCheckConfig},
    create_app, AppConfig, BeforeInvoke, CheckContext, CheckStatus, HealthCheckEndpoint,
    HealthCheckProperties, MetadataEndpoint, MetadataOptions, MetadataVersion,
};
use serde_json::Value;
use std::net::SocketAddr;
use tempfile::NamedTempFile;
use tower::ServiceExt;

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http_check(name: &str, url: String, required: bool) -> CheckConfig {
    CheckConfig::Http(HttpCheckConfig {
        name: name.to_string(),
        url,
        timeout_ms: 2000,
        ensure_success: true,
        required,
        tags: vec!["upstream".to_string()],
        cache_seconds: None,
    })
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_configured_checks_through_router() {
    let upstream = spawn_upstream().await;
    let database = NamedTempFile::new().unwrap();

    let config = AppConfig {
        checks: vec![
            http_check("payments", format!("http://{}/ok", upstream), true),
            http_check("search", format!("http://{}/down", upstream), false),
            CheckConfig::Sql(SqlCheckConfig {
                name: "orders-db".to_string(),
                url: format!("sqlite:{}", database.path().display()),
                sql: None,
                required: true,
                tags: vec![],
                cache_seconds: Some(60),
            }),
        ],
        ..AppConfig::default()
    };
    config.validate().unwrap();

    let builder = config.health_check_builder().unwrap();
    let health = HealthCheckEndpoint::new(builder.build(), CheckContext::new(), config.health.options()).unwrap();
    let metadata = MetadataEndpoint::new(MetadataOptions {
        name: Some("orders".to_string()),
        version: Some(MetadataVersion::parse("0.3.1").unwrap()),
        ..MetadataOptions::default()
    })
    .unwrap();
    let app = create_app(health, Some(metadata)).unwrap();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/_health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "Yellow");
    assert_eq!(json["dependencies"]["payments"]["status"], "Green");
    assert_eq!(json["dependencies"]["search"]["status"], "Red");
    assert_eq!(json["dependencies"]["orders-db"]["status"], "Green");
    assert_eq!(json["dependencies"]["payments"]["tags"], serde_json::json!(["upstream", "http"]));

    let response = app
        .oneshot(Request::builder().uri("/api/_meta").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["name"], "orders");
    assert_eq!(json["version"]["minor"], 3);
}

#[tokio::test]
async fn test_required_upstream_down_returns_500() {
    let upstream = spawn_upstream().await;
    let config = AppConfig {
        checks: vec![http_check("payments", format!("http://{}/down", upstream), true)],
        ..AppConfig::default()
    };

    let health = HealthCheckEndpoint::new(
        config.health_check_builder().unwrap().build(),
        CheckContext::new(),
        config.health.options(),
    )
    .unwrap();

    let response = create_app(health, None)
        .unwrap()
        .oneshot(Request::builder().uri("/api/_health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["status"], "Red");
}

#[tokio::test]
async fn test_served_app_with_local_gate() {
    let builder = health_core::HealthCheckBuilder::new()
        .add_delegate(HealthCheckProperties::new("self").unwrap(), |_| async {
            Ok(CheckStatus::Green)
        })
        .unwrap();
    let mut options = AppConfig::default().health.options();
    options.before_invoke = Some(BeforeInvoke::local_only());
    let health = HealthCheckEndpoint::new(builder.build(), CheckContext::new(), options).unwrap();

    let app = create_app(health, None).unwrap().into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let response = reqwest::get(format!("http://{}/api/_health", addr)).await.unwrap();

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/json; charset=utf-8"
    );
    let json: Value = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(json["status"], "Green");
    assert_eq!(json["dependencies"]["self"]["status"], "Green");
}
