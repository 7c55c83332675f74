//! Reduced request insights: remembers the last request served and exposes
//! it as JSON on its own path.

use crate::handlers::{json_response, to_json};
use axum::{
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self as axum_middleware, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;

pub const DEFAULT_INSIGHTS_PATH: &str = "/api/_insights";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRequest {
    /// `METHOD->path`
    pub key: String,
    pub status_code: u16,
    pub elapsed_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InsightsModel {
    last_request: Option<LastRequest>,
}

#[derive(Debug, Clone)]
pub struct RequestInsights {
    path: Arc<str>,
    last_request: Arc<Mutex<Option<LastRequest>>>,
}

impl Default for RequestInsights {
    fn default() -> Self {
        Self::new(DEFAULT_INSIGHTS_PATH)
    }
}

impl RequestInsights {
    /// A blank path maps to `/`; a missing leading slash is added.
    pub fn new(path: &str) -> Self {
        let path = path.trim();
        let path = if path.is_empty() {
            "/".to_string()
        } else if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        Self {
            path: path.into(),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn last_request(&self) -> Option<LastRequest> {
        self.last_request.lock().clone()
    }

    fn record(&self, last_request: LastRequest) {
        *self.last_request.lock() = Some(last_request);
    }

    /// Routes serving the insights document.
    pub fn routes<S>(self) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let path = self.path.to_string();
        Router::new()
            .route(&path, get(handle_insights))
            .with_state(self)
    }

    /// Applies the recording middleware to `router`.
    pub fn record_requests<S>(self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.layer(axum_middleware::from_fn_with_state(self, record_request))
    }
}

pub async fn handle_insights(State(insights): State<RequestInsights>) -> Response {
    let model = InsightsModel {
        last_request: insights.last_request(),
    };

    match to_json(&model, false) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => e.into_response(),
    }
}

pub async fn record_request(
    State(insights): State<RequestInsights>,
    request: Request,
    next: Next,
) -> Response {
    if request.method() == Method::GET && request.uri().path() == insights.path() {
        return next.run(request).await;
    }

    let key = format!("{}->{}", request.method(), request.uri().path());
    let start = Instant::now();

    let response = next.run(request).await;

    insights.record(LastRequest {
        key,
        status_code: response.status().as_u16(),
        elapsed_ms: start.elapsed().as_millis() as u64,
    });

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app(insights: RequestInsights) -> Router {
        let router = Router::new()
            .route("/orders", get(|| async { "orders" }).post(|| async { StatusCode::CREATED }))
            .merge(insights.clone().routes::<()>());
        insights.record_requests(router)
    }

    async fn call(app: &Router, method: Method, path: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().method(method).uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(RequestInsights::new("").path(), "/");
        assert_eq!(RequestInsights::new("   ").path(), "/");
        assert_eq!(RequestInsights::new("insights").path(), "/insights");
        assert_eq!(RequestInsights::new("/insights").path(), "/insights");
        assert_eq!(RequestInsights::default().path(), DEFAULT_INSIGHTS_PATH);
    }

    #[tokio::test]
    async fn test_no_request_yet() {
        let app = app(RequestInsights::default());

        let (status, json) = call(&app, Method::GET, DEFAULT_INSIGHTS_PATH).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({ "lastRequest": null }));
    }

    #[tokio::test]
    async fn test_last_request_is_reported() {
        let insights = RequestInsights::new("insights");
        let app = app(insights.clone());

        call(&app, Method::GET, "/orders").await;
        call(&app, Method::POST, "/orders").await;
        let (status, json) = call(&app, Method::GET, "/insights").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["lastRequest"]["key"], "POST->/orders");
        assert_eq!(json["lastRequest"]["statusCode"], 201);
        assert!(json["lastRequest"]["elapsedMs"].is_u64());

        // Reading the insights does not overwrite them.
        let last = insights.last_request().unwrap();
        assert_eq!(last.key, "POST->/orders");
    }

    #[tokio::test]
    async fn test_rejected_methods_are_recorded() {
        let insights = RequestInsights::default();
        let app = app(insights.clone());

        let (status, _) = call(&app, Method::GET, "/orders").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(insights.last_request().unwrap().status_code, 200);

        call(&app, Method::DELETE, "/orders").await;
        let last = insights.last_request().unwrap();
        assert_eq!(last.key, "DELETE->/orders");
        assert_eq!(last.status_code, 405);
    }
}
