//! Request tracing for the mounted endpoints

use http::{Request, Response};
use std::time::Duration;
use tower_http::classify::{ServerErrorsAsFailures, ServerErrorsFailureClass, SharedClassifier};
use tower_http::trace::{
    DefaultOnBodyChunk, DefaultOnEos, MakeSpan, OnFailure, OnRequest, OnResponse, TraceLayer,
};
use tracing::{info_span, Span};

pub type RequestTraceLayer = TraceLayer<
    SharedClassifier<ServerErrorsAsFailures>,
    RequestSpan,
    RequestStarted,
    ResponseLogged,
    DefaultOnBodyChunk,
    DefaultOnEos,
    FailureLogged,
>;

pub fn logging_layer() -> RequestTraceLayer {
    TraceLayer::new_for_http()
        .make_span_with(RequestSpan)
        .on_request(RequestStarted)
        .on_response(ResponseLogged)
        .on_failure(FailureLogged)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestSpan;

impl<B> MakeSpan<B> for RequestSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        info_span!(
            "http_request",
            method = %request.method(),
            path = %request.uri().path(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestStarted;

impl<B> OnRequest<B> for RequestStarted {
    fn on_request(&mut self, request: &Request<B>, _span: &Span) {
        tracing::debug!("started {} {}", request.method(), request.uri().path());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseLogged;

impl<B> OnResponse<B> for ResponseLogged {
    fn on_response(self, response: &Response<B>, latency: Duration, _span: &Span) {
        let status = response.status();
        let latency_ms = latency.as_millis();

        // 500 on the health path means "required dependency down", not a server fault.
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), latency_ms, "responded with server error");
        } else if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), latency_ms, "request rejected");
        } else {
            tracing::info!(status = status.as_u16(), latency_ms, "request completed");
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FailureLogged;

impl OnFailure<ServerErrorsFailureClass> for FailureLogged {
    fn on_failure(&mut self, failure: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
        tracing::debug!(latency_ms = latency.as_millis(), error = ?failure, "request classified as failure");
    }
}
