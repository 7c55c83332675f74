//! Pre-invoke gates: decision functions run before an endpoint does any work.
//! A gate returning a response short-circuits the request.

use axum::{
    extract::ConnectInfo,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

pub type GateFuture = BoxFuture<'static, Option<Response>>;

#[derive(Clone)]
pub struct BeforeInvoke(Arc<dyn Fn(&Parts) -> GateFuture + Send + Sync>);

impl std::fmt::Debug for BeforeInvoke {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BeforeInvoke")
    }
}

impl BeforeInvoke {
    /// `f` inspects the request and returns `Some(response)` to reject it.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(&Parts) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Response>> + Send + 'static,
    {
        Self(Arc::new(move |parts: &Parts| -> GateFuture { Box::pin(f(parts)) }))
    }

    pub async fn check(&self, parts: &Parts) -> Option<Response> {
        (self.0)(parts).await
    }

    /// Only loopback peers pass; everyone else gets 403.
    pub fn local_only() -> Self {
        Self::new(|parts: &Parts| {
            let rejection = (!is_local(parts)).then(forbidden);
            async move { rejection }
        })
    }

    /// Delegates authentication to `resolve_roles`, which returns the caller's
    /// roles or `None` when unauthenticated. Unauthenticated callers get 401,
    /// callers without any of `roles` get 403.
    pub fn has_any_role<R, I, T>(resolve_roles: R, roles: I) -> Self
    where
        R: Fn(&Parts) -> Option<Vec<String>> + Send + Sync + 'static,
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let allowed: HashSet<String> = roles.into_iter().map(Into::into).collect();

        Self::new(move |parts: &Parts| {
            let rejection = match resolve_roles(parts) {
                None => Some(unauthorized()),
                Some(caller) if caller.iter().any(|role| allowed.contains(role)) => None,
                Some(_) => Some(forbidden()),
            };
            async move { rejection }
        })
    }

    /// Local peers pass straight through; others are handed to `gate`.
    pub fn local_or(gate: BeforeInvoke) -> Self {
        Self::new(move |parts: &Parts| {
            let pending = (!is_local(parts)).then(|| (gate.0)(parts));
            async move {
                match pending {
                    Some(check) => check.await,
                    None => None,
                }
            }
        })
    }
}

/// Requests without peer information (in-process calls) count as local.
fn is_local(parts: &Parts) -> bool {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().is_loopback())
        .unwrap_or(true)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}
