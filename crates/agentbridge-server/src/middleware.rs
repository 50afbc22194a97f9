//! HTTP-layer tracing. The WebSocket upgrade itself is one request; once
//! `ws::upgrade` hands off to `handle_socket` every frame is logged at the
//! connection/message granularity instead, so this middleware only needs to
//! cover the upgrade request and the plain `/healthz` probe.

use std::time::Instant;

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;

pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis();
    if status.is_server_error() {
        tracing::error!(%method, %uri, %status, elapsed_ms, "request failed");
    } else {
        tracing::debug!(%method, %uri, %status, elapsed_ms, "request completed");
    }
    response
}
