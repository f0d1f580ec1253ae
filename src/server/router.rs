//! Axum router configuration

use super::control::{git_operation, meta, tmp_get, tmp_put, webhook_register, webhook_signal};
use super::files::dispatch;
use super::AppState;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get, post};
use axum::Router;
use std::time::Instant;
use tracing::info;

const CORS_HEADERS: [(&str, &str); 4] = [
    ("access-control-allow-origin", "*"),
    ("access-control-request-method", "*"),
    ("access-control-allow-methods", "OPTIONS, GET, DELETE, PUT, MKCOL, POST"),
    ("access-control-allow-headers", "*"),
];

/// Build the complete router
///
/// Routes:
/// - `GET|PUT  /_tmp/{*name}`
/// - `GET      /_webhook/register`
/// - `PUT|POST /_webhook/signal`
/// - `*        /_git/{operation}`
/// - `*        /_meta/{*command}`
/// - anything else is a file request
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_body_bytes;
    Router::new()
        .route("/_tmp/{*name}", get(tmp_get).put(tmp_put))
        .route("/_webhook/register", get(webhook_register))
        .route("/_webhook/signal", post(webhook_signal).put(webhook_signal))
        .route("/_git/{operation}", any(git_operation))
        .route("/_meta/{*command}", any(meta))
        .fallback(dispatch)
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn(log_request))
        .layer(middleware::map_response(add_cors_headers))
}

async fn add_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    for (name, value) in CORS_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
    response
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let started = Instant::now();

    let response = next.run(request).await;
    info!(
        method = %method,
        path = %uri.path(),
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
