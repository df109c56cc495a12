//! Middleware layer for the gate server
//!
//! - Request ID tracking
//! - Request logging
//! - Panic recovery
//! - Clearance enforcement through [`ClearanceGate`](clearance_authz::ClearanceGate)

use crate::{error::ApiError, state::AppState};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use clearance_authz::gate::{HEADER_CLEARANCE, HEADER_DEVICE_ID, HEADER_LAYER, HEADER_TOKEN_ID};
use clearance_authz::{GateOutcome, RequestAttributes};
use std::any::Any;
use std::net::SocketAddr;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Request ID header name
pub const X_REQUEST_ID: &str = "x-request-id";

/// Correlation ID of the current request, stored in request extensions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Request ID middleware
///
/// Reuses a non-empty inbound `X-Request-ID` or generates one, and echoes
/// it on the response.
pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }

    response
}

/// Request logging middleware
///
/// Logs request start and completion; the completion level follows the
/// response status.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request_id_of(&request);

    info!(
        request_id = %request_id,
        method = %method,
        uri = %uri,
        "Request started"
    );

    let start = std::time::Instant::now();
    let response = next.run(request).await;
    let elapsed = start.elapsed();

    let status = response.status().as_u16();
    let duration_ms = elapsed.as_millis() as u64;

    match status {
        500..=599 => error!(
            request_id = %request_id, method = %method, uri = %uri,
            status, duration_ms, "Request completed"
        ),
        400..=499 => warn!(
            request_id = %request_id, method = %method, uri = %uri,
            status, duration_ms, "Request completed"
        ),
        _ => info!(
            request_id = %request_id, method = %method, uri = %uri,
            status, duration_ms, "Request completed"
        ),
    }

    response
}

/// Response for a panicking handler, installed through `CatchPanicLayer`
///
/// Logs the panic message and answers 500 with a JSON error body.
pub fn recover_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    error!(panic = %message, "Panic recovered");
    ApiError::Internal(message).into_response()
}

/// Clearance enforcement middleware
///
/// Runs the gate over the request's identity headers. On pass the resolved
/// [`ClearanceContext`](clearance_authz::ClearanceContext) is added to the
/// request extensions; on rejection a JSON `{error, reason}` body is
/// returned with 401 or 403.
pub async fn clearance_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let attributes = request_attributes(&request);

    match state.gate.check(&attributes) {
        GateOutcome::Pass(ctx) => {
            request.extensions_mut().insert(ctx);
            next.run(request).await
        }
        GateOutcome::Reject(rejection) => ApiError::Rejected(rejection).into_response(),
    }
}

/// Extract gate attributes from an HTTP request
pub fn request_attributes(request: &Request) -> RequestAttributes {
    let headers = request.headers();
    let uri = request.uri();

    RequestAttributes {
        method: request.method().as_str().to_string(),
        route: uri.path().to_string(),
        resource: uri
            .path_and_query()
            .map_or_else(|| uri.path().to_string(), |pq| pq.as_str().to_string()),
        device_id: header(headers, HEADER_DEVICE_ID),
        layer: header(headers, HEADER_LAYER),
        clearance: header(headers, HEADER_CLEARANCE),
        token_id: header(headers, HEADER_TOKEN_ID),
        request_id: request.extensions().get::<RequestId>().map(|id| id.0.clone()),
        source_ip: request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string()),
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
}

fn request_id_of(request: &Request) -> String {
    request
        .extensions()
        .get::<RequestId>()
        .map_or_else(|| "-".to_string(), |id| id.0.clone())
}
