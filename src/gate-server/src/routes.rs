//! Route definitions for the gate server
//!
//! Middleware order, outermost first: tracing, panic recovery, request ID,
//! request logging, clearance enforcement.

use crate::{handlers, middleware, state::AppState};
use axum::{
    middleware as axum_middleware,
    routing::{any, get},
    Router,
};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let routes = Router::new()
        .route("/", get(handlers::root))
        .route("/api/public", any(handlers::public))
        .route("/api/restricted", any(handlers::restricted))
        .route("/api/device-only", any(handlers::device_only))
        .route("/api/device/status", any(handlers::device_status))
        .route("/api/high-security", any(handlers::high_security));

    with_middleware(routes, state)
}

/// Wrap routes in the gate server's middleware stack
pub fn with_middleware(routes: Router<AppState>, state: AppState) -> Router {
    routes
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::clearance_middleware,
        ))
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(CatchPanicLayer::custom(middleware::recover_panic))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
