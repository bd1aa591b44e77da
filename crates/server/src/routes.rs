//! Route configuration.

use crate::error::ErrorResponse;
use crate::handlers;
use crate::state::AppState;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;

/// Extra request-body allowance over the chunk size for HTTP framing.
const CHUNK_BODY_SLACK: usize = 1024;

/// Admission gate keyed by client address. The policy behind it is
/// pluggable; the default admits everything.
async fn admission_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    if !state.admission.allow(&key) {
        let body = ErrorResponse {
            code: "admission_denied".to_string(),
            message: "request rejected by admission control".to_string(),
        };
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }
    next.run(req).await
}

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.config.server.max_chunk_size)
        .unwrap_or(usize::MAX)
        .saturating_add(CHUNK_BODY_SLACK);

    Router::new()
        // Health check (intentionally unauthenticated for probes)
        .route("/v1/health", get(handlers::health_check))
        // Session control plane
        .route("/v1/sessions", post(handlers::open_session).get(handlers::list_sessions))
        .route(
            "/v1/sessions/{session_id}",
            get(handlers::get_session).delete(handlers::delete_session),
        )
        .route(
            "/v1/sessions/{session_id}/chunks/{chunk_index}",
            put(handlers::submit_chunk),
        )
        .route(
            "/v1/sessions/{session_id}/complete",
            post(handlers::complete_session),
        )
        .route(
            "/v1/sessions/{session_id}/cancel",
            post(handlers::cancel_session),
        )
        .route(
            "/v1/sessions/{session_id}/download",
            get(handlers::download_blob),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
