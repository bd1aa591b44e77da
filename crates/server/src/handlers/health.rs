//! Health check handler.

use crate::error::ApiResult;
use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use depot_metadata::SessionStore;
use depot_storage::BlobStore;

/// GET /v1/health - Verify storage and metadata connectivity.
/// Intentionally unauthenticated for load balancers and probes.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    state.metadata.health_check().await?;
    state.blobs.health_check().await?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}
