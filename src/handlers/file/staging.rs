use axum::{extract::State, Extension};
use serde::Serialize;

use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::staging::StagedEntry;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct StagingFlushed {
    pub ui_message: &'static str,
    pub existed: bool,
}

/// GET /file/staged - Files staged for the caller's tenant
pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<StagedEntry>> {
    Ok(ApiResponse::success(state.staging.enumerate(&user.tenant).await?))
}

/// DELETE /delete/all - Discard everything staged for the caller's tenant
pub async fn flush(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<StagingFlushed> {
    let existed = state.staging.flush(&user.tenant).await?;
    tracing::info!(trace_id = %user.trace_id, tenant = %user.tenant, existed, "staging flushed on request");

    Ok(ApiResponse::success(StagingFlushed {
        ui_message: "FILES DELETED",
        existed,
    }))
}
