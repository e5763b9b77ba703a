use axum::{
    extract::{Multipart, Query, State},
    Extension,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;
use crate::media::StagedMedia;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const MEDIA_FIELD: &str = "media_file";

#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub ui_message: &'static str,
    pub transaction_id: Uuid,
    pub trace_id: String,
}

#[derive(Debug, Serialize)]
pub struct UploadCancelled {
    pub ui_message: &'static str,
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelQuery {
    pub image_id: String,
}

/// POST /file/upload - Queue a file for staging and answer before it is processed
pub async fn post(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> ApiResult<UploadAccepted> {
    let (filename, bytes) = read_media_field(&mut multipart).await?;

    let handle = state
        .ingest
        .submit(StagedMedia {
            tenant: user.tenant.clone(),
            filename: filename.clone(),
            bytes,
        })
        .await?;

    tracing::info!(
        trace_id = %user.trace_id,
        tenant = %user.tenant,
        filename = %filename,
        transaction_id = %handle.id,
        "upload accepted"
    );

    Ok(ApiResponse::accepted(UploadAccepted {
        ui_message: "FILE UPLOADING",
        transaction_id: handle.id,
        trace_id: user.trace_id,
    }))
}

/// DELETE /file/upload?image_id= - Cancel a staged file
pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<CancelQuery>,
) -> ApiResult<UploadCancelled> {
    if !state.ingest.cancel(&user.tenant, &query.image_id).await? {
        return Err(ApiError::not_found(format!("No staged file named '{}'", query.image_id)));
    }

    Ok(ApiResponse::success(UploadCancelled {
        ui_message: "FILE DELETED",
        filename: query.image_id,
    }))
}

async fn read_media_field(multipart: &mut Multipart) -> Result<(String, Bytes), ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(MEDIA_FIELD) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ApiError::bad_request(format!("{MEDIA_FIELD} has no file name")))?;
        let bytes = field.bytes().await?;
        return Ok((filename, bytes));
    }

    Err(ApiError::bad_request(format!("Missing multipart field '{MEDIA_FIELD}'")))
}
