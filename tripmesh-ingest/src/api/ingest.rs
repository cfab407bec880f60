//! POST /ingest
//!
//! CSV upload as `multipart/form-data` (field `file`). The upload is stored
//! under the configured upload directory as `<uuid>_<file name>` and then
//! scheduled; the client never names a server-side path.

use axum::{
    extract::{
        multipart::{Field, MultipartError},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Multipart field carrying the CSV file
const UPLOAD_FIELD: &str = "file";

/// Largest accepted request body
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// POST /ingest response
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub job_id: Uuid,
    pub message: String,
    pub filename: String,
}

/// POST /ingest
///
/// Store the uploaded CSV and schedule its ingestion. Returns 202 Accepted
/// with the job id; progress is at `/jobs/:id/events`.
pub async fn upload_csv(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<IngestResponse>)> {
    while let Some(field) = multipart.next_field().await.map_err(bad_upload)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let original = upload_name(field.file_name())?;
        let stored_name = format!("{}_{}", Uuid::new_v4().simple(), original);
        tokio::fs::create_dir_all(&state.upload_dir)
            .await
            .map_err(|e| {
                ApiError::Internal(format!(
                    "Cannot create upload directory {}: {}",
                    state.upload_dir.display(),
                    e
                ))
            })?;
        let destination = state.upload_dir.join(&stored_name);

        let bytes = save_upload(field, &destination).await?;
        info!(file = %stored_name, bytes, "Stored CSV upload");

        let job_id = state.ingestion.schedule_ingestion(destination).await?;
        return Ok((
            StatusCode::ACCEPTED,
            Json(IngestResponse {
                job_id,
                message: "Ingestion scheduled".to_string(),
                filename: stored_name,
            }),
        ));
    }

    Err(ApiError::BadRequest(format!(
        "Multipart field '{}' with a CSV file is required",
        UPLOAD_FIELD
    )))
}

/// Final path component of the client's file name, which must end in `.csv`
fn upload_name(file_name: Option<&str>) -> ApiResult<String> {
    let name = file_name
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| ApiError::BadRequest("Upload has no file name".to_string()))?;

    let is_csv = Path::new(&name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(ApiError::BadRequest(format!(
            "Only CSV uploads are supported: {}",
            name
        )));
    }
    Ok(name)
}

/// Stream the field to `destination`; a partial file is removed on failure
async fn save_upload(field: Field<'_>, destination: &Path) -> ApiResult<u64> {
    let result = write_field(field, destination).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(destination).await {
            warn!("Could not remove partial upload {}: {}", destination.display(), e);
        }
    }
    result
}

async fn write_field(mut field: Field<'_>, destination: &Path) -> ApiResult<u64> {
    let io_error =
        |e: std::io::Error| ApiError::Internal(format!("Cannot store upload: {}", e));

    let mut file = tokio::fs::File::create(destination).await.map_err(io_error)?;
    let mut written = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(bad_upload)? {
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_error)?;
    Ok(written)
}

fn bad_upload(err: MultipartError) -> ApiError {
    ApiError::BadRequest(format!("Malformed upload: {}", err.body_text()))
}

/// Build ingestion routes
pub fn ingest_routes() -> Router<AppState> {
    Router::new()
        .route("/ingest", post(upload_csv))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_name_keeps_only_final_component() {
        assert_eq!(upload_name(Some("trips.csv")).unwrap(), "trips.csv");
        assert_eq!(upload_name(Some("../../etc/trips.CSV")).unwrap(), "trips.CSV");
    }

    #[test]
    fn test_upload_name_rejects_missing_or_non_csv() {
        assert!(matches!(upload_name(None), Err(ApiError::BadRequest(_))));
        assert!(matches!(upload_name(Some("..")), Err(ApiError::BadRequest(_))));
        assert!(matches!(upload_name(Some("trips.txt")), Err(ApiError::BadRequest(_))));
    }
}
