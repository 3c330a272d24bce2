//! File uploads (picker and clipboard). Files are stored under the upload directory and
//! referenced by absolute path in later prompt requests.

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};

use super::error::ApiError;
use super::protocol::UploadResponse;
use super::ServerState;

const FIELD_NAME: &str = "file";
const MAX_NAME_LEN: usize = 100;

pub(super) async fn upload_file(
    State(state): State<ServerState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FIELD_NAME) {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("upload")
            .to_string();
        let declared = field.content_type().map(str::to_string);
        let data = field.bytes().await.map_err(multipart_error)?;
        if data.is_empty() {
            return Err(ApiError::BadRequest("uploaded file is empty".to_string()));
        }

        let mimetype = detect_mimetype(declared.as_deref(), &filename);
        tokio::fs::create_dir_all(&state.upload_dir)
            .await
            .map_err(|e| ApiError::Internal(format!("File upload failed: {}", e)))?;
        let stored = state.upload_dir.join(format!(
            "{}_{}",
            uuid::Uuid::new_v4(),
            sanitize_filename(&filename)
        ));
        tokio::fs::write(&stored, &data)
            .await
            .map_err(|e| ApiError::Internal(format!("File upload failed: {}", e)))?;
        log::info!(
            "stored upload {} ({} bytes, {}) at {}",
            filename,
            data.len(),
            mimetype,
            stored.display()
        );

        return Ok(Json(UploadResponse {
            path: stored.display().to_string(),
            filename,
            mimetype,
            size: data.len(),
        }));
    }
    Err(ApiError::BadRequest(format!(
        "missing multipart field '{}'",
        FIELD_NAME
    )))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("uploaded file is too large".to_string())
    } else {
        ApiError::BadRequest(format!("invalid upload: {}", err.body_text()))
    }
}

/// Declared type unless missing or generic; otherwise guessed from the file name.
fn detect_mimetype(declared: Option<&str>, filename: &str) -> String {
    match declared.map(str::trim) {
        Some(m) if !m.is_empty() && m != "application/octet-stream" => m.to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .to_string(),
    }
}

/// Reduce a client-supplied name to a safe single path segment.
fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let cleaned: String = cleaned.chars().take(MAX_NAME_LEN).collect();
    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}
