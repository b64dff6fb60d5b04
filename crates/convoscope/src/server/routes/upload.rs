//! Document upload endpoints

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use serde::Serialize;

use crate::document::{self, DocumentMetadata};
use crate::error::{Error, Result};
use crate::server::state::AppState;

/// Upload metadata plus whether a cached result already exists
#[derive(Debug, Serialize)]
pub struct UploadMetadata {
    #[serde(flatten)]
    pub document: DocumentMetadata,
    pub has_cached_results: bool,
}

/// Response from upload and upload info
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub file_id: String,
    pub file_hash: String,
    pub metadata: UploadMetadata,
}

/// POST /api/upload - Upload a conversation export (multipart field `file`)
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::validation(format!("Failed to read multipart field: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("").to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| Error::validation(format!("Failed to read file: {}", e)))?;
        upload = Some((filename, data));
        break;
    }

    let (filename, data) = upload.ok_or_else(|| Error::validation("No file provided"))?;
    if filename.is_empty() {
        return Err(Error::validation("No file selected"));
    }
    let file_id = document::sanitize_filename(&filename)
        .filter(|name| document::is_allowed_extension(name))
        .ok_or_else(|| Error::validation("Invalid file type. Only JSON files are allowed"))?;

    // invalid exports are never written
    let metadata = document::inspect(&data)?;
    let file_hash = document::digest_reader(&data[..])?;

    let path = state.upload_path(&file_id);
    tokio::fs::write(&path, &data).await?;

    let key = file_hash.clone();
    let has_cached_results = state
        .service()
        .cache()
        .blocking(move |cache| cache.get(&key).is_some())
        .await?;
    tracing::info!(
        %file_id,
        %file_hash,
        conversations = metadata.conversations,
        messages = metadata.messages,
        "File uploaded"
    );

    Ok(Json(UploadResponse {
        file_id,
        file_hash,
        metadata: UploadMetadata {
            document: metadata,
            has_cached_results,
        },
    }))
}

/// GET /api/upload/:file_id - Metadata of an uploaded file
pub async fn get_upload_info(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> Result<Json<UploadResponse>> {
    let file_id = document::sanitize_filename(&file_id)
        .ok_or_else(|| Error::not_found("File"))?;
    let path = state.upload_path(&file_id);

    let data = match tokio::fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(format!("File '{}'", file_id)))
        }
        Err(e) => return Err(e.into()),
    };
    let metadata = document::inspect(&data)?;

    let digest_path = path.clone();
    let file_hash = tokio::task::spawn_blocking(move || document::content_digest(&digest_path))
        .await
        .map_err(|e| Error::internal(format!("Digest task failed: {}", e)))??;

    let key = file_hash.clone();
    let has_cached_results = state
        .service()
        .cache()
        .blocking(move |cache| cache.get(&key).is_some())
        .await?;

    Ok(Json(UploadResponse {
        file_id,
        file_hash,
        metadata: UploadMetadata {
            document: metadata,
            has_cached_results,
        },
    }))
}
