//! Proposal upload endpoint

use axum::{
    extract::{Multipart, State},
    Json,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::processing::Upload;
use crate::server::state::AppState;

/// Per-file entry of the upload response
#[derive(Debug, Serialize)]
pub struct UploadResult {
    pub filename: String,
    pub status: String,
    pub tracking_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub message: String,
    pub results: Vec<UploadResult>,
    pub tracking_ids: Vec<Uuid>,
}

struct ReceivedFile {
    filename: String,
    data: bytes::Bytes,
}

/// POST /api/upload - Save PDFs and start one processing job per file
pub async fn upload_proposals(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>> {
    let mut files = Vec::new();
    let mut client_name = None;
    let mut industry = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        Error::BadRequest(format!("Failed to read multipart field: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "client_name" | "industry" => {
                let value = field.text().await.map_err(|e| {
                    Error::BadRequest(format!("Failed to read field {}: {}", name, e))
                })?;
                let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
                if name == "client_name" {
                    client_name = value;
                } else {
                    industry = value;
                }
            }
            "files" | "file" => {
                let filename = field
                    .file_name()
                    .map(base_name)
                    .unwrap_or_default();
                if !is_pdf(&filename) {
                    return Err(Error::UnsupportedFileType(format!(
                        "'{}' is not a PDF",
                        filename
                    )));
                }
                let data = field.bytes().await.map_err(|e| {
                    Error::BadRequest(format!("Failed to read file {}: {}", filename, e))
                })?;
                tracing::info!("Received file: {} ({} bytes)", filename, data.len());
                files.push(ReceivedFile { filename, data });
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    if files.is_empty() {
        return Err(Error::file_parse("upload", "No files provided"));
    }

    let upload_dir = state.config().storage.upload_dir.clone();
    tokio::fs::create_dir_all(&upload_dir).await.map_err(|e| {
        Error::storage(format!("Failed to create {}: {}", upload_dir.display(), e))
    })?;

    let mut results = Vec::with_capacity(files.len());
    for file in files {
        let path = saved_path(&upload_dir, &file.filename);
        tokio::fs::write(&path, &file.data).await.map_err(|e| {
            Error::storage(format!("Failed to save {}: {}", path.display(), e))
        })?;

        let tracker = state.registry().create_pdf_job(&file.filename);
        let upload = Upload::new(file.filename.clone(), file.data)
            .with_client(client_name.clone(), industry.clone())
            .with_file_path(path);
        let _handle = state.pipeline().spawn(tracker.clone(), upload);

        tracing::info!("[{}] Processing started as job {}", file.filename, tracker.id());
        results.push(UploadResult {
            filename: file.filename,
            status: "processing".to_string(),
            tracking_id: tracker.id(),
        });
    }

    let tracking_ids = results.iter().map(|r| r.tracking_id).collect();
    Ok(Json(UploadResponse {
        message: format!("Processing {} file(s)", results.len()),
        results,
        tracking_ids,
    }))
}

/// Final path component, so client-supplied directories never leak into the upload dir
fn base_name(name: &str) -> String {
    let name = name.rsplit(['/', '\\']).next().unwrap_or(name);
    name.trim().to_string()
}

fn is_pdf(filename: &str) -> bool {
    Path::new(filename)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

/// `{timestamp}_{id8}_{name}` under `dir`
fn saved_path(dir: &Path, filename: &str) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    dir.join(format!("{}_{}_{}", timestamp, &id[..8], filename))
}
