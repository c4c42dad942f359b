//! Upload ingestion and the file lifecycle around upload records.

use std::collections::BTreeSet;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{RowCount, Upload};
use crate::spreadsheet::count_rows;
use crate::state::AppState;
use crate::storage::upload_key;
use crate::store;

const MAX_NAME_CHARS: usize = 255;
const MAX_SOURCE_CHARS: usize = 255;

pub const RECORD_NOT_FOUND: &str = "Record not found or already deleted.";

pub struct UploadSubmission {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub source: String,
}

impl UploadSubmission {
    /// Checks the raw form fields; nothing is stored when this fails.
    pub fn validate(
        file_name: Option<String>,
        bytes: Option<Vec<u8>>,
        source: Option<String>,
    ) -> AppResult<Self> {
        let bytes = bytes.ok_or_else(|| AppError::bad_request("file: This field is required."))?;
        let original_name = file_name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| AppError::bad_request("file: No file was submitted."))?;
        if bytes.is_empty() {
            return Err(AppError::bad_request("file: The submitted file is empty."));
        }
        if original_name.chars().count() > MAX_NAME_CHARS {
            return Err(AppError::bad_request(format!(
                "file: Ensure this filename has at most {MAX_NAME_CHARS} characters."
            )));
        }

        let source = source.map(|value| value.trim().to_string()).unwrap_or_default();
        if source.chars().count() > MAX_SOURCE_CHARS {
            return Err(AppError::bad_request(format!(
                "source: Ensure this value has at most {MAX_SOURCE_CHARS} characters."
            )));
        }

        Ok(Self {
            bytes,
            original_name,
            source,
        })
    }
}

pub struct IngestOutcome {
    pub upload: Upload,
    pub message: String,
}

pub enum BulkDeleteOutcome {
    NothingSelected,
    Deleted(usize),
}

pub async fn ingest_upload(
    state: &AppState,
    submission: UploadSubmission,
) -> AppResult<IngestOutcome> {
    let UploadSubmission {
        bytes,
        original_name,
        source,
    } = submission;

    let (display_name, key) = upload_key(&original_name)
        .ok_or_else(|| AppError::bad_request("file: The submitted filename is not valid."))?;

    let rows = match count_rows(&display_name, &bytes) {
        Ok(rows) => rows,
        Err(err) => {
            warn!(file = %display_name, error = %err, "row counting failed");
            RowCount::Unknown
        }
    };

    let size_bytes = bytes.len();
    state.storage.put_file(&key, bytes).await.map_err(|err| {
        warn!(file = %display_name, error = %err, "failed to store upload");
        AppError::internal(format!("failed to store upload: {err}"))
    })?;

    let mut conn = state.db()?;
    let upload = store::insert_upload(&mut conn, &key, &display_name, &source, rows)?;
    drop(conn);

    info!(
        upload_id = %upload.id,
        file = %display_name,
        size_bytes,
        rows = %rows,
        "upload stored"
    );

    Ok(IngestOutcome {
        message: upload_message(&display_name, rows),
        upload,
    })
}

pub fn upload_message(name: &str, rows: RowCount) -> String {
    match rows {
        RowCount::Unknown => format!("Uploaded {name} (row count unavailable)"),
        known => format!("Uploaded {name} ({known} rows)"),
    }
}

/// Deletes the record, then removes its file unless another record still
/// points at the same stored file. File removal failures are only logged.
pub async fn delete_upload(state: &AppState, upload_id: Uuid) -> AppResult<Upload> {
    let mut conn = state.db()?;
    let upload = store::delete_upload(&mut conn, upload_id).map_err(|err| {
        let err = AppError::from(err);
        if err.is_not_found() {
            AppError::not_found_with(RECORD_NOT_FOUND)
        } else {
            err
        }
    })?;
    let still_referenced = store::count_uploads_referencing(&mut conn, &upload.stored_file)? > 0;
    drop(conn);

    if !still_referenced {
        remove_backing_file(state, &upload.stored_file).await;
    }

    info!(upload_id = %upload.id, file = %upload.display_name, "upload deleted");
    Ok(upload)
}

pub async fn delete_uploads(state: &AppState, upload_ids: &[Uuid]) -> AppResult<BulkDeleteOutcome> {
    if upload_ids.is_empty() {
        warn!("bulk delete requested without any selected records");
        return Ok(BulkDeleteOutcome::NothingSelected);
    }

    let mut conn = state.db()?;
    let deleted = store::delete_uploads(&mut conn, upload_ids)?;
    let stored_files: BTreeSet<&str> = deleted
        .iter()
        .map(|upload| upload.stored_file.as_str())
        .collect();

    let mut orphaned = Vec::new();
    for stored_file in stored_files {
        if store::count_uploads_referencing(&mut conn, stored_file)? == 0 {
            orphaned.push(stored_file.to_string());
        }
    }
    drop(conn);

    for stored_file in &orphaned {
        remove_backing_file(state, stored_file).await;
    }

    info!(
        requested = upload_ids.len(),
        deleted = deleted.len(),
        files_removed = orphaned.len(),
        "bulk upload delete finished"
    );
    Ok(BulkDeleteOutcome::Deleted(deleted.len()))
}

async fn remove_backing_file(state: &AppState, stored_file: &str) {
    if let Err(err) = state.storage.delete_file(stored_file).await {
        warn!(file = %stored_file, error = %err, "failed to remove backing file");
    }
}
