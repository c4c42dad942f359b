use axum::extract::{Json, Multipart, Path, State};
use axum::http::{header::SET_COOKIE, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::Form;
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use super::flash::{redirect_with_flash, take_flash, Flash};
use super::to_iso;
use crate::dispatch::load_sheet;
use crate::error::{AppError, AppResult};
use crate::ingest::{self, BulkDeleteOutcome, UploadSubmission};
use crate::models::Upload;
use crate::spreadsheet::{SheetPreview, PREVIEW_ROW_LIMIT};
use crate::state::AppState;
use crate::store;

pub const NOTHING_SELECTED: &str = "No records selected.";

#[derive(Serialize, Clone)]
pub struct UploadResponse {
    pub id: Uuid,
    pub display_name: String,
    pub stored_file: String,
    pub source: String,
    pub row_count: Option<u32>,
    pub row_count_label: String,
    pub created_at: String,
}

impl From<Upload> for UploadResponse {
    fn from(upload: Upload) -> Self {
        let rows = upload.rows();
        Self {
            id: upload.id,
            display_name: upload.display_name,
            stored_file: upload.stored_file,
            source: upload.source,
            row_count: rows.known(),
            row_count_label: rows.to_string(),
            created_at: to_iso(upload.created_at),
        }
    }
}

#[derive(Serialize)]
pub struct ListingView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    pub uploads: Vec<UploadResponse>,
}

#[derive(Serialize)]
pub struct UploadResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadResponse>,
}

#[derive(Serialize)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct BulkDeleteResponse {
    pub success: bool,
    pub deleted: usize,
    pub warning: bool,
    pub message: String,
}

#[derive(Deserialize)]
pub struct BulkDeleteForm {
    #[serde(default)]
    pub selected_records: Vec<String>,
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub upload: UploadResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<SheetPreview>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub async fn listing_view(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<ListingView>)> {
    let (flash, clear_cookie) = take_flash(jar);
    let uploads = load_upload_responses(&state)?;

    let mut headers = HeaderMap::new();
    if let Some(clear_cookie) = clear_cookie {
        headers.insert(SET_COOKIE, clear_cookie);
    }

    Ok((headers, Json(ListingView { flash, uploads })))
}

pub async fn list_uploads(State(state): State<AppState>) -> AppResult<Json<Vec<UploadResponse>>> {
    Ok(Json(load_upload_responses(&state)?))
}

pub async fn get_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> AppResult<Json<UploadResponse>> {
    let mut conn = state.db()?;
    let upload = store::get_upload(&mut conn, upload_id)?;
    Ok(Json(upload.into()))
}

pub async fn upload_api(State(state): State<AppState>, multipart: Multipart) -> Response {
    let outcome = match read_upload_form(multipart).await {
        Ok(submission) => ingest::ingest_upload(&state, submission).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(outcome) => (
            StatusCode::CREATED,
            Json(UploadResult {
                success: true,
                message: outcome.message,
                upload: Some(outcome.upload.into()),
            }),
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "upload rejected");
            (
                err.status(),
                Json(UploadResult {
                    success: false,
                    message: err.message().to_string(),
                    upload: None,
                }),
            )
                .into_response()
        }
    }
}

pub async fn upload_form(State(state): State<AppState>, multipart: Multipart) -> Response {
    let outcome = match read_upload_form(multipart).await {
        Ok(submission) => ingest::ingest_upload(&state, submission).await,
        Err(err) => Err(err),
    };

    match outcome {
        Ok(outcome) => redirect_with_flash(Flash::success(outcome.message)),
        Err(err) => {
            error!(error = %err, "upload rejected");
            if err.status() == StatusCode::BAD_REQUEST {
                redirect_with_flash(Flash::error(
                    "Form validation failed. Please check your inputs.",
                ))
            } else {
                redirect_with_flash(err.into())
            }
        }
    }
}

pub async fn delete_upload_api(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> AppResult<Json<ActionResult>> {
    let upload = ingest::delete_upload(&state, upload_id).await?;
    Ok(Json(ActionResult {
        success: true,
        message: deleted_message(&upload),
    }))
}

pub async fn delete_upload_form(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> Response {
    match ingest::delete_upload(&state, upload_id).await {
        Ok(upload) => redirect_with_flash(Flash::success(deleted_message(&upload))),
        Err(err) => redirect_with_flash(err.into()),
    }
}

pub async fn bulk_delete_api(
    State(state): State<AppState>,
    Json(payload): Json<BulkDeleteRequest>,
) -> AppResult<Json<BulkDeleteResponse>> {
    let mut ids = payload.ids;
    ids.sort();
    ids.dedup();

    let response = match ingest::delete_uploads(&state, &ids).await? {
        BulkDeleteOutcome::NothingSelected => BulkDeleteResponse {
            success: false,
            deleted: 0,
            warning: true,
            message: NOTHING_SELECTED.to_string(),
        },
        BulkDeleteOutcome::Deleted(count) => BulkDeleteResponse {
            success: true,
            deleted: count,
            warning: false,
            message: bulk_deleted_message(count),
        },
    };
    Ok(Json(response))
}

pub async fn bulk_delete_form(
    State(state): State<AppState>,
    Form(form): Form<BulkDeleteForm>,
) -> Response {
    let mut ids: Vec<Uuid> = form
        .selected_records
        .iter()
        .filter_map(|raw| match Uuid::parse_str(raw.trim()) {
            Ok(id) => Some(id),
            Err(_) => {
                warn!(value = %raw, "ignoring malformed record id in bulk delete");
                None
            }
        })
        .collect();
    ids.sort();
    ids.dedup();

    match ingest::delete_uploads(&state, &ids).await {
        Ok(BulkDeleteOutcome::NothingSelected) => {
            redirect_with_flash(Flash::warning(NOTHING_SELECTED))
        }
        Ok(BulkDeleteOutcome::Deleted(count)) => {
            redirect_with_flash(Flash::success(bulk_deleted_message(count)))
        }
        Err(err) => redirect_with_flash(err.into()),
    }
}

/// Unreadable files degrade to an inline `error` instead of failing.
pub async fn preview_upload(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> AppResult<Json<PreviewResponse>> {
    let upload = {
        let mut conn = state.db()?;
        store::get_upload(&mut conn, upload_id)?
    };

    let (preview, error) = match load_sheet(&state, &upload).await {
        Ok(sheet) => (Some(sheet.into_preview(PREVIEW_ROW_LIMIT)), None),
        Err(message) => {
            warn!(upload_id = %upload.id, error = %message, "preview failed");
            (None, Some(format!("Error reading file: {message}")))
        }
    };

    Ok(Json(PreviewResponse {
        upload: upload.into(),
        preview,
        error,
    }))
}

pub(crate) fn load_upload_responses(state: &AppState) -> AppResult<Vec<UploadResponse>> {
    let mut conn = state.db()?;
    let uploads = store::list_uploads(&mut conn)?;
    Ok(uploads.into_iter().map(UploadResponse::from).collect())
}

async fn read_upload_form(mut multipart: Multipart) -> AppResult<UploadSubmission> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut source: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                file_name = field.file_name().map(|n| n.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("source") => {
                let value = field.text().await.map_err(|err| {
                    error!(error = %err, "invalid source field");
                    AppError::bad_request(format!("invalid source: {err}"))
                })?;
                source = Some(value);
            }
            _ => {}
        }
    }

    UploadSubmission::validate(file_name, file_bytes, source)
}

fn deleted_message(upload: &Upload) -> String {
    format!("'{}' deleted successfully.", upload.display_name)
}

fn bulk_deleted_message(count: usize) -> String {
    format!("{count} record(s) deleted successfully!")
}
