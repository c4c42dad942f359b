use axum::extract::{Json, Path, Query, State};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::flash::Flash;
use super::to_iso;
use super::uploads::{load_upload_responses, UploadResponse};
use crate::dispatch::{load_sheet, parse_schedule};
use crate::error::{AppError, AppResult};
use crate::models::{Checklist, Upload};
use crate::spreadsheet::Row;
use crate::state::AppState;
use crate::store::{self, STATUS_PENDING};

#[derive(Serialize, Clone)]
pub struct ChecklistResponse {
    pub id: Uuid,
    pub upload_id: Option<Uuid>,
    pub upload_name: Option<String>,
    pub status: String,
    pub note: String,
    pub scheduled_at: String,
    pub created_at: String,
}

impl ChecklistResponse {
    fn new(checklist: Checklist, upload_name: Option<String>) -> Self {
        Self {
            id: checklist.id,
            upload_id: checklist.upload_id,
            upload_name,
            status: checklist.status,
            note: checklist.note,
            scheduled_at: to_iso(checklist.scheduled_at),
            created_at: to_iso(checklist.created_at),
        }
    }
}

#[derive(Deserialize)]
pub struct BuildChecklistRequest {
    pub excel_id: Option<Uuid>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub schedule: String,
}

#[derive(Serialize)]
pub struct ChecklistView {
    pub uploads: Vec<UploadResponse>,
    pub selected_upload: Option<UploadResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contacts: Option<Vec<Row>>,
    pub note: String,
    pub schedule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flash: Option<Flash>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_checklist: Option<ChecklistResponse>,
    pub recent_checklists: Vec<ChecklistResponse>,
}

#[derive(Deserialize)]
pub struct ChecklistDetailQuery {
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub selected: String,
}

#[derive(Serialize)]
pub struct ChecklistDetailResponse {
    pub record: UploadResponse,
    pub note: String,
    pub schedule: String,
    pub selected_ids: String,
    pub generated_at: String,
}

pub async fn list_checklists(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ChecklistResponse>>> {
    Ok(Json(load_checklist_responses(&state)?))
}

/// Loads the chosen upload's contacts and, when a schedule is given, records
/// a pending checklist for it. Problems with the upload degrade to a flash.
pub async fn build_checklist(
    State(state): State<AppState>,
    Json(payload): Json<BuildChecklistRequest>,
) -> AppResult<Json<ChecklistView>> {
    let BuildChecklistRequest {
        excel_id,
        note,
        schedule,
    } = payload;

    let mut view = ChecklistView {
        uploads: load_upload_responses(&state)?,
        selected_upload: None,
        contacts: None,
        note,
        schedule,
        flash: None,
        created_checklist: None,
        recent_checklists: Vec::new(),
    };

    if let Some(upload_id) = excel_id {
        match load_contacts(&state, upload_id).await {
            Ok((upload, contacts)) => {
                let contact_count = contacts.len();
                view.selected_upload = Some(upload.clone().into());
                view.contacts = Some(contacts);

                if !view.schedule.trim().is_empty() {
                    match parse_schedule(&view.schedule) {
                        Ok(scheduled_at) => {
                            let checklist = {
                                let mut conn = state.db()?;
                                store::create_checklist(
                                    &mut conn,
                                    Some(upload.id),
                                    &view.note,
                                    scheduled_at,
                                    STATUS_PENDING,
                                )?
                            };
                            info!(
                                checklist_id = %checklist.id,
                                upload_id = %upload.id,
                                "checklist scheduled"
                            );
                            view.created_checklist = Some(ChecklistResponse::new(
                                checklist,
                                Some(upload.display_name.clone()),
                            ));
                            view.flash = Some(Flash::success(format!(
                                "Schedule saved and loaded {contact_count} contacts."
                            )));
                        }
                        Err(message) => view.flash = Some(Flash::error(message)),
                    }
                }
            }
            Err(message) => {
                warn!(upload_id = %upload_id, error = %message, "checklist build failed");
                view.flash = Some(Flash::error(format!("Error reading Excel: {message}")));
            }
        }
    }

    view.recent_checklists = load_checklist_responses(&state)?;
    Ok(Json(view))
}

pub async fn checklist_view(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
) -> AppResult<Json<ChecklistView>> {
    let mut view = ChecklistView {
        uploads: load_upload_responses(&state)?,
        selected_upload: None,
        contacts: None,
        note: String::new(),
        schedule: String::new(),
        flash: None,
        created_checklist: None,
        recent_checklists: load_checklist_responses(&state)?,
    };

    match load_contacts(&state, upload_id).await {
        Ok((upload, contacts)) => {
            view.flash = Some(Flash::success(format!(
                "Loaded {} contacts from {}",
                contacts.len(),
                upload.display_name
            )));
            view.selected_upload = Some(upload.into());
            view.contacts = Some(contacts);
        }
        Err(message) => {
            view.flash = Some(Flash::error(format!("Error loading Excel: {message}")));
        }
    }

    Ok(Json(view))
}

pub async fn checklist_detail(
    State(state): State<AppState>,
    Path(upload_id): Path<Uuid>,
    Query(query): Query<ChecklistDetailQuery>,
) -> AppResult<Json<ChecklistDetailResponse>> {
    let upload = {
        let mut conn = state.db()?;
        store::get_upload(&mut conn, upload_id)?
    };

    Ok(Json(ChecklistDetailResponse {
        record: upload.into(),
        note: query.note,
        schedule: query.schedule,
        selected_ids: query.selected,
        generated_at: Utc::now().to_rfc3339(),
    }))
}

fn load_checklist_responses(state: &AppState) -> AppResult<Vec<ChecklistResponse>> {
    let mut conn = state.db()?;
    let rows = store::list_checklists(&mut conn)?;
    Ok(rows
        .into_iter()
        .map(|(checklist, upload_name)| ChecklistResponse::new(checklist, upload_name))
        .collect())
}

async fn load_contacts(state: &AppState, upload_id: Uuid) -> Result<(Upload, Vec<Row>), String> {
    let upload = {
        let mut conn = state.db().map_err(|err| err.message().to_string())?;
        store::get_upload(&mut conn, upload_id).map_err(|err| {
            let err = AppError::from(err);
            if err.is_not_found() {
                "upload does not exist".to_string()
            } else {
                err.message().to_string()
            }
        })?
    };
    let sheet = load_sheet(state, &upload).await?;
    Ok((upload, sheet.rows))
}
