use axum::extract::{rejection::JsonRejection, Json, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::dispatch::{
    dispatch_broadcast, parse_schedule, BroadcastReport, BroadcastRequest, UPLOAD_NOT_FOUND,
};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BroadcastPayload {
    #[serde(default)]
    pub excel_id: Option<Value>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub selected_ids: Vec<Value>,
}

pub async fn broadcast(
    State(state): State<AppState>,
    payload: Result<Json<BroadcastPayload>, JsonRejection>,
) -> AppResult<Json<BroadcastReport>> {
    let Json(payload) = payload.map_err(|rejection| {
        warn!(error = %rejection, "invalid broadcast payload");
        AppError::bad_request(rejection.body_text())
    })?;

    let upload_id = payload
        .excel_id
        .as_ref()
        .and_then(upload_id_from)
        .ok_or_else(|| AppError::not_found_with(UPLOAD_NOT_FOUND))?;
    let scheduled_at = parse_schedule(&payload.schedule).map_err(AppError::bad_request)?;

    let report = dispatch_broadcast(
        &state,
        BroadcastRequest {
            upload_id,
            note: payload.note,
            scheduled_at,
            selected_ids: payload.selected_ids,
        },
    )
    .await?;

    Ok(Json(report))
}

/// Ids arrive as JSON strings; anything that is not a UUID resolves to no upload.
fn upload_id_from(value: &Value) -> Option<Uuid> {
    value
        .as_str()
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_string_ids_only() {
        let id = Uuid::new_v4();
        assert_eq!(upload_id_from(&json!(id.to_string())), Some(id));
        assert_eq!(upload_id_from(&json!("not-a-uuid")), None);
        assert_eq!(upload_id_from(&json!(42)), None);
        assert_eq!(upload_id_from(&Value::Null), None);
    }
}
