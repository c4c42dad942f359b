//! Broadcast dispatch: one template message per phone number found in an
//! upload, sent sequentially inside the calling request.

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Checklist, Upload};
use crate::spreadsheet::{read_sheet, Sheet};
use crate::state::AppState;
use crate::store::{self, STATUS_APPROVED, STATUS_FAILED, STATUS_PENDING};

pub const UPLOAD_NOT_FOUND: &str = "Excel file not found";
pub const NO_PHONE_NUMBERS: &str = "No phone numbers found in the Excel file. Please ensure there is a 'Phone' column with valid phone numbers.";

const CANONICAL_PHONE_COLUMN: &str = "Phone";
const PHONE_COLUMN_HINTS: &[&str] = &["phone", "mobile", "tel"];

const SCHEDULE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
];

pub struct BroadcastRequest {
    pub upload_id: Uuid,
    pub note: String,
    pub scheduled_at: NaiveDateTime,
    /// Accepted for compatibility; dispatch always targets every row.
    pub selected_ids: Vec<Value>,
}

#[derive(Debug, Serialize)]
pub struct BroadcastReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub checklist_id: Uuid,
    pub checklist_status: String,
    pub sent: usize,
    pub failed: usize,
}

impl BroadcastReport {
    fn halted(checklist: &Checklist, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            errors: Vec::new(),
            checklist_id: checklist.id,
            checklist_status: checklist.status.clone(),
            sent: 0,
            failed: 0,
        }
    }
}

/// Accepts RFC 3339 timestamps (converted to UTC) and the naive
/// `datetime-local` style forms browsers submit.
pub fn parse_schedule(raw: &str) -> Result<NaiveDateTime, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err("schedule: This field is required.".to_string());
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.naive_utc());
    }

    SCHEDULE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| format!("schedule: '{trimmed}' is not a valid date/time."))
}

/// Exact `Phone` wins; otherwise the first column whose name mentions
/// phone, mobile or tel, case-insensitively.
pub fn find_phone_column(columns: &[String]) -> Option<&str> {
    if let Some(column) = columns.iter().find(|name| *name == CANONICAL_PHONE_COLUMN) {
        return Some(column.as_str());
    }

    columns
        .iter()
        .find(|name| {
            let lowered = name.to_lowercase();
            PHONE_COLUMN_HINTS.iter().any(|hint| lowered.contains(hint))
        })
        .map(String::as_str)
}

pub fn extract_phone_numbers(sheet: &Sheet) -> Vec<String> {
    let Some(column) = find_phone_column(&sheet.columns) else {
        return Vec::new();
    };

    sheet.column_values(column).filter_map(phone_text).collect()
}

fn phone_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

pub async fn dispatch_broadcast(
    state: &AppState,
    request: BroadcastRequest,
) -> AppResult<BroadcastReport> {
    let BroadcastRequest {
        upload_id,
        note,
        scheduled_at,
        selected_ids,
    } = request;

    if !selected_ids.is_empty() {
        debug!(
            upload_id = %upload_id,
            selected = selected_ids.len(),
            "ignoring row selection; broadcasting to every row"
        );
    }

    let (upload, checklist) = {
        let mut conn = state.db()?;
        let upload: Upload = store::get_upload(&mut conn, upload_id).map_err(|err| {
            let err = AppError::from(err);
            if err.is_not_found() {
                AppError::not_found_with(UPLOAD_NOT_FOUND)
            } else {
                err
            }
        })?;
        let checklist =
            store::create_checklist(&mut conn, Some(upload.id), &note, scheduled_at, STATUS_PENDING)?;
        (upload, checklist)
    };

    info!(
        upload_id = %upload.id,
        checklist_id = %checklist.id,
        "broadcast checklist created"
    );

    let sheet = match load_sheet(state, &upload).await {
        Ok(sheet) => sheet,
        Err(message) => {
            warn!(upload_id = %upload.id, error = %message, "broadcast halted: unreadable upload");
            return Ok(BroadcastReport::halted(
                &checklist,
                format!("Error reading Excel: {message}"),
            ));
        }
    };

    let numbers = extract_phone_numbers(&sheet);
    if numbers.is_empty() {
        warn!(upload_id = %upload.id, columns = ?sheet.columns, "broadcast halted: no phone numbers");
        return Ok(BroadcastReport::halted(&checklist, NO_PHONE_NUMBERS));
    }

    let mut sent = 0usize;
    let mut failed = 0usize;
    let mut errors = Vec::new();

    for raw in &numbers {
        let number = state.phone_policy.normalize(raw);
        match state.messenger.send_template(&number).await {
            Ok(delivery) if delivery.is_success() => {
                debug!(%number, status = delivery.status, "template message accepted");
                sent += 1;
            }
            Ok(delivery) => {
                warn!(%number, status = delivery.status, body = %delivery.body, "template message rejected");
                failed += 1;
                errors.push(format!("Failed to send to {number}: {}", delivery.status));
            }
            Err(err) => {
                warn!(%number, error = %err, "template message request failed");
                failed += 1;
                errors.push(format!("Failed to send to {number}: {err}"));
            }
        }
    }

    let status = if sent > 0 { STATUS_APPROVED } else { STATUS_FAILED };
    let checklist = {
        let mut conn = state.db()?;
        store::set_checklist_status(&mut conn, checklist.id, status)?
    };

    info!(
        checklist_id = %checklist.id,
        sent,
        failed,
        status = %checklist.status,
        "broadcast finished"
    );

    let (success, message) = match (sent, failed) {
        (sent, 0) => (
            true,
            format!(
                "Broadcast saved and WhatsApp messages sent successfully to {sent} recipients!"
            ),
        ),
        (0, failed) => (
            false,
            format!(
                "Broadcast saved but failed to send WhatsApp messages to all {failed} recipients."
            ),
        ),
        (sent, failed) => (
            true,
            format!(
                "Broadcast saved. WhatsApp messages sent to {sent} recipients, failed to send to {failed} recipients."
            ),
        ),
    };

    Ok(BroadcastReport {
        success,
        message,
        errors,
        checklist_id: checklist.id,
        checklist_status: checklist.status,
        sent,
        failed,
    })
}

/// Fetches and parses an upload; failures come back as display text.
pub async fn load_sheet(state: &AppState, upload: &Upload) -> Result<Sheet, String> {
    let bytes = state
        .storage
        .get_file(&upload.stored_file)
        .await
        .map_err(|err| err.to_string())?;
    read_sheet(&upload.display_name, &bytes).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn prefers_exact_phone_column() {
        let cols = columns(&["Mobile", "Phone", "Telephone"]);
        assert_eq!(find_phone_column(&cols), Some("Phone"));
    }

    #[test]
    fn falls_back_to_first_loose_match() {
        let cols = columns(&["Name", "Mobile No", "Tel"]);
        assert_eq!(find_phone_column(&cols), Some("Mobile No"));

        let cols = columns(&["Name", "phone number"]);
        assert_eq!(find_phone_column(&cols), Some("phone number"));
    }

    #[test]
    fn no_phone_like_column() {
        let cols = columns(&["Name", "Email"]);
        assert_eq!(find_phone_column(&cols), None);
    }

    #[test]
    fn extracts_numbers_as_text() {
        let csv = "Name,Phone\nA,98765-43210\nB,\nC,+919876543210\n";
        let sheet = read_sheet("c.csv", csv.as_bytes()).unwrap();
        assert_eq!(
            extract_phone_numbers(&sheet),
            vec!["98765-43210", "+919876543210"]
        );
    }

    #[test]
    fn numeric_cells_become_digit_strings() {
        assert_eq!(
            phone_text(&serde_json::json!(9876543210_i64)),
            Some("9876543210".to_string())
        );
        assert_eq!(phone_text(&Value::Bool(true)), None);
    }

    #[test]
    fn parses_browser_and_rfc3339_schedules() {
        let expected = NaiveDate::from_ymd_opt(2025, 5, 1)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap();
        assert_eq!(parse_schedule("2025-05-01T10:30").unwrap(), expected);
        assert_eq!(parse_schedule("2025-05-01 10:30:00").unwrap(), expected);
        assert_eq!(parse_schedule("2025-05-01T16:00:00+05:30").unwrap(), expected);
    }

    #[test]
    fn rejects_blank_or_garbled_schedules() {
        assert!(parse_schedule("   ").is_err());
        assert!(parse_schedule("next tuesday").is_err());
    }
}
