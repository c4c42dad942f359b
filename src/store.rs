use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Checklist, NewChecklist, NewUpload, RowCount, Upload};
use crate::schema::{checklists, uploads};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_APPROVED: &str = "approved";
pub const STATUS_REJECTED: &str = "rejected";
pub const STATUS_FAILED: &str = "failed";

pub const CHECKLIST_STATUSES: &[&str] = &[
    STATUS_PENDING,
    STATUS_APPROVED,
    STATUS_REJECTED,
    STATUS_FAILED,
];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("unknown checklist status '{0}'")]
    InvalidStatus(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub fn insert_upload(
    conn: &mut PgConnection,
    stored_file: &str,
    display_name: &str,
    source: &str,
    rows: RowCount,
) -> StoreResult<Upload> {
    let (row_count, row_count_kind) = rows.to_columns();
    let new_upload = NewUpload {
        id: Uuid::new_v4(),
        stored_file: stored_file.to_string(),
        display_name: display_name.to_string(),
        source: source.to_string(),
        row_count,
        row_count_kind: row_count_kind.to_string(),
    };

    diesel::insert_into(uploads::table)
        .values(&new_upload)
        .execute(conn)?;

    let upload = uploads::table.find(new_upload.id).first(conn)?;
    Ok(upload)
}

pub fn list_uploads(conn: &mut PgConnection) -> StoreResult<Vec<Upload>> {
    let rows = uploads::table
        .order((uploads::created_at.desc(), uploads::id.desc()))
        .load(conn)?;
    Ok(rows)
}

/// Fails with `diesel::result::Error::NotFound` when the id is absent.
pub fn get_upload(conn: &mut PgConnection, upload_id: Uuid) -> StoreResult<Upload> {
    let upload = uploads::table.find(upload_id).first(conn)?;
    Ok(upload)
}

/// Removes the metadata row and returns it so the caller can clean up the
/// backing file.
pub fn delete_upload(conn: &mut PgConnection, upload_id: Uuid) -> StoreResult<Upload> {
    conn.transaction(|conn| {
        let upload: Upload = uploads::table.find(upload_id).first(conn)?;
        diesel::delete(uploads::table.find(upload_id)).execute(conn)?;
        Ok::<Upload, diesel::result::Error>(upload)
    })
    .map_err(StoreError::from)
}

/// Deletes every upload whose id is in `upload_ids`; unknown ids are ignored.
pub fn delete_uploads(conn: &mut PgConnection, upload_ids: &[Uuid]) -> StoreResult<Vec<Upload>> {
    if upload_ids.is_empty() {
        return Ok(Vec::new());
    }

    conn.transaction(|conn| {
        let doomed: Vec<Upload> = uploads::table
            .filter(uploads::id.eq_any(upload_ids))
            .load(conn)?;
        diesel::delete(uploads::table.filter(uploads::id.eq_any(upload_ids))).execute(conn)?;
        Ok::<Vec<Upload>, diesel::result::Error>(doomed)
    })
    .map_err(StoreError::from)
}

pub fn count_uploads_referencing(conn: &mut PgConnection, stored_file: &str) -> StoreResult<i64> {
    let count = uploads::table
        .filter(uploads::stored_file.eq(stored_file))
        .select(count_star())
        .first(conn)?;
    Ok(count)
}

pub fn list_stored_files(conn: &mut PgConnection) -> StoreResult<Vec<String>> {
    let files = uploads::table
        .select(uploads::stored_file)
        .distinct()
        .load(conn)?;
    Ok(files)
}

pub fn create_checklist(
    conn: &mut PgConnection,
    upload_id: Option<Uuid>,
    note: &str,
    scheduled_at: NaiveDateTime,
    status: &str,
) -> StoreResult<Checklist> {
    ensure_known_status(status)?;

    let new_checklist = NewChecklist {
        id: Uuid::new_v4(),
        upload_id,
        status: status.to_string(),
        note: note.to_string(),
        scheduled_at,
    };

    diesel::insert_into(checklists::table)
        .values(&new_checklist)
        .execute(conn)?;

    let checklist = checklists::table.find(new_checklist.id).first(conn)?;
    Ok(checklist)
}

pub fn get_checklist(conn: &mut PgConnection, checklist_id: Uuid) -> StoreResult<Checklist> {
    let checklist = checklists::table.find(checklist_id).first(conn)?;
    Ok(checklist)
}

/// Every checklist, most recent first, with the name of its upload while
/// that upload still exists.
pub fn list_checklists(conn: &mut PgConnection) -> StoreResult<Vec<(Checklist, Option<String>)>> {
    let rows = checklists::table
        .left_join(uploads::table)
        .select((Checklist::as_select(), uploads::display_name.nullable()))
        .order((checklists::created_at.desc(), checklists::id.desc()))
        .load(conn)?;
    Ok(rows)
}

pub fn set_checklist_status(
    conn: &mut PgConnection,
    checklist_id: Uuid,
    status: &str,
) -> StoreResult<Checklist> {
    ensure_known_status(status)?;

    let updated = diesel::update(checklists::table.find(checklist_id))
        .set(checklists::status.eq(status))
        .execute(conn)?;
    if updated == 0 {
        return Err(StoreError::Database(diesel::result::Error::NotFound));
    }

    get_checklist(conn, checklist_id)
}

fn ensure_known_status(status: &str) -> StoreResult<()> {
    if CHECKLIST_STATUSES.iter().any(|known| *known == status) {
        Ok(())
    } else {
        Err(StoreError::InvalidStatus(status.to_string()))
    }
}
