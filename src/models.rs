use std::fmt;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const ROW_COUNT_EXACT: &str = "exact";
pub const ROW_COUNT_AT_LEAST: &str = "at_least";
pub const ROW_COUNT_UNKNOWN: &str = "unknown";

/// Best-effort data-row count captured once at ingestion time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowCount {
    Exact(u32),
    /// Inspection stopped at the cap; the file holds at least this many rows.
    AtLeast(u32),
    Unknown,
}

impl RowCount {
    pub fn to_columns(self) -> (i32, &'static str) {
        match self {
            RowCount::Exact(count) => (clamp_to_i32(count), ROW_COUNT_EXACT),
            RowCount::AtLeast(count) => (clamp_to_i32(count), ROW_COUNT_AT_LEAST),
            RowCount::Unknown => (0, ROW_COUNT_UNKNOWN),
        }
    }

    pub fn from_columns(count: i32, kind: &str) -> Self {
        let count = u32::try_from(count).unwrap_or(0);
        match kind {
            ROW_COUNT_EXACT => RowCount::Exact(count),
            ROW_COUNT_AT_LEAST => RowCount::AtLeast(count),
            _ => RowCount::Unknown,
        }
    }

    pub fn known(self) -> Option<u32> {
        match self {
            RowCount::Exact(count) | RowCount::AtLeast(count) => Some(count),
            RowCount::Unknown => None,
        }
    }
}

impl fmt::Display for RowCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowCount::Exact(count) => write!(f, "{count}"),
            RowCount::AtLeast(count) => write!(f, "{count}+"),
            RowCount::Unknown => f.write_str("unknown"),
        }
    }
}

fn clamp_to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = uploads)]
pub struct Upload {
    pub id: Uuid,
    pub stored_file: String,
    pub display_name: String,
    pub source: String,
    pub row_count: i32,
    pub row_count_kind: String,
    pub created_at: NaiveDateTime,
}

impl Upload {
    pub fn rows(&self) -> RowCount {
        RowCount::from_columns(self.row_count, &self.row_count_kind)
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = uploads)]
pub struct NewUpload {
    pub id: Uuid,
    pub stored_file: String,
    pub display_name: String,
    pub source: String,
    pub row_count: i32,
    pub row_count_kind: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = checklists)]
#[diesel(belongs_to(Upload, foreign_key = upload_id))]
pub struct Checklist {
    pub id: Uuid,
    pub upload_id: Option<Uuid>,
    pub status: String,
    pub note: String,
    pub scheduled_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = checklists)]
pub struct NewChecklist {
    pub id: Uuid,
    pub upload_id: Option<Uuid>,
    pub status: String,
    pub note: String,
    pub scheduled_at: NaiveDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_count_survives_column_round_trip() {
        for count in [RowCount::Exact(3), RowCount::AtLeast(1000), RowCount::Unknown] {
            let (value, kind) = count.to_columns();
            assert_eq!(RowCount::from_columns(value, kind), count);
        }
    }

    #[test]
    fn unknown_row_count_is_stored_as_zero() {
        assert_eq!(RowCount::Unknown.to_columns(), (0, ROW_COUNT_UNKNOWN));
        assert_eq!(RowCount::Unknown.known(), None);
    }

    #[test]
    fn row_count_labels() {
        assert_eq!(RowCount::Exact(3).to_string(), "3");
        assert_eq!(RowCount::AtLeast(1000).to_string(), "1000+");
        assert_eq!(RowCount::Unknown.to_string(), "unknown");
    }

    #[test]
    fn unrecognised_kind_reads_as_unknown() {
        assert_eq!(RowCount::from_columns(12, "bogus"), RowCount::Unknown);
    }
}
