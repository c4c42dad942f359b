//! Reading uploaded spreadsheets into ordered row records.
//!
//! Workbook formats are detected by extension and read through `calamine`;
//! every other file is treated as comma-delimited text with a header row.
//! Only the first worksheet of a workbook is considered.

use std::collections::HashMap;
use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::{Workbook, XlsxError};
use serde::Serialize;
use serde_json::{Map, Number, Value};
use thiserror::Error;

use crate::models::RowCount;

pub const PREVIEW_ROW_LIMIT: usize = 50;
pub const ROW_COUNT_INSPECTION_LIMIT: usize = 1000;

const WORKBOOK_EXTENSIONS: &[&str] = &["xls", "xlsx", "xlsm", "xlsb", "ods"];
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Error)]
pub enum SpreadsheetError {
    #[error("failed to open workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook contains no worksheets")]
    NoWorksheet,
    #[error("failed to read delimited text: {0}")]
    Delimited(#[from] csv::Error),
    #[error("file has no header row")]
    MissingHeader,
    #[error("failed to build workbook: {0}")]
    Xlsx(#[from] XlsxError),
}

pub type SpreadsheetResult<T> = Result<T, SpreadsheetError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    Workbook,
    Delimited,
}

impl SheetFormat {
    pub fn from_filename(name: &str) -> Self {
        let extension = name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase());
        match extension {
            Some(ext) if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) => SheetFormat::Workbook,
            _ => SheetFormat::Delimited,
        }
    }
}

/// One data row keyed by column name, in column order.
pub type Row = Map<String, Value>;

#[derive(Debug, Clone, Serialize)]
pub struct Sheet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetPreview {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    pub total_rows: usize,
    pub truncated: bool,
}

impl Sheet {
    pub fn into_preview(self, limit: usize) -> SheetPreview {
        let total_rows = self.rows.len();
        let mut rows = self.rows;
        rows.truncate(limit);
        SheetPreview {
            columns: self.columns,
            rows,
            total_rows,
            truncated: total_rows > limit,
        }
    }

    /// Non-empty values of `column`, in row order.
    pub fn column_values<'a>(&'a self, column: &'a str) -> impl Iterator<Item = &'a Value> + 'a {
        self.rows
            .iter()
            .filter_map(move |row| row.get(column))
            .filter(|value| !is_blank(value))
    }
}

pub fn read_sheet(filename: &str, bytes: &[u8]) -> SpreadsheetResult<Sheet> {
    match SheetFormat::from_filename(filename) {
        SheetFormat::Workbook => read_workbook(bytes, None),
        SheetFormat::Delimited => read_delimited(bytes),
    }
}

/// Workbooks are inspected up to [`ROW_COUNT_INSPECTION_LIMIT`] data rows;
/// delimited text counts lines minus the header line.
pub fn count_rows(filename: &str, bytes: &[u8]) -> SpreadsheetResult<RowCount> {
    match SheetFormat::from_filename(filename) {
        SheetFormat::Workbook => {
            let sheet = read_workbook(bytes, Some(ROW_COUNT_INSPECTION_LIMIT))?;
            let inspected = u32::try_from(sheet.rows.len()).unwrap_or(u32::MAX);
            if sheet.rows.len() >= ROW_COUNT_INSPECTION_LIMIT {
                Ok(RowCount::AtLeast(ROW_COUNT_INSPECTION_LIMIT as u32))
            } else {
                Ok(RowCount::Exact(inspected))
            }
        }
        SheetFormat::Delimited => {
            let lines = count_lines(bytes).saturating_sub(1);
            Ok(RowCount::Exact(u32::try_from(lines).unwrap_or(u32::MAX)))
        }
    }
}

/// Two-column example workbook users can model their uploads on.
pub fn sample_workbook() -> SpreadsheetResult<Vec<u8>> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    let rows = [
        ("Name", "Phone"),
        ("John Doe", "9876543210"),
        ("Jane Smith", "9876501234"),
    ];
    for (index, (name, phone)) in rows.iter().enumerate() {
        let row = index as u32;
        worksheet.write_string(row, 0, *name)?;
        worksheet.write_string(row, 1, *phone)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn read_workbook(bytes: &[u8], row_limit: Option<usize>) -> SpreadsheetResult<Sheet> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(SpreadsheetError::NoWorksheet)??;

    let mut lines = range.rows();
    let header = lines.next().ok_or(SpreadsheetError::MissingHeader)?;
    let columns = header_names(header.iter().map(|cell| match cell {
        Data::Empty => String::new(),
        other => other.to_string(),
    }));

    let limit = row_limit.unwrap_or(usize::MAX);
    let mut rows = Vec::new();
    for line in lines {
        if rows.len() >= limit {
            break;
        }
        let values: Vec<Value> = line.iter().map(cell_value).collect();
        if values.iter().all(is_blank) {
            continue;
        }
        rows.push(build_row(&columns, values));
    }

    Ok(Sheet { columns, rows })
}

fn read_delimited(bytes: &[u8]) -> SpreadsheetResult<Sheet> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut records = reader.byte_records();
    let header = records.next().ok_or(SpreadsheetError::MissingHeader)??;
    let columns = header_names(
        header
            .iter()
            .map(|field| String::from_utf8_lossy(field).into_owned()),
    );

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        let values: Vec<Value> = record
            .iter()
            .map(|field| text_value(&String::from_utf8_lossy(field)))
            .collect();
        if values.iter().all(is_blank) {
            continue;
        }
        rows.push(build_row(&columns, values));
    }

    Ok(Sheet { columns, rows })
}

/// Blank headers become `Unnamed: <index>`; repeated names gain a `.<n>`
/// suffix so every column stays addressable.
fn header_names(raw: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    raw.enumerate()
        .map(|(index, name)| {
            let trimmed = name.trim();
            let base = if trimmed.is_empty() {
                format!("Unnamed: {index}")
            } else {
                trimmed.to_string()
            };
            let occurrences = seen.entry(base.clone()).or_insert(0);
            let name = if *occurrences == 0 {
                base
            } else {
                format!("{base}.{occurrences}")
            };
            *occurrences += 1;
            name
        })
        .collect()
}

fn build_row(columns: &[String], values: Vec<Value>) -> Row {
    let mut values = values.into_iter();
    columns
        .iter()
        .map(|column| (column.clone(), values.next().unwrap_or(Value::Null)))
        .collect()
}

fn cell_value(cell: &Data) -> Value {
    match cell {
        Data::Empty | Data::Error(_) => Value::Null,
        Data::String(text) => text_value(text),
        Data::Int(value) => Value::from(*value),
        Data::Float(value) => float_value(*value),
        Data::Bool(value) => Value::Bool(*value),
        other => Value::String(other.to_string()),
    }
}

// Integral floats render without a fractional part so numeric phone cells
// read back as "9876543210", not "9876543210.0".
fn float_value(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < 9.0e15 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn text_value(text: &str) -> Value {
    if text.trim().is_empty() {
        Value::Null
    } else {
        Value::String(text.to_string())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn count_lines(bytes: &[u8]) -> usize {
    if bytes.is_empty() {
        return 0;
    }
    let newlines = bytes.iter().filter(|byte| **byte == b'\n').count();
    if bytes.ends_with(b"\n") {
        newlines
    } else {
        newlines + 1
    }
}
