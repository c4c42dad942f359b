use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::error::AppError;
use crate::spreadsheet::sample_workbook;

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Two-row `Name`/`Phone` workbook showing the expected upload layout.
pub async fn download_sample() -> Response {
    let bytes = match sample_workbook() {
        Ok(bytes) => bytes,
        Err(err) => {
            error!(error = %err, "failed to build sample workbook");
            return AppError::from(err).into_response();
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HeaderValue::from_static(XLSX_CONTENT_TYPE)),
            (
                header::CONTENT_DISPOSITION,
                HeaderValue::from_static("attachment; filename=\"sample.xlsx\""),
            ),
        ],
        bytes,
    )
        .into_response()
}
