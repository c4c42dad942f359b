use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Serialize;

use crate::error::AppError;

pub const FLASH_COOKIE_NAME: &str = "sheetcast_flash";
pub const LISTING_PATH: &str = "/";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashLevel {
    Success,
    Warning,
    Error,
}

impl FlashLevel {
    fn as_str(self) -> &'static str {
        match self {
            FlashLevel::Success => "success",
            FlashLevel::Warning => "warning",
            FlashLevel::Error => "error",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(FlashLevel::Success),
            "warning" => Some(FlashLevel::Warning),
            "error" => Some(FlashLevel::Error),
            _ => None,
        }
    }
}

/// One-shot message shown on the next listing view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

impl Flash {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Success,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: FlashLevel::Error,
            message: message.into(),
        }
    }

    fn encode(&self) -> String {
        let raw = format!("{}:{}", self.level.as_str(), self.message);
        utf8_percent_encode(&raw, NON_ALPHANUMERIC).to_string()
    }

    fn decode(value: &str) -> Option<Self> {
        let raw = percent_decode_str(value).decode_utf8_lossy();
        let (level, message) = raw.split_once(':')?;
        Some(Self {
            level: FlashLevel::parse(level)?,
            message: message.to_string(),
        })
    }
}

impl From<AppError> for Flash {
    fn from(err: AppError) -> Self {
        Flash::error(err.message())
    }
}

/// 303 back to the listing view carrying `flash` in a short-lived cookie.
pub fn redirect_with_flash(flash: Flash) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(LOCATION, HeaderValue::from_static(LISTING_PATH));
    headers.insert(SET_COOKIE, build_flash_cookie(&flash));
    (StatusCode::SEE_OTHER, headers).into_response()
}

/// Reads the pending flash, if any, and the header that clears it.
pub fn take_flash(jar: Option<TypedHeader<Cookie>>) -> (Option<Flash>, Option<HeaderValue>) {
    let Some(TypedHeader(cookies)) = jar else {
        return (None, None);
    };
    match cookies.get(FLASH_COOKIE_NAME) {
        Some(value) => (Flash::decode(value), Some(build_clear_flash_cookie())),
        None => (None, None),
    }
}

fn build_flash_cookie(flash: &Flash) -> HeaderValue {
    let mut parts = vec![format!("{}={}", FLASH_COOKIE_NAME, flash.encode())];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Lax".into());
    parts.push("Max-Age=60".into());

    HeaderValue::from_str(&parts.join("; ")).unwrap_or_else(|_| build_clear_flash_cookie())
}

fn build_clear_flash_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "sheetcast_flash=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flash_survives_cookie_encoding() {
        let flash = Flash::success("'contacts.csv' deleted successfully.");
        let encoded = flash.encode();
        assert!(!encoded.contains(' '));
        assert!(!encoded.contains(';'));
        assert_eq!(Flash::decode(&encoded), Some(flash));
    }

    #[test]
    fn rejects_unknown_levels() {
        assert_eq!(Flash::decode("shout%3Ahello"), None);
        assert_eq!(Flash::decode("garbage"), None);
    }

    #[test]
    fn redirect_points_at_listing() {
        let response = redirect_with_flash(Flash::warning("No records selected."));
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[LOCATION], LISTING_PATH);
        let cookie = response.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cookie.starts_with("sheetcast_flash=warning%3A"));
    }
}
