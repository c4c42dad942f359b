use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::state::AppState;

pub mod broadcast;
pub mod checklists;
pub mod flash;
pub mod health;
pub mod sample;
pub mod uploads;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .filter_map(|value| {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                match trimmed.parse::<HeaderValue>() {
                    Ok(origin) => Some(origin),
                    Err(_) => {
                        warn!(origin = %trimmed, "ignoring invalid CORS allowed origin");
                        None
                    }
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(tower_http::cors::AllowMethods::mirror_request())
            .allow_headers(tower_http::cors::AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let uploads_routes = Router::new()
        .route("/", get(uploads::list_uploads).post(uploads::upload_api))
        .route("/bulk-delete", post(uploads::bulk_delete_api))
        .route(
            "/:id",
            get(uploads::get_upload).delete(uploads::delete_upload_api),
        )
        .route("/:id/preview", get(uploads::preview_upload))
        .route("/:id/checklist", get(checklists::checklist_detail));

    let checklists_routes = Router::new()
        .route(
            "/",
            get(checklists::list_checklists).post(checklists::build_checklist),
        )
        .route("/view/:excel_id", get(checklists::checklist_view));

    let interactive_routes = Router::new()
        .route("/", get(uploads::listing_view))
        .route("/uploads", post(uploads::upload_form))
        .route("/uploads/:id/delete", post(uploads::delete_upload_form))
        .route("/uploads/bulk-delete", post(uploads::bulk_delete_form));

    let max_upload_bytes = state.config.max_upload_bytes;

    Router::new()
        .merge(interactive_routes)
        .nest("/api/uploads", uploads_routes)
        .nest("/api/checklists", checklists_routes)
        .route("/api/broadcast", post(broadcast::broadcast))
        .route("/api/sample", get(sample::download_sample))
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_upload_bytes))
}

pub(crate) fn to_iso(dt: NaiveDateTime) -> String {
    DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc).to_rfc3339()
}
