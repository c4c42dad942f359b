pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod ingest;
pub mod messaging;
pub mod models;
pub mod routes;
pub mod schema;
pub mod spreadsheet;
pub mod state;
pub mod storage;
pub mod store;

pub use routes::create_router;
