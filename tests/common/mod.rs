use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use sheetcast::config::{AppConfig, MessagingConfig, DEFAULT_MAX_UPLOAD_BYTES};
use sheetcast::db::{self, PgPool};
use sheetcast::messaging::{Delivery, MessageSender, MessagingError};
use sheetcast::routes;
use sheetcast::state::AppState;
use sheetcast::storage::FileStorage;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl FileStorage for FakeStorage {
    async fn put_file(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let mut guard = self.files.lock().await;
        guard.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.files.lock().await;
        guard
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("file {key} missing"))
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let mut guard = self.files.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = format!("{dir}/");
        let guard = self.files.lock().await;
        let mut keys: Vec<String> = guard
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn contains(&self, key: &str) -> bool {
        let guard = self.files.lock().await;
        guard.contains_key(key)
    }
}

/// Records every number it is asked to message. Numbers without a scripted
/// status are accepted with a 200.
#[derive(Default)]
pub struct FakeMessenger {
    statuses: Mutex<HashMap<String, u16>>,
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MessageSender for FakeMessenger {
    async fn send_template(&self, to: &str) -> Result<Delivery, MessagingError> {
        self.sent.lock().await.push(to.to_string());
        let status = self.statuses.lock().await.get(to).copied().unwrap_or(200);
        Ok(Delivery {
            status,
            body: format!("{{\"status\":{status}}}"),
        })
    }
}

impl FakeMessenger {
    #[allow(dead_code)]
    pub async fn respond_with(&self, number: &str, status: u16) {
        self.statuses.lock().await.insert(number.to_string(), status);
    }

    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<String> {
        self.sent.lock().await.clone()
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    messenger: Arc<FakeMessenger>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url,
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            media_root: PathBuf::from("unused"),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            messaging: MessagingConfig {
                endpoint_url: "http://messaging.invalid/v1/messages".to_string(),
                auth_token: "test-token".to_string(),
                default_country_code: "91".to_string(),
                template_name: "hello_world".to_string(),
                template_locale: "en_US".to_string(),
                timeout_seconds: 5,
            },
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let messenger = Arc::new(FakeMessenger::default());
        let storage_for_state: Arc<dyn FileStorage> = storage.clone();
        let messenger_for_state: Arc<dyn MessageSender> = messenger.clone();
        let state = AppState::new(pool, config, storage_for_state, messenger_for_state);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
            messenger,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn messenger(&self) -> Arc<FakeMessenger> {
        self.messenger.clone()
    }

    #[allow(dead_code)]
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn post_form(&self, path: &str, fields: &[(&str, &str)]) -> Result<hyper::Response<Body>> {
        let body = fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body))?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn get_with_cookie(&self, path: &str, cookie: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .header("cookie", cookie)
            .body(Body::empty())?;
        self.send(request).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        self.send(request).await
    }

    /// Multipart upload with a `file` part and, when given, a `source` part.
    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        path: &str,
        filename: &str,
        data: &[u8],
        source: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend(data);
        body.extend(b"\r\n");

        if let Some(source) = source {
            body.extend(format!("--{boundary}\r\n").as_bytes());
            body.extend(b"Content-Disposition: form-data; name=\"source\"\r\n\r\n");
            body.extend(source.as_bytes());
            body.extend(b"\r\n");
        }

        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|err| anyhow!("router error: {err}"))?;
        Ok(response)
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_to_json(body: Body) -> Result<serde_json::Value> {
    let bytes = body_to_vec(body).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute("TRUNCATE TABLE checklists, uploads RESTART IDENTITY CASCADE;")
        .context("failed to truncate tables")?;
    Ok(())
}
