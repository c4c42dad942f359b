use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    messaging::{MessageSender, PhonePolicy},
    storage::FileStorage,
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn FileStorage>,
    pub messenger: Arc<dyn MessageSender>,
    pub phone_policy: PhonePolicy,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        storage: Arc<dyn FileStorage>,
        messenger: Arc<dyn MessageSender>,
    ) -> Self {
        let phone_policy = PhonePolicy::from(&config.messaging);
        Self {
            pool,
            config: Arc::new(config),
            storage,
            messenger,
            phone_policy,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}
