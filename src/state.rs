use std::sync::Arc;

use sqlx::PgPool;

use crate::config::AppConfig;
use crate::realtime::{ChatHub, ChatStore, PgChatStore};

/// Shared handles passed to every handler and middleware
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub hub: Arc<ChatHub>,
    pub chat_store: Arc<dyn ChatStore>,
}

impl AppState {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let hub = Arc::new(ChatHub::from_config(&config.realtime));
        let chat_store: Arc<dyn ChatStore> = Arc::new(PgChatStore::new(pool.clone()));
        Self {
            pool,
            config: Arc::new(config),
            hub,
            chat_store,
        }
    }
}
