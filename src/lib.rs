pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{Config, SessionTuning};
use crate::services::exam_store::{ExamStore, PgExamStore};
use crate::services::session_registry::SessionRegistry;
use crate::utils::time::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub webhook_secret: Arc<str>,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Self {
        Self::from_parts(
            Arc::new(PgExamStore::new(pool)),
            Arc::new(SystemClock),
            config.tuning.clone(),
            &config.webhook_secret,
        )
    }

    pub fn from_parts(
        store: Arc<dyn ExamStore>,
        clock: Arc<dyn Clock>,
        tuning: SessionTuning,
        webhook_secret: &str,
    ) -> Self {
        Self {
            registry: SessionRegistry::new(store, clock, tuning),
            webhook_secret: Arc::from(webhook_secret),
        }
    }
}
