use std::sync::Arc;

use chrono::{DateTime, Utc};

use leitl_domain::config::Config;

use crate::coordinator::Coordinator;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Session registry, event bus, connection hub and context cache.
    pub coordinator: Arc<Coordinator>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            config: coordinator.config.clone(),
            coordinator,
            started_at: Utc::now(),
        }
    }
}
