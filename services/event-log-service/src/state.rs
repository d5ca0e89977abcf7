use std::sync::Arc;

use crate::config::{ErrorStatusMode, EventLogConfig};
use crate::store::EventStore;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn EventStore>,
    pub error_status: ErrorStatusMode,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(store: Arc<dyn EventStore>, config: &EventLogConfig) -> Self {
        Self {
            store,
            error_status: config.error_status,
            body_limit: config.body_limit,
        }
    }
}
