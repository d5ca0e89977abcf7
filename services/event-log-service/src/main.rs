mod app;
mod body;
mod config;
mod error;
mod handlers;
mod models;
mod mongo;
mod state;
mod store;

use std::sync::Arc;

use atlas_common::{bind_listener, init_tracing, shutdown_signal};

use crate::config::EventLogConfig;
use crate::mongo::MongoEventStore;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    let _guards = init_tracing("event-log-service");

    let config = EventLogConfig::from_env();
    // The driver connects lazily; a store that is down only fails inserts.
    let store = MongoEventStore::connect(&config.mongo)
        .await
        .expect("document store client");
    let state = AppState::new(Arc::new(store), &config);

    let app = app::build_router(state);
    let listener = bind_listener(config.port).await;
    tracing::info!("event log RESTful API server started on: {}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("serve");
}
