pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/sync", get(routes::sync))
        .route("/cron", get(routes::cron))
        .route("/status", get(routes::status))
        .route("/logs", get(routes::logs))
        .with_state(state)
}
