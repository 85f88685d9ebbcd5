pub mod messages;
pub mod users;

use std::sync::Arc;

use axum::{Router, routing::get};

use parley_db::Database;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
}

/// REST routes: message history, persisted users, and a liveness probe.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/api/messages", get(messages::get_messages))
        .route("/api/users", get(users::list_users))
}

async fn index() -> &'static str {
    "Parley chat server is running"
}
