use axum::{Json, extract::State, http::StatusCode};
use tracing::error;

use parley_types::models::User;

use crate::AppState;

/// `GET /api/users`: every persisted user row, oldest connection first.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, StatusCode> {
    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.list_users())
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("failed to list users: {:#}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(rows.into_iter().map(|row| row.into_user()).collect()))
}
