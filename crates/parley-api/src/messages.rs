use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::error;

use parley_types::api::MessagePage;
use parley_types::models::{Message, Reactions};

use crate::AppState;

const DEFAULT_PAGE: u64 = 1;
const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 200;

/// Raw query parameters. Parsed leniently: anything missing, non-numeric or
/// below 1 falls back to the default.
#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl MessageQuery {
    pub fn page(&self) -> u64 {
        parse_positive(self.page.as_deref()).unwrap_or(DEFAULT_PAGE)
    }

    pub fn limit(&self) -> u64 {
        parse_positive(self.limit.as_deref())
            .unwrap_or(DEFAULT_LIMIT)
            .min(MAX_LIMIT)
    }
}

fn parse_positive(raw: Option<&str>) -> Option<u64> {
    raw?.trim().parse::<u64>().ok().filter(|n| *n > 0)
}

/// `GET /api/messages?page&limit`: page `n` counts back from the newest
/// message; the messages within a page come back oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let page = query.page();
    let limit = query.limit();
    let skip = (page - 1).saturating_mul(limit).min(i64::MAX as u64);

    // Run all blocking DB queries off the async runtime
    let db = state.db.clone();
    let (rows, reaction_rows, total) = tokio::task::spawn_blocking(move || {
        let rows = db.get_messages_page(skip, limit)?;
        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let reaction_rows = db.get_reactions_for_messages(&message_ids)?;
        let total = db.count_messages()?;
        Ok::<_, anyhow::Error>((rows, reaction_rows, total))
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("failed to load messages: {:#}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let mut reaction_map: HashMap<String, Reactions> = HashMap::new();
    for r in reaction_rows {
        reaction_map.entry(r.message_id).or_default().insert(r.reaction, r.count);
    }

    let mut messages: Vec<Message> = rows
        .into_iter()
        .map(|row| {
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            row.into_message(reactions)
        })
        .collect();
    messages.reverse();

    Ok(Json(MessagePage {
        messages,
        total_pages: total.div_ceil(limit),
        current_page: page,
    }))
}
