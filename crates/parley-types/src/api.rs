use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- Messages --

/// One page of history, oldest first.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    pub messages: Vec<Message>,
    pub total_pages: u64,
    pub current_page: u64,
}
