use axum::Json;
use axum::extract::{Query, State};
use serde::Deserialize;

use parley_types::api::{HistoryResponse, MessageJson, Pagination};

use crate::AppState;
use crate::error::{ApiError, join_error};

pub const DEFAULT_CHANNEL: &str = "general";

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub channel: Option<String>,
    /// Cursor-based pagination — pass the `cursor` of the oldest message
    /// from the previous page to fetch strictly older messages.
    pub cursor: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    20
}

/// GET /messages: one page of channel history, oldest-first within the
/// page, plus the metadata needed to keep scrolling backward. This layer
/// only normalizes input and shapes the envelope; the paging semantics
/// live in the store.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let channel = query
        .channel
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CHANNEL.to_string());
    let cursor = query.cursor;
    let limit = query.limit;

    // Run the blocking query off the async runtime
    let db = state.db.clone();
    let page = tokio::task::spawn_blocking(move || db.page_messages(&channel, cursor, limit))
        .await
        .map_err(join_error)??;

    let messages: Vec<MessageJson> = page
        .messages
        .into_iter()
        .map(|row| {
            let message = row.into_message();
            let cursor = message.cursor();
            MessageJson {
                id: message.id,
                author: message.author,
                content: message.content,
                created_at: message.created_at,
                cursor,
            }
        })
        .collect();

    Ok(Json(HistoryResponse {
        pagination: Pagination {
            has_more: page.has_more,
            next_cursor: page.next_cursor,
            count: messages.len(),
        },
        messages,
    }))
}
