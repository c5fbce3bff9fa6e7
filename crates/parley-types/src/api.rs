use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// -- Message history --

#[derive(Debug, Serialize)]
pub struct MessageJson {
    pub id: i64,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub cursor: i64,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub has_more: bool,
    pub next_cursor: Option<i64>,
    pub count: usize,
}

/// Envelope for `GET /messages`. `messages` is ascending within the page;
/// `pagination.next_cursor` continues the backward scroll.
#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub messages: Vec<MessageJson>,
    pub pagination: Pagination,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JoinRequest {
    pub name: String,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateStatusRequest {
    /// "online" brings the user online; anything else marks them offline.
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct FieldErrors {
    pub errors: Vec<String>,
}
