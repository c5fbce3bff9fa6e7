//! Database row types — these map directly to SQLite rows.
//! Distinct from the parley-types domain models to keep the DB layer
//! independent; conversion parses the SQLite timestamp strings.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use parley_types::models::{Message, User};

#[derive(Debug)]
pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: Option<String>,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> User {
        let last_seen_at = self.last_seen_at.as_deref().and_then(|raw| {
            let parsed = parse_timestamp(raw);
            if parsed.is_none() {
                warn!("Corrupt last_seen_at '{}' on user {}", raw, self.id);
            }
            parsed
        });

        User {
            id: self.id,
            name: self.name,
            avatar_url: self.avatar_url,
            online: self.online,
            last_seen_at,
        }
    }
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub channel: String,
    pub author: String,
    pub content: String,
    pub created_at: String,
    /// Epoch seconds of `created_at`, computed in SQL.
    pub cursor: i64,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        let created_at = parse_timestamp(&self.created_at).unwrap_or_else(|| {
            warn!(
                "Corrupt created_at '{}' on message {}",
                self.created_at, self.id
            );
            DateTime::default()
        });

        Message {
            id: self.id,
            channel: self.channel,
            author: self.author,
            content: self.content,
            created_at,
        }
    }
}

/// A single page of a backward scroll: ascending within the page, with
/// `next_cursor` present only when older messages remain.
pub struct MessagePage {
    pub messages: Vec<MessageRow>,
    pub has_more: bool,
    pub next_cursor: Option<i64>,
}

/// SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
/// Accept RFC 3339 too, then fall back to naive UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>().ok().or_else(|| {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|ndt| ndt.and_utc())
    })
}
