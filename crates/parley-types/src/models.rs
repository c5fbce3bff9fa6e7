use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat participant. `online` and `last_seen_at` are owned by the
/// presence registry; everything else is set once at join time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub avatar_url: Option<String>,
    pub online: bool,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl User {
    /// Display avatar: the stored URL, or a deterministic generated one.
    pub fn avatar(&self) -> String {
        match self.avatar_url.as_deref() {
            Some(url) if !url.is_empty() => url.to_string(),
            _ => generated_avatar_url(&self.name),
        }
    }
}

/// Fallback avatar built from the name's initials.
pub fn generated_avatar_url(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().next())
        .flat_map(|c| c.to_uppercase())
        .collect();
    format!(
        "https://ui-avatars.com/api/?name={}&background=random&size=128",
        urlencoding::encode(&initials)
    )
}

/// A channel message. Append-only: never edited or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub channel: String,
    pub author: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Pagination cursor: `created_at` as epoch seconds. Strictly-older
    /// comparisons against this value drive backward scrolling.
    pub fn cursor(&self) -> i64 {
        self.created_at.timestamp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avatar_prefers_stored_url() {
        let user = User {
            id: 1,
            name: "Alice Smith".into(),
            avatar_url: Some("https://example.com/a.png".into()),
            online: true,
            last_seen_at: None,
        };
        assert_eq!(user.avatar(), "https://example.com/a.png");
    }

    #[test]
    fn avatar_falls_back_to_initials() {
        let user = User {
            id: 1,
            name: "Alice Smith".into(),
            avatar_url: None,
            online: true,
            last_seen_at: None,
        };
        assert_eq!(
            user.avatar(),
            "https://ui-avatars.com/api/?name=AS&background=random&size=128"
        );
        // Empty string behaves like no URL at all.
        let blank = User {
            avatar_url: Some(String::new()),
            ..user
        };
        assert!(blank.avatar().contains("ui-avatars.com"));
    }

    #[test]
    fn fallback_avatar_is_deterministic() {
        assert_eq!(
            generated_avatar_url("bob jones"),
            generated_avatar_url("bob jones")
        );
        assert!(generated_avatar_url("bob jones").contains("name=BJ"));
    }

    #[test]
    fn cursor_is_epoch_seconds() {
        let msg = Message {
            id: 7,
            channel: "general".into(),
            author: "alice".into(),
            content: "hi".into(),
            created_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        assert_eq!(msg.cursor(), 1_700_000_000);
    }
}
