use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use crate::Database;
use crate::StoreError;
use crate::models::{MessagePage, MessageRow, UserRow};

/// Page size bounds. Caller-supplied limits outside the range are
/// silently clamped, not rejected.
const MIN_PAGE: i64 = 1;
const MAX_PAGE: i64 = 100;

impl Database {
    // -- Users --

    /// Look up a user by unique name, creating the row on first join.
    pub fn find_or_create_user(
        &self,
        name: &str,
        avatar_url: Option<&str>,
    ) -> Result<UserRow, StoreError> {
        require_present("name", name)?;

        self.with_conn(|conn| {
            if let Some(existing) = query_user_by_name(conn, name)? {
                return Ok(existing);
            }

            conn.execute(
                "INSERT INTO users (name, avatar_url) VALUES (?1, ?2)",
                params![name, avatar_url],
            )?;
            let id = conn.last_insert_rowid();
            query_user_by_id(conn, id)?.ok_or(StoreError::NotFound(id))
        })
    }

    pub fn get_user(&self, id: i64) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| query_user_by_id(conn, id))
    }

    /// Set the online flag and refresh `last_seen_at` in one statement.
    /// Returns the updated row, or `None` if the id doesn't resolve.
    pub fn set_user_online(
        &self,
        id: i64,
        online: bool,
    ) -> Result<Option<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET online = ?2, last_seen_at = datetime('now') WHERE id = ?1",
                params![id, online],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_user_by_id(conn, id)
        })
    }

    /// Refresh `last_seen_at` only; the online flag is untouched.
    /// Returns whether the id resolved to a row.
    pub fn touch_last_seen(&self, id: i64) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET last_seen_at = datetime('now') WHERE id = ?1",
                [id],
            )?;
            Ok(changed > 0)
        })
    }

    /// All users currently marked online, minus `excluding` when given.
    pub fn online_users(&self, excluding: Option<i64>) -> Result<Vec<UserRow>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, avatar_url, online, last_seen_at, created_at
                 FROM users
                 WHERE online = 1 AND (?1 IS NULL OR id <> ?1)
                 ORDER BY name",
            )?;
            let rows = stmt
                .query_map([excluding], map_user_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Messages --

    /// Append a message stamped with the current time.
    pub fn append_message(
        &self,
        channel: &str,
        author: &str,
        content: &str,
    ) -> Result<MessageRow, StoreError> {
        self.append_message_at(channel, author, content, Utc::now())
    }

    /// Append with an explicit timestamp. Used by seed tooling and tests;
    /// production traffic goes through `append_message`.
    pub fn append_message_at(
        &self,
        channel: &str,
        author: &str,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<MessageRow, StoreError> {
        require_present("channel", channel)?;
        require_present("author", author)?;
        require_present("content", content)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (channel, author, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    channel,
                    author,
                    content,
                    created_at.format("%Y-%m-%d %H:%M:%S").to_string()
                ],
            )?;
            let id = conn.last_insert_rowid();
            query_message_by_id(conn, id)?.ok_or(StoreError::NotFound(id))
        })
    }

    /// One page of a backward scroll through a channel.
    ///
    /// With no cursor this is the newest `limit` messages; with a cursor it
    /// is the next `limit` messages strictly older than the cursor second.
    /// The store overfetches one row to learn `has_more` without a count
    /// query, then returns the page in ascending order for display.
    /// `next_cursor` is the cursor of the oldest returned message, present
    /// only while older messages remain.
    pub fn page_messages(
        &self,
        channel: &str,
        cursor: Option<i64>,
        limit: i64,
    ) -> Result<MessagePage, StoreError> {
        let limit = limit.clamp(MIN_PAGE, MAX_PAGE);

        self.with_conn(|conn| {
            let mut rows = query_page(conn, channel, cursor, limit + 1)?;

            let has_more = rows.len() as i64 > limit;
            if has_more {
                rows.truncate(limit as usize);
            }
            rows.reverse();

            let next_cursor = if has_more {
                rows.first().map(|m| m.cursor)
            } else {
                None
            };

            Ok(MessagePage {
                messages: rows,
                has_more,
                next_cursor,
            })
        })
    }
}

fn require_present(field: &'static str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::Validation { field });
    }
    Ok(())
}

const MESSAGE_COLUMNS: &str =
    "id, channel, author, content, created_at, CAST(strftime('%s', created_at) AS INTEGER)";

fn query_page(
    conn: &Connection,
    channel: &str,
    cursor: Option<i64>,
    fetch: i64,
) -> Result<Vec<MessageRow>, StoreError> {
    let rows = match cursor {
        // Strict `<` on the cursor second so a message never repeats
        // across pages.
        Some(cursor) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE channel = ?1 AND created_at < datetime(?2, 'unixepoch')
                 ORDER BY created_at DESC
                 LIMIT ?3"
            ))?;
            stmt.query_map(params![channel, cursor, fetch], map_message_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE channel = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2"
            ))?;
            stmt.query_map(params![channel, fetch], map_message_row)?
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(rows)
}

fn query_message_by_id(conn: &Connection, id: i64) -> Result<Option<MessageRow>, StoreError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"
    ))?;
    let row = stmt.query_row([id], map_message_row).optional()?;
    Ok(row)
}

fn query_user_by_name(conn: &Connection, name: &str) -> Result<Option<UserRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, avatar_url, online, last_seen_at, created_at
         FROM users WHERE name = ?1",
    )?;
    let row = stmt.query_row([name], map_user_row).optional()?;
    Ok(row)
}

fn query_user_by_id(conn: &Connection, id: i64) -> Result<Option<UserRow>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, avatar_url, online, last_seen_at, created_at
         FROM users WHERE id = ?1",
    )?;
    let row = stmt.query_row([id], map_user_row).optional()?;
    Ok(row)
}

fn map_message_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        channel: row.get(1)?,
        author: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        cursor: row.get(5)?,
    })
}

fn map_user_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        avatar_url: row.get(2)?,
        online: row.get(3)?,
        last_seen_at: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, StoreError> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    /// "general" holds 10 messages with cursors 10, 20, ... 100.
    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        for t in (10..=100).step_by(10) {
            db.append_message_at("general", "alice", &format!("msg at {t}"), ts(t as i64))
                .unwrap();
        }
        db
    }

    fn cursors(page: &MessagePage) -> Vec<i64> {
        page.messages.iter().map(|m| m.cursor).collect()
    }

    #[test]
    fn first_page_is_newest_ascending() {
        let db = seeded();
        let page = db.page_messages("general", None, 3).unwrap();
        assert_eq!(cursors(&page), vec![80, 90, 100]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(80));
    }

    #[test]
    fn cursor_continues_backward() {
        let db = seeded();
        let page = db.page_messages("general", Some(80), 3).unwrap();
        assert_eq!(cursors(&page), vec![50, 60, 70]);
        assert!(page.has_more);
        assert_eq!(page.next_cursor, Some(50));
    }

    #[test]
    fn full_walk_yields_every_message_exactly_once() {
        let db = seeded();

        let mut seen = Vec::new();
        let mut page_oldest = Vec::new();
        let mut cursor = None;
        loop {
            let page = db.page_messages("general", cursor, 3).unwrap();
            // Ascending within every page
            let cs = cursors(&page);
            assert!(cs.windows(2).all(|w| w[0] < w[1]));
            if let Some(first) = cs.first() {
                page_oldest.push(*first);
            }
            seen.extend(page.messages.iter().map(|m| m.id));
            if !page.has_more {
                assert_eq!(page.next_cursor, None);
                break;
            }
            cursor = page.next_cursor;
        }

        // Union of all pages equals the full channel, no dups, no gaps
        let unique: BTreeSet<i64> = seen.iter().copied().collect();
        assert_eq!(unique.len(), seen.len());
        assert_eq!(unique.len(), 10);

        // Strictly descending page boundaries across the walk
        assert!(page_oldest.windows(2).all(|w| w[0] > w[1]));
    }

    #[test]
    fn oversized_limit_behaves_like_the_cap() {
        let db = Database::open_in_memory().unwrap();
        for t in 1..=120 {
            db.append_message_at("general", "bob", &format!("m{t}"), ts(t * 10))
                .unwrap();
        }

        let capped = db.page_messages("general", None, 500).unwrap();
        let at_cap = db.page_messages("general", None, 100).unwrap();
        assert_eq!(cursors(&capped), cursors(&at_cap));
        assert_eq!(capped.messages.len(), 100);
        assert!(capped.has_more);
        assert_eq!(capped.next_cursor, at_cap.next_cursor);
    }

    #[test]
    fn tiny_limits_clamp_to_one() {
        let db = seeded();
        for limit in [0, -5] {
            let page = db.page_messages("general", None, limit).unwrap();
            assert_eq!(cursors(&page), vec![100]);
            assert!(page.has_more);
            assert_eq!(page.next_cursor, Some(100));
        }
    }

    #[test]
    fn empty_channel_is_an_empty_page() {
        let db = seeded();
        let page = db.page_messages("nobody-here", None, 20).unwrap();
        assert!(page.messages.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn cursor_before_all_messages_is_empty() {
        let db = seeded();
        let page = db.page_messages("general", Some(5), 20).unwrap();
        assert!(page.messages.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn exact_boundary_page_has_no_next_cursor() {
        let db = seeded();
        // Exactly one message older than 20
        let page = db.page_messages("general", Some(20), 3).unwrap();
        assert_eq!(cursors(&page), vec![10]);
        assert!(!page.has_more);
        assert_eq!(page.next_cursor, None);
    }

    #[test]
    fn append_rejects_blank_fields() {
        let db = Database::open_in_memory().unwrap();
        let err = db.append_message("", "alice", "hi").unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "channel" }));
        let err = db.append_message("general", "  ", "hi").unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "author" }));
        let err = db.append_message("general", "alice", "").unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "content" }));
    }

    #[test]
    fn append_stamps_a_matching_cursor() {
        let db = Database::open_in_memory().unwrap();
        let row = db
            .append_message_at("general", "alice", "hello", ts(1_700_000_000))
            .unwrap();
        assert_eq!(row.cursor, 1_700_000_000);
        assert_eq!(row.into_message().cursor(), 1_700_000_000);
    }

    #[test]
    fn find_or_create_reuses_the_row() {
        let db = Database::open_in_memory().unwrap();
        let first = db.find_or_create_user("alice", None).unwrap();
        let second = db
            .find_or_create_user("alice", Some("https://example.com/a.png"))
            .unwrap();
        assert_eq!(first.id, second.id);
        // avatar_url from the second call is ignored: the row already existed
        assert_eq!(second.avatar_url, None);

        let err = db.find_or_create_user("   ", None).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "name" }));
    }

    #[test]
    fn set_online_misses_unknown_users() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.set_user_online(999, true).unwrap().is_none());
        assert!(!db.touch_last_seen(999).unwrap());
    }

    #[test]
    fn online_users_honors_exclusion() {
        let db = Database::open_in_memory().unwrap();
        let a = db.find_or_create_user("alice", None).unwrap();
        let b = db.find_or_create_user("bob", None).unwrap();
        let c = db.find_or_create_user("carol", None).unwrap();
        db.set_user_online(a.id, true).unwrap();
        db.set_user_online(b.id, true).unwrap();
        db.set_user_online(c.id, false).unwrap();

        let roster = db.online_users(Some(a.id)).unwrap();
        let names: Vec<&str> = roster.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["bob"]);

        let everyone = db.online_users(None).unwrap();
        assert_eq!(everyone.len(), 2);
    }

    #[test]
    fn heartbeat_leaves_online_flag_alone() {
        let db = Database::open_in_memory().unwrap();
        let user = db.find_or_create_user("alice", None).unwrap();
        db.set_user_online(user.id, false).unwrap();
        assert!(db.touch_last_seen(user.id).unwrap());

        let row = db.get_user(user.id).unwrap().unwrap();
        assert!(!row.online);
        assert!(row.last_seen_at.is_some());
    }
}
