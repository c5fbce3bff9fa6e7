use serde::{Deserialize, Serialize};

use crate::models::User;

/// The single shared topic carrying all online/offline and roster events.
pub const PRESENCE_TOPIC: &str = "presence";

/// Presence payload as clients see it. The avatar is already resolved
/// through the fallback, so clients never compute it themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStatus {
    pub id: i64,
    pub name: String,
    pub avatar: String,
    pub online: bool,
}

impl From<&User> for UserStatus {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            avatar: user.avatar(),
            online: user.online,
        }
    }
}

/// Events sent over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A user came online or went offline
    StatusChange { user: UserStatus },

    /// A user entered the roster. Broadcast when someone joins, and
    /// unicast to a newly subscribed connection while seeding its roster.
    UserJoined { user: UserStatus },
}

/// Commands sent FROM client TO server over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start streaming a topic to this connection
    Subscribe { topic: String },

    /// Application-level message; `action: "heartbeat"` refreshes liveness
    Message { action: String },

    /// Stop streaming and tear the session down
    Unsubscribe,
}
