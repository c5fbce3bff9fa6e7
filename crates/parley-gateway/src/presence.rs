use std::sync::Arc;

use parley_db::{Database, StoreError};
use parley_types::events::{PRESENCE_TOPIC, PresenceEvent, UserStatus};
use parley_types::models::User;

use crate::bus::Bus;

/// Authoritative online/offline state, backed by the users table.
///
/// Every successful online/offline transition publishes exactly one
/// `status_change` on the presence topic from inside the registry;
/// callers never publish status changes themselves, so the broadcast can
/// neither be skipped nor duplicated.
#[derive(Clone)]
pub struct Presence {
    db: Arc<Database>,
    bus: Bus,
}

impl Presence {
    pub fn new(db: Arc<Database>, bus: Bus) -> Self {
        Self { db, bus }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn mark_online(&self, user_id: i64) -> Result<User, StoreError> {
        self.set_status(user_id, true)
    }

    pub fn mark_offline(&self, user_id: i64) -> Result<User, StoreError> {
        self.set_status(user_id, false)
    }

    fn set_status(&self, user_id: i64, online: bool) -> Result<User, StoreError> {
        let row = self
            .db
            .set_user_online(user_id, online)?
            .ok_or(StoreError::NotFound(user_id))?;
        let user = row.into_user();

        self.bus.publish(
            PRESENCE_TOPIC,
            PresenceEvent::StatusChange {
                user: UserStatus::from(&user),
            },
        );

        Ok(user)
    }

    /// Refresh `last_seen_at` without touching the online flag. Silent:
    /// heartbeats are invisible to other clients.
    pub fn heartbeat(&self, user_id: i64) -> Result<(), StoreError> {
        if !self.db.touch_last_seen(user_id)? {
            return Err(StoreError::NotFound(user_id));
        }
        Ok(())
    }

    /// Everyone currently online except `excluding`. Seeds the roster for
    /// a newly subscribed connection.
    pub fn list_online(&self, excluding: Option<i64>) -> Result<Vec<User>, StoreError> {
        Ok(self
            .db
            .online_users(excluding)?
            .into_iter()
            .map(|row| row.into_user())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Subscription;

    fn setup() -> (Presence, Subscription) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let bus = Bus::new();
        let sub = bus.subscribe(PRESENCE_TOPIC);
        (Presence::new(db, bus), sub)
    }

    fn create_user(presence: &Presence, name: &str) -> i64 {
        presence.db.find_or_create_user(name, None).unwrap().id
    }

    fn expect_status(event: PresenceEvent) -> UserStatus {
        match event {
            PresenceEvent::StatusChange { user } => user,
            other => panic!("expected status_change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transitions_publish_exactly_one_event_each() {
        let (presence, mut sub) = setup();
        let id = create_user(&presence, "alice");

        let user = presence.mark_online(id).unwrap();
        assert!(user.online);
        assert!(user.last_seen_at.is_some());

        let status = expect_status(sub.recv().await.unwrap());
        assert_eq!(status.id, id);
        assert!(status.online);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn mark_online_is_idempotent_but_still_broadcasts() {
        let (presence, mut sub) = setup();
        let id = create_user(&presence, "alice");

        presence.mark_online(id).unwrap();
        let second = presence.mark_online(id).unwrap();
        assert!(second.online);

        // One event per call, no more
        assert!(expect_status(sub.recv().await.unwrap()).online);
        assert!(expect_status(sub.recv().await.unwrap()).online);
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn online_then_offline_sequence() {
        let (presence, mut sub) = setup();
        let id = create_user(&presence, "alice");

        presence.mark_online(id).unwrap();
        presence.mark_offline(id).unwrap();

        let first = expect_status(sub.recv().await.unwrap());
        let second = expect_status(sub.recv().await.unwrap());
        assert!(first.online);
        assert!(!second.online);

        let roster = presence.list_online(None).unwrap();
        assert!(roster.iter().all(|u| u.id != id));
    }

    #[tokio::test]
    async fn heartbeat_is_silent() {
        let (presence, mut sub) = setup();
        let id = create_user(&presence, "alice");
        presence.mark_online(id).unwrap();
        let _ = sub.recv().await.unwrap();

        presence.heartbeat(id).unwrap();
        presence.heartbeat(id).unwrap();
        assert!(sub.try_recv().is_err());

        let still_online = presence.list_online(None).unwrap();
        assert_eq!(still_online.len(), 1);
    }

    #[tokio::test]
    async fn unknown_users_do_not_broadcast() {
        let (presence, mut sub) = setup();

        assert!(matches!(
            presence.mark_online(999),
            Err(StoreError::NotFound(999))
        ));
        assert!(matches!(
            presence.heartbeat(999),
            Err(StoreError::NotFound(999))
        ));
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn roster_excludes_the_new_arrival() {
        let (presence, _sub) = setup();
        let alice = create_user(&presence, "alice");
        let bob = create_user(&presence, "bob");
        presence.mark_online(alice).unwrap();
        presence.mark_online(bob).unwrap();

        let roster = presence.list_online(Some(alice)).unwrap();
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].id, bob);
    }
}
