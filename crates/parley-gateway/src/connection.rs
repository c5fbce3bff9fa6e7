use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{info, trace, warn};
use uuid::Uuid;

use parley_types::events::{ClientCommand, PRESENCE_TOPIC, PresenceEvent, UserStatus};

use crate::bus::Subscription;
use crate::presence::Presence;

/// Watchdog interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped,
/// which guarantees offline teardown even for unclean disconnects.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a pending connection may sit idle before it must subscribe.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket connection through its lifecycle:
/// pending (awaiting subscribe) -> connected (event loop) -> terminated.
///
/// `user_id` is the identity resolved by the session collaborator before
/// the upgrade; `None` degrades to an untracked connection that still
/// receives broadcasts but never touches the registry.
pub async fn handle_socket(socket: WebSocket, presence: Presence, user_id: Option<i64>) {
    let conn_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    let topic = match wait_for_subscribe(&mut receiver).await {
        Some(topic) => topic,
        None => {
            info!("connection {} closed before subscribing", conn_id);
            return;
        }
    };

    // Subscribe before going online so no transition published after this
    // point can be missed by this connection.
    let subscription = presence.bus().subscribe(&topic);

    if topic == PRESENCE_TOPIC {
        match user_id {
            Some(uid) => seed_presence(&mut sender, &presence, uid, conn_id).await,
            None => {
                warn!(
                    "connection {}: no resolvable user, presence not tracked",
                    conn_id
                );
            }
        }
    }

    run_session(sender, receiver, subscription, presence.clone(), user_id, conn_id).await;

    // Teardown runs exactly once per connection, clean or not. Last
    // writer wins on the online flag if a reconnect races this.
    if topic == PRESENCE_TOPIC {
        if let Some(uid) = user_id {
            let registry = presence.clone();
            match tokio::task::spawn_blocking(move || registry.mark_offline(uid)).await {
                Ok(Ok(user)) => info!("{} ({}) went offline", user.name, uid),
                Ok(Err(e)) => warn!("connection {}: offline transition failed: {}", conn_id, e),
                Err(e) => warn!("connection {}: offline task failed: {}", conn_id, e),
            }
        }
    }
    info!("connection {} terminated", conn_id);
}

/// Pending state: nothing flows until the client names a topic.
async fn wait_for_subscribe(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    let timeout = tokio::time::timeout(SUBSCRIBE_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(ClientCommand::Subscribe { topic }) =
                    serde_json::from_str::<ClientCommand>(&text)
                {
                    return Some(topic);
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Bring the user online (the registry broadcasts the transition), then
/// unicast the current roster to this socket only. Going through the bus
/// here would replay the whole roster to everyone.
///
/// Every failure in here is non-fatal: registry errors are logged and
/// skipped, and a dead socket is left for the session loop to notice so
/// teardown still runs exactly once.
async fn seed_presence(
    sender: &mut SplitSink<WebSocket, Message>,
    presence: &Presence,
    user_id: i64,
    conn_id: Uuid,
) {
    let registry = presence.clone();
    let user = match tokio::task::spawn_blocking(move || registry.mark_online(user_id)).await {
        Ok(Ok(user)) => user,
        Ok(Err(e)) => {
            warn!("connection {}: online transition failed: {}", conn_id, e);
            return;
        }
        Err(e) => {
            warn!("connection {}: online task failed: {}", conn_id, e);
            return;
        }
    };
    info!("{} ({}) subscribed to presence", user.name, user_id);

    let registry = presence.clone();
    let roster = match tokio::task::spawn_blocking(move || registry.list_online(Some(user_id))).await
    {
        Ok(Ok(users)) => users,
        Ok(Err(e)) => {
            warn!("connection {}: roster query failed: {}", conn_id, e);
            return;
        }
        Err(e) => {
            warn!("connection {}: roster task failed: {}", conn_id, e);
            return;
        }
    };

    for other in &roster {
        let event = PresenceEvent::UserJoined {
            user: UserStatus::from(other),
        };
        let text = serde_json::to_string(&event).unwrap();
        if sender.send(Message::Text(text.into())).await.is_err() {
            warn!("connection {}: roster send failed", conn_id);
            return;
        }
    }
}

/// Connected state: relay bus events out, handle client commands in,
/// and watch liveness, all without blocking any other connection.
async fn run_session(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut subscription: Subscription,
    presence: Presence,
    user_id: Option<i64>,
    conn_id: Uuid,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward broadcasts -> client, with the ping watchdog
    let mut send_task = tokio::spawn(async move {
        let mut watchdog = tokio::time::interval(HEARTBEAT_INTERVAL);
        watchdog.tick().await;
        let mut missed_pongs: u8 = 0;

        loop {
            tokio::select! {
                result = subscription.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("connection {} lagged by {} events", conn_id, n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = watchdog.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_pongs = 0;
                    } else {
                        missed_pongs += 1;
                        if missed_pongs >= 2 {
                            warn!(
                                "connection {}: missed {} pongs, dropping",
                                conn_id, missed_pongs
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from client
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => {
                        if !handle_command(&presence, user_id, conn_id, cmd).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            truncate_for_log(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side ends first takes the other down with it
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Clamp a raw frame for logging without splitting a UTF-8 character.
fn truncate_for_log(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Returns false when the session should end (unsubscribe).
/// Every failure in here is recoverable: log it, keep the socket up.
async fn handle_command(
    presence: &Presence,
    user_id: Option<i64>,
    conn_id: Uuid,
    cmd: ClientCommand,
) -> bool {
    match cmd {
        // Already streaming; repeat subscribes are ignored
        ClientCommand::Subscribe { .. } => true,

        ClientCommand::Message { action } => {
            match action.as_str() {
                "heartbeat" => {
                    let Some(uid) = user_id else {
                        return true;
                    };
                    let registry = presence.clone();
                    match tokio::task::spawn_blocking(move || registry.heartbeat(uid)).await {
                        Ok(Ok(())) => trace!("connection {} heartbeat", conn_id),
                        Ok(Err(e)) => {
                            warn!("connection {}: heartbeat failed: {}", conn_id, e)
                        }
                        Err(e) => {
                            warn!("connection {}: heartbeat task failed: {}", conn_id, e)
                        }
                    }
                }
                other => warn!("connection {}: unknown action {:?}", conn_id, other),
            }
            true
        }

        ClientCommand::Unsubscribe => false,
    }
}
