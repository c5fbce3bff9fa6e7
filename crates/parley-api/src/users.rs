use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use tracing::info;

use parley_types::api::{JoinRequest, UpdateStatusRequest};
use parley_types::events::{PRESENCE_TOPIC, PresenceEvent, UserStatus};

use crate::AppState;
use crate::error::{ApiError, join_error};
use crate::identity::Identity;

/// POST /users: find-or-create by unique name, bring the user online,
/// and announce the arrival on the presence topic.
pub async fn join(
    State(state): State<AppState>,
    Json(req): Json<JoinRequest>,
) -> Result<StatusCode, ApiError> {
    let db = state.db.clone();
    let row = tokio::task::spawn_blocking(move || {
        db.find_or_create_user(&req.name, req.avatar_url.as_deref())
    })
    .await
    .map_err(join_error)??;

    // The registry publishes the status_change for this transition.
    let registry = state.presence.clone();
    let user_id = row.id;
    let user = tokio::task::spawn_blocking(move || registry.mark_online(user_id))
        .await
        .map_err(join_error)??;

    info!("{} ({}) joined", user.name, user.id);

    // Arrival announcement rides the same topic as status changes.
    state.presence.bus().publish(
        PRESENCE_TOPIC,
        PresenceEvent::UserJoined {
            user: UserStatus::from(&user),
        },
    );

    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /users/update_status: explicit online/offline toggle for the
/// identified user. The registry broadcast makes the change visible to
/// every subscribed client.
pub async fn update_status(
    State(state): State<AppState>,
    Extension(Identity(user_id)): Extension<Identity>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<StatusCode, ApiError> {
    let Some(user_id) = user_id else {
        return Err(ApiError::Unauthorized);
    };

    let registry = state.presence.clone();
    let go_online = req.status == "online";
    tokio::task::spawn_blocking(move || {
        if go_online {
            registry.mark_online(user_id)
        } else {
            registry.mark_offline(user_id)
        }
    })
    .await
    .map_err(join_error)??;

    Ok(StatusCode::OK)
}
