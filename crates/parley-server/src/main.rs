use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Router, middleware};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::{AppState, AppStateInner, identity, messages, users};
use parley_gateway::bus::Bus;
use parley_gateway::connection;
use parley_gateway::presence::Presence;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let db_path = std::env::var("PARLEY_DB_PATH").unwrap_or_else(|_| "parley.db".into());
    let host = std::env::var("PARLEY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PARLEY_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Shared state: one store, one bus, one registry
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&db_path))?);
    let bus = Bus::new();
    let presence = Presence::new(db.clone(), bus);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        presence: presence.clone(),
    });

    // Routes
    let api_routes = Router::new()
        .route("/messages", get(messages::history))
        .route("/users", post(users::join))
        .route("/users/update_status", patch(users::update_status))
        .layer(middleware::from_fn(identity::resolve_identity))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/cable", get(cable_upgrade))
        .with_state(presence);

    let app = Router::new()
        .route("/up", get(up))
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Liveness probe for load balancers and uptime monitors.
async fn up() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct CableQuery {
    /// User id resolved by the session collaborator upstream; absent for
    /// untracked connections.
    user: Option<i64>,
}

async fn cable_upgrade(
    State(presence): State<Presence>,
    Query(query): Query<CableQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, presence, query.user))
}
