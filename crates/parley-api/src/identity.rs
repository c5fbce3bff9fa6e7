use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Resolved session identity, carried as a request extension.
///
/// Session issuance and verification live in an upstream collaborator;
/// by the time a request reaches these handlers the session has already
/// been translated into a user id, delivered via the `x-user-id` header.
/// Absence is not an error here; handlers that need identity answer
/// 401 themselves, everything else degrades to untracked.
#[derive(Debug, Clone, Copy)]
pub struct Identity(pub Option<i64>);

pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn resolve_identity(mut req: Request, next: Next) -> Response {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok());

    req.extensions_mut().insert(Identity(user_id));
    next.run(req).await
}
