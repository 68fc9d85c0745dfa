//! Pluggable upgrade-time authentication (spec.md §4.1).
//!
//! Without a handler, `userId`/`displayName` are trusted from query
//! parameters — an explicit development affordance, not a production auth
//! mode (spec.md §9 Open Questions). When both a handler and query
//! parameters are present, the handler wins.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::RoomError;
use crate::ids::UserId;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Upgrade-request metadata available to an auth handler: query parameters
/// and raw header values (already UTF-8 decoded; non-UTF-8 headers are
/// dropped at the transport boundary).
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
}

pub type AuthHandler = Arc<dyn Fn(AuthRequest) -> BoxFuture<Result<Identity, String>> + Send + Sync>;

/// Resolves the connecting client's identity: via `handler` if configured,
/// otherwise from trusted query parameters.
pub async fn resolve_identity(handler: Option<&AuthHandler>, req: AuthRequest) -> Result<Identity, RoomError> {
    if let Some(handler) = handler {
        return handler(req).await.map_err(RoomError::Unauthorized);
    }
    let user_id = req
        .query
        .get("userId")
        .cloned()
        .ok_or_else(|| RoomError::Unauthorized("missing userId query parameter".into()))?;
    let display_name = req.query.get("displayName").cloned().unwrap_or_else(|| user_id.clone());
    Ok(Identity { user_id: UserId::new(user_id), display_name })
}
