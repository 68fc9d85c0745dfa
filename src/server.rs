//! HTTP/WebSocket server: router assembly, the upgrade handler, the
//! heartbeat reaper background task, and graceful shutdown wiring
//! (spec.md §4.1 "Server entry and connection handler", §5 "Cancellation
//! & timeouts").
//!
//! Grounded on the teacher's `main.rs` server loop (axum router built from
//! shared `AppState`, `TraceLayer`/`CorsLayer`, `axum::serve(...)
//! .with_graceful_shutdown(...)`) and `handlers/health.rs`
//! (`health_handler`/`metrics_handler` shape), narrowed to this domain's
//! two routes plus a background sweep task the teacher has no analogue for.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::RoomServerConfig;
use crate::hooks::Hooks;
use crate::ids::RoomId;
use crate::metrics::ServerMetrics;
use crate::room::RoomManager;
use crate::ws::auth::{resolve_identity, AuthHandler, AuthRequest};

/// Shared server state, cloned into every request handler.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<RoomManager>,
    pub hooks: Arc<Hooks>,
    pub config: Arc<RoomServerConfig>,
    pub metrics: Arc<ServerMetrics>,
    pub auth: Option<AuthHandler>,
}

/// Builds the router: `GET <config.path>/{room_id}` upgrades to a room
/// connection, `GET <config.health_path>` is a trivial liveness probe, and
/// `GET <config.path>/../metrics`-independent `/metrics` exposes the
/// counter snapshot.
pub fn build_router(state: AppState) -> Router {
    let ws_route = format!("{}/{{room_id}}", state.config.path);

    Router::new()
        .route(&ws_route, get(upgrade_handler))
        .route(&state.config.health_path, get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(json!({ "status": "ok" })))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.metrics.snapshot())
}

/// Upgrade contract (spec.md §4.1): 400 on an empty room id, 401 on auth
/// rejection, 503 if the room is already at `maxConnections`. All three
/// destroy the socket before the protocol handshake completes, since the
/// rejection happens before `ws.on_upgrade` is called.
async fn upgrade_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    if room_id.is_empty() {
        state.metrics.upgrade_rejected();
        return (StatusCode::BAD_REQUEST, "room id must not be empty").into_response();
    }

    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string())))
        .collect();
    let auth_req = AuthRequest { query, headers: header_map };

    let identity = match resolve_identity(state.auth.as_ref(), auth_req).await {
        Ok(identity) => identity,
        Err(err) => {
            state.metrics.upgrade_rejected();
            return (StatusCode::UNAUTHORIZED, err.to_string()).into_response();
        }
    };

    let room_id = RoomId::new(room_id);
    let room = state.manager.get_or_create(room_id.clone()).await;
    if room.connection_count().await >= state.config.max_connections {
        state.metrics.upgrade_rejected();
        return (StatusCode::SERVICE_UNAVAILABLE, "room is full").into_response();
    }

    let manager = state.manager.clone();
    let hooks = state.hooks.clone();
    let config = state.config.clone();
    let metrics = state.metrics.clone();

    ws.on_upgrade(move |socket| {
        crate::ws::handler::run_connection(socket, room_id, identity, room, manager, hooks, config, metrics)
    })
}

/// Sweeps every tracked room every `interval_ms`, marking connections
/// whose last heartbeat exceeds `timeout_ms` offline and rebroadcasting
/// presence where anything changed (spec.md §4.1 "Heartbeat reaper").
/// Stops as soon as `shutdown` is cancelled.
pub fn spawn_heartbeat_reaper(
    manager: Arc<RoomManager>,
    metrics: Arc<ServerMetrics>,
    interval_ms: u64,
    timeout_ms: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rooms = manager.all_rooms().await;
                    metrics.set_active_rooms(rooms.len() as u64);
                    for room in rooms {
                        if room.reap_stale_heartbeats(timeout_ms).await {
                            let envelope = room.presence_message().await;
                            room.broadcast(&envelope, None).await;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("heartbeat reaper stopping");
                    break;
                }
            }
        }
    })
}

/// Library entry point: builds `AppState`, binds the listener, runs the
/// router and the heartbeat reaper until a shutdown signal arrives, then
/// drains bounded by a safety timeout (spec.md §5 "Cancellation & timeouts").
///
/// This is the concrete extension point for a deployer who needs real
/// pluggable auth or lifecycle hooks (spec.md §7 "optional authentication"):
/// the `roomweave` binary only ever calls this with `auth: None` and
/// `Hooks::default()`, since neither an `AuthHandler` closure nor a `Hooks`
/// callback struct can be expressed as a CLI flag or config value. A
/// production deployment that needs either depends on this crate as a
/// library and calls `server::serve` directly, supplying its own
/// `AuthHandler`/`Hooks` — rather than through the bundled binary.
pub async fn serve(host: &str, config: Arc<RoomServerConfig>, auth: Option<AuthHandler>, hooks: Arc<Hooks>) -> anyhow::Result<()> {
    info!(
        path = %config.path,
        health_path = %config.health_path,
        max_connections = config.max_connections,
        "starting roomweave"
    );

    let manager = RoomManager::new();
    let metrics = Arc::new(ServerMetrics::new());

    let state = AppState { manager: manager.clone(), hooks, config: config.clone(), metrics: metrics.clone(), auth };
    let app = build_router(state);

    let addr = format!("{host}:{}", config.port)
        .parse::<SocketAddr>()
        .map_err(|_| crate::error::RoomError::Bind {
            addr: format!("{host}:{}", config.port),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "host/port must form a valid socket address"),
        })?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| crate::error::RoomError::Bind { addr: addr.to_string(), source })?;
    let actual_addr = listener
        .local_addr()
        .map_err(|source| crate::error::RoomError::Bind { addr: addr.to_string(), source })?;
    info!("roomweave listening on http://{actual_addr}{} (rooms) and http://{actual_addr}{} (health)", config.path, config.health_path);

    let reaper_shutdown = CancellationToken::new();
    let reaper = spawn_heartbeat_reaper(
        manager,
        metrics,
        config.heartbeat_check_interval_ms,
        config.heartbeat_timeout_ms,
        reaper_shutdown.clone(),
    );

    let shutdown_signal = async {
        let ctrl_c = async { tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler") };
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }
        info!("received shutdown signal, draining connections...");
    };

    if let Err(err) = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await {
        warn!("server error during shutdown: {err}");
    }

    reaper_shutdown.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper).await;

    info!("shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FileConfig;

    fn state() -> AppState {
        AppState {
            manager: RoomManager::new(),
            hooks: Arc::new(Hooks::default()),
            config: Arc::new(RoomServerConfig::from_file(&FileConfig::default())),
            metrics: Arc::new(ServerMetrics::new()),
            auth: None,
        }
    }

    #[test]
    fn build_router_registers_the_configured_paths() {
        // Smoke test: router construction must not panic for the default config.
        let _router = build_router(state());
    }

    #[tokio::test]
    async fn upgrade_without_auth_handler_or_user_id_is_rejected_with_401() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let router = build_router(state());
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/rooms/r1")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        // No room was created, since resolve_identity fails before get_or_create.
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn upgrade_against_a_full_room_is_rejected_with_503() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let mut s = state();
        s.config = Arc::new(RoomServerConfig { max_connections: 2, ..(*s.config).clone() });
        let room = s.manager.get_or_create(RoomId::new("r1")).await;
        // Fill the room to config.max_connections so the next upgrade trips the guard.
        for i in 0..s.config.max_connections {
            let presence = crate::presence::PresenceUser::new(&crate::ids::UserId::new(format!("u{i}")), "u".into());
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            room.add_connection(
                crate::room::Connection { id: crate::ids::ConnectionId::new(), user_id: crate::ids::UserId::new(format!("u{i}")), presence, tx },
                s.config.max_connections,
            )
            .await
            .unwrap();
        }

        let router = build_router(s);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/rooms/r1?userId=late")
                    .header("connection", "upgrade")
                    .header("upgrade", "websocket")
                    .header("sec-websocket-version", "13")
                    .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpoint_returns_ok() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let router = build_router(state());
        let response = router.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reaper_rebroadcasts_presence_for_stale_connections() {
        use crate::ids::{ConnectionId, UserId};
        use crate::presence::PresenceUser;
        use crate::room::Connection;
        use tokio::sync::mpsc;

        let manager = RoomManager::new();
        let room = manager.get_or_create(RoomId::new("r1")).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut presence = PresenceUser::new(&UserId::new("alice"), "Alice".into());
        presence.last_heartbeat = 0;
        room.add_connection(Connection { id: ConnectionId::new(), user_id: UserId::new("alice"), presence, tx }, 10)
            .await
            .unwrap();
        rx.try_recv().ok(); // drain nothing expected on join here

        let metrics = Arc::new(ServerMetrics::new());
        let shutdown = CancellationToken::new();
        let handle = spawn_heartbeat_reaper(manager, metrics, 10, 1, shutdown.clone());

        tokio::time::advance(Duration::from_millis(50)).await;
        tokio::task::yield_now().await;
        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"onlineStatus\":\"offline\""));

        shutdown.cancel();
        handle.await.unwrap();
    }
}
