//! `roomweave`: a real-time collaboration room server — connection
//! lifecycle, presence, cursor relay, and an op-based CRDT storage engine
//! (`LiveObject`/`LiveMap`/`LiveList`) behind a WebSocket transport.
//!
//! The `roomweave` binary wires sensible defaults (no auth, no hooks) for
//! running the server standalone. A deployer that needs a real pluggable
//! `AuthHandler` or `Hooks` implementation — neither of which can be
//! expressed as a CLI flag — depends on this crate as a library and calls
//! [`server::serve`] directly, or builds `server::AppState` and
//! `server::build_router` itself for finer control over the axum `Router`
//! (e.g. to mount additional routes alongside the room server).

pub mod clock;
pub mod color;
pub mod config;
pub mod crdt;
pub mod error;
pub mod hooks;
pub mod ids;
pub mod live_state;
pub mod metrics;
pub mod presence;
pub mod room;
pub mod server;
pub mod storage;
pub mod ws;
