//! Error taxonomy for `roomweave`.
//!
//! Only the categories from the error-handling design that must propagate as
//! typed `Result`s get an enum variant here (auth failure, resource
//! exhaustion, unrecoverable startup, config). Protocol errors, hook
//! failures, and internal invariant violations are logged and dropped at
//! their call sites rather than modeled as `Result` — see `ws::dispatch`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RoomError {
    #[error("authentication rejected: {0}")]
    Unauthorized(String),

    #[error("room {room} is full ({max} connections)")]
    RoomFull { room: String, max: usize },

    #[error("room id must not be empty")]
    EmptyRoomId,

    #[error("listener failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] figment::Error),
}
