//! Unified config (figment-deserialized from defaults / config.toml / env vars).
//!
//! Three equivalent ways to configure:
//!
//!   config.toml:     [room]
//!                    max_connections = 200
//!
//!   env var:         COLLAB_ROOM__MAX_CONNECTIONS=200   (double underscore = nesting)

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Top-level tunable configuration, deserialized by figment (spec.md §6
/// "Configuration").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub room: RoomFileConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatFileConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoomFileConfig {
    #[serde(default = "default_cleanup_timeout_ms")]
    pub cleanup_timeout_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for RoomFileConfig {
    fn default() -> Self {
        Self { cleanup_timeout_ms: default_cleanup_timeout_ms(), max_connections: default_max_connections() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HeartbeatFileConfig {
    #[serde(default = "default_heartbeat_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HeartbeatFileConfig {
    fn default() -> Self {
        Self { check_interval_ms: default_heartbeat_check_interval_ms(), timeout_ms: default_heartbeat_timeout_ms() }
    }
}

fn default_port() -> u16 {
    0
}
fn default_path() -> String {
    "/rooms".to_string()
}
fn default_health_path() -> String {
    "/health".to_string()
}
fn default_cleanup_timeout_ms() -> u64 {
    30_000
}
fn default_max_connections() -> usize {
    1000
}
fn default_heartbeat_check_interval_ms() -> u64 {
    15_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    45_000
}

/// Build a figment that layers: struct defaults → `config.toml` (if present
/// under `config_dir`) → `COLLAB_*` env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `COLLAB_ROOM__MAX_CONNECTIONS=200` → `room.max_connections = 200`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        providers::{Env, Format, Serialized, Toml},
        Figment,
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("COLLAB_").split("__"))
}

/// Resolved, runtime-facing view of `FileConfig`. Constructed once at
/// startup and shared read-only via `Arc`.
#[derive(Clone, Debug)]
pub struct RoomServerConfig {
    pub port: u16,
    pub path: String,
    pub health_path: String,
    pub cleanup_timeout_ms: u64,
    pub max_connections: usize,
    pub heartbeat_check_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl RoomServerConfig {
    pub fn from_file(fc: &FileConfig) -> Self {
        Self {
            port: fc.port,
            path: normalize_prefix(&fc.path),
            health_path: fc.health_path.clone(),
            cleanup_timeout_ms: fc.room.cleanup_timeout_ms,
            max_connections: fc.room.max_connections,
            heartbeat_check_interval_ms: fc.heartbeat.check_interval_ms,
            heartbeat_timeout_ms: fc.heartbeat.timeout_ms,
        }
    }
}

/// Ensures the configured room path prefix starts with `/` and carries no
/// trailing slash, so route registration and upgrade-path parsing agree.
fn normalize_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let fc = FileConfig::default();
        assert_eq!(fc.path, "/rooms");
        assert_eq!(fc.health_path, "/health");
        assert_eq!(fc.room.cleanup_timeout_ms, 30_000);
        assert_eq!(fc.heartbeat.check_interval_ms, 15_000);
        assert_eq!(fc.heartbeat.timeout_ms, 45_000);
    }

    #[test]
    fn load_config_applies_defaults_with_no_file_present() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.path, "/rooms");
        assert_eq!(fc.room.max_connections, 1000);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[room]\nmax_connections = 5\n").unwrap();
        let fc: FileConfig = load_config(tmp.path()).extract().unwrap();
        assert_eq!(fc.room.max_connections, 5);
    }

    #[test]
    fn normalize_prefix_strips_trailing_slash_and_ensures_leading() {
        assert_eq!(normalize_prefix("/rooms/"), "/rooms");
        assert_eq!(normalize_prefix("rooms"), "/rooms");
        assert_eq!(normalize_prefix("/rooms"), "/rooms");
    }

    #[test]
    fn runtime_config_from_file_carries_values_through() {
        let fc = FileConfig { port: 9000, ..Default::default() };
        let rc = RoomServerConfig::from_file(&fc);
        assert_eq!(rc.port, 9000);
        assert_eq!(rc.max_connections, 1000);
    }
}
