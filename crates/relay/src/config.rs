// Relay server configuration.
//
// Every setting comes from the environment with a default suitable for
// running locally. `PORT` is honoured as a fallback so the relay drops into
// hosts that assign the port that way.

use std::net::SocketAddr;
use std::time::Duration;

use tandem_common::awareness::DEFAULT_AWARENESS_TIMEOUT;
use tandem_common::crdt::document::DEFAULT_PENDING_LIMIT;
use tandem_common::protocol::MAX_FRAME_BYTES;

pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_ROOM_GRACE: Duration = Duration::from_secs(30);

/// Core relay server configuration.
///
/// Constructed via [`RelayConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Listen address (host:port).
    pub listen_addr: SocketAddr,
    /// Log filter directive (e.g. `info`, `tandem_relay=debug`).
    pub log_filter: String,
    pub rooms: RoomSettings,
}

/// Per-room tuning shared by every room the registry creates.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// How long an empty room survives before it is destroyed.
    pub grace_period: Duration,
    /// Presence entries not refreshed within this window are dropped.
    pub awareness_timeout: Duration,
    /// Largest inbound websocket frame; bigger frames close the connection.
    pub max_frame_bytes: usize,
    /// Purge tombstones once every connected peer has caught up.
    pub gc_enabled: bool,
    /// Ops a room document holds back for missing dependencies.
    pub max_pending_ops: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_ROOM_GRACE,
            awareness_timeout: DEFAULT_AWARENESS_TIMEOUT,
            max_frame_bytes: MAX_FRAME_BYTES,
            gc_enabled: true,
            max_pending_ops: DEFAULT_PENDING_LIMIT,
        }
    }
}

impl RelayConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `TANDEM_RELAY_HOST` | `0.0.0.0` |
    /// | `TANDEM_RELAY_PORT` | `PORT`, else `1234` |
    /// | `TANDEM_RELAY_LOG_FILTER` | `info` |
    /// | `TANDEM_RELAY_ROOM_GRACE_MS` | `30000` |
    /// | `TANDEM_RELAY_AWARENESS_TIMEOUT_MS` | `30000` |
    /// | `TANDEM_RELAY_MAX_FRAME_BYTES` | `262144` |
    /// | `TANDEM_RELAY_GC` | `true` |
    /// | `TANDEM_RELAY_MAX_PENDING_OPS` | `4096` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    /// Testable constructor that accepts an environment lookup function.
    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let host = env("TANDEM_RELAY_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env("TANDEM_RELAY_PORT")
            .or_else(|_| env("PORT"))
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let log_filter = env("TANDEM_RELAY_LOG_FILTER").unwrap_or_else(|_| "info".into());

        let defaults = RoomSettings::default();
        let millis = |key: &str, fallback: Duration| {
            env(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };
        let rooms = RoomSettings {
            grace_period: millis("TANDEM_RELAY_ROOM_GRACE_MS", defaults.grace_period),
            awareness_timeout: millis("TANDEM_RELAY_AWARENESS_TIMEOUT_MS", defaults.awareness_timeout),
            max_frame_bytes: env("TANDEM_RELAY_MAX_FRAME_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|bytes: &usize| *bytes > 0)
                .unwrap_or(defaults.max_frame_bytes),
            gc_enabled: env("TANDEM_RELAY_GC")
                .ok()
                .and_then(|v| parse_flag(&v))
                .unwrap_or(defaults.gc_enabled),
            max_pending_ops: env("TANDEM_RELAY_MAX_PENDING_OPS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_pending_ops),
        };

        Self { listen_addr, log_filter, rooms }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
