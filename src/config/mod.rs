//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::time::{SIMULATION_TPS, SNAPSHOT_TPS};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,
    /// JSON file holding the tunable balance settings
    pub balance_settings_path: PathBuf,
    /// Game loop settings
    pub game: GameConfig,
}

/// Settings for the authoritative game loop
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Maximum snapshots per second
    pub snapshot_rate: u32,
    /// Heartbeat ping period
    pub heartbeat_interval: Duration,
    /// A connection without an ack for this long is demoted
    pub heartbeat_stale_after: Duration,
    /// Disconnected players are purged after this long
    pub disconnect_retention: Duration,
    /// Seed for the session RNG
    pub seed: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: SIMULATION_TPS,
            snapshot_rate: SNAPSHOT_TPS,
            heartbeat_interval: Duration::from_millis(2_000),
            heartbeat_stale_after: Duration::from_millis(6_000),
            disconnect_retention: Duration::from_secs(300),
            seed: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        };

        let defaults = GameConfig::default();
        let game = GameConfig {
            tick_rate: parse_var("TICK_RATE", defaults.tick_rate)?,
            snapshot_rate: parse_var("SNAPSHOT_RATE", defaults.snapshot_rate)?,
            heartbeat_interval: Duration::from_millis(parse_var(
                "HEARTBEAT_INTERVAL_MS",
                defaults.heartbeat_interval.as_millis() as u64,
            )?),
            heartbeat_stale_after: Duration::from_millis(parse_var(
                "HEARTBEAT_STALE_MS",
                defaults.heartbeat_stale_after.as_millis() as u64,
            )?),
            disconnect_retention: Duration::from_secs(parse_var(
                "DISCONNECT_RETENTION_SECS",
                defaults.disconnect_retention.as_secs(),
            )?),
            seed: match env::var("MATCH_SEED") {
                Ok(raw) => raw
                    .parse()
                    .map_err(|_| ConfigError::Invalid("MATCH_SEED"))?,
                Err(_) => rand::random(),
            },
        };

        if game.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if game.snapshot_rate == 0 {
            return Err(ConfigError::Invalid("SNAPSHOT_RATE"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            balance_settings_path: env::var("BALANCE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/balance_settings.json")),

            game,
        })
    }
}

/// Parse an optional numeric variable, keeping `default` when unset
fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
