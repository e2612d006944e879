//! WebSocket protocol message definitions
//! These are the wire types for controller/server communication

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::game::combat::Bullet;
use crate::game::physics::WorldBounds;
use crate::game::player::{DeviceKind, Player, PlayerId, Team};
use crate::game::session::{DisconnectedEntry, GameMode};
use crate::game::upgrades::UpgradeKind;
use crate::game::zones::ControlPoint;

/// Type prefix used on the device-scoped channel
pub const DEVICE_PREFIX: &str = "device:";

/// Messages sent from controllers to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Join (or rejoin) the arena
    JoinWithName {
        name: String,
        #[serde(default)]
        device: Option<DeviceKind>,
        /// Stable per-device id, used to recover a disconnected player
        #[serde(default)]
        device_id: Option<String>,
        #[serde(default)]
        skin: Option<String>,
    },

    /// Movement heading in degrees, `null` to stop
    UpdateHeading {
        angle: Option<f32>,
    },

    /// Spend points on an upgrade category
    Upgrade {
        option: String,
    },

    /// Tunables arrive as loose JSON so junk values can be ignored instead of
    /// failing the whole message
    SetMatchDuration {
        minutes: Value,
    },
    SetLevelCap {
        levels: Value,
    },
    SetRoundLimit {
        rounds: Value,
    },
    SetMode {
        mode: String,
    },
    SetZoneLifetime {
        seconds: Value,
    },
    SetZoneSize {
        percent: Value,
    },
    ReloadSettings {
        settings: HashMap<String, Value>,
    },

    SetBots {
        enable: bool,
        #[serde(default)]
        count: Option<u32>,
    },
    AddBot {
        #[serde(default)]
        team: Option<Team>,
    },

    StartGame,
    PauseGame,
    ResumeGame,
    EndGame,
    RestartGame,

    SetTeam {
        player_id: PlayerId,
        team: Team,
    },
    SwitchTeam {
        #[serde(default)]
        player_id: Option<PlayerId>,
    },
    SetSkin {
        #[serde(default)]
        player_id: Option<PlayerId>,
        skin: String,
    },
    SetBotBehavior {
        player_id: PlayerId,
        behavior: String,
    },
    RemovePlayer {
        player_id: PlayerId,
    },

    HeartbeatAck {
        seq: u64,
    },
    /// App moved to foreground (`true`) or background (`false`)
    ClientActivity {
        active: bool,
    },

    /// Arena dimensions reported by the display
    SetWorldSize {
        width: f32,
        height: f32,
    },
}

/// Messages sent from the server to controllers and displays
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once per transport on connect
    Welcome {
        server_time: u64,
        world: WorldBounds,
    },

    /// Private: the player bound to this connection
    PlayerInfo {
        player_id: PlayerId,
        name: String,
        team: Team,
        device: DeviceKind,
        skin: Option<String>,
    },

    /// Full authoritative state
    GameState(GameStateSnapshot),

    /// Private
    LevelUp {
        level: u32,
        upgrade_points: u32,
        available: Vec<UpgradeKind>,
    },

    Kill {
        killer_id: PlayerId,
        killer_name: String,
        victim_id: PlayerId,
        victim_name: String,
        assist_id: Option<PlayerId>,
    },

    RoundStart {
        round: u32,
        max_rounds: u32,
    },

    RoundEnd {
        round: u32,
        winner: Option<Team>,
        score_left: u32,
        score_right: u32,
    },

    RoundCountdown {
        seconds: u64,
    },

    DamagePopup {
        target_id: PlayerId,
        x: f32,
        y: f32,
        amount: f32,
        shield: bool,
    },

    RegenPopup {
        player_id: PlayerId,
        x: f32,
        y: f32,
        amount: f32,
        kind: RegenKind,
    },

    /// Private: the player was removed by a command
    Kicked {
        reason: String,
    },

    HeartbeatPing {
        seq: u64,
        server_time: u64,
    },

    MatchEnded(MatchResults),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegenKind {
    Lives,
    Shield,
}

/// Everything a display needs to draw one frame
#[derive(Debug, Clone, Serialize)]
pub struct GameStateSnapshot {
    pub tick: u64,
    pub server_time: u64,
    pub players: HashMap<PlayerId, Player>,
    pub disconnected: HashMap<PlayerId, DisconnectedEntry>,
    pub bullets: Vec<Bullet>,
    /// Floored team scores
    pub score_left: u32,
    pub score_right: u32,
    pub mode: GameMode,
    pub round: u32,
    pub max_rounds: u32,
    pub zones: Vec<ControlPoint>,
    pub remaining_secs: u64,
    pub duration_secs: u64,
    pub level_cap: u32,
    pub world: WorldBounds,
    pub paused: bool,
    pub active: bool,
    pub started: bool,
    pub game_over: bool,
}

/// Final standings, broadcast when a match ends
#[derive(Debug, Clone, Serialize)]
pub struct MatchResults {
    pub ended_at: DateTime<Utc>,
    pub mode: GameMode,
    /// Ceiled team scores
    pub score_left: u32,
    pub score_right: u32,
    /// `None` is a draw
    pub winner: Option<Team>,
    pub players: Vec<PlayerResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlayerResult {
    pub player_id: PlayerId,
    pub name: String,
    pub team: Team,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage: f32,
    pub score: u32,
    pub bot: bool,
    pub disconnected: bool,
}

/// Parse an inbound frame. Device-channel frames carry a `device:` prefix on
/// their type, which is stripped first.
pub fn decode_client(text: &str, device_channel: bool) -> Result<ClientMsg, serde_json::Error> {
    if !device_channel {
        return serde_json::from_str(text);
    }

    let mut value: Value = serde_json::from_str(text)?;
    if let Some(Value::String(kind)) = value.get_mut("type") {
        if let Some(stripped) = kind.strip_prefix(DEVICE_PREFIX) {
            *kind = stripped.to_string();
        }
    }
    serde_json::from_value(value)
}

/// Serialize an outbound message, prefixing its type on the device channel
pub fn encode_server(msg: &ServerMsg, device_channel: bool) -> Result<String, serde_json::Error> {
    if !device_channel {
        return serde_json::to_string(msg);
    }

    let mut value = serde_json::to_value(msg)?;
    if let Some(Value::String(kind)) = value.get_mut("type") {
        *kind = format!("{}{}", DEVICE_PREFIX, kind);
    }
    serde_json::to_string(&value)
}
