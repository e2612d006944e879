//! Player entity

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bots::BotBrain;
use super::settings::BalanceSettings;
use super::upgrades::{self, UpgradeLevels, BASE_SPEED};
use super::ConnectionHandle;

pub const MAX_NAME_CHARS: usize = 20;
const DEFAULT_NAME: &str = "Player";

/// Stable player identity; survives reconnects, unlike a connection handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Team. `left` is blue, `right` is red.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Left,
    Right,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Left, Team::Right];

    pub fn opposite(self) -> Self {
        match self {
            Team::Left => Team::Right,
            Team::Right => Team::Left,
        }
    }

    /// Direction the team fires in, degrees
    pub fn forward_degrees(self) -> f32 {
        match self {
            Team::Left => 0.0,
            Team::Right => 180.0,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Team::Left => "left",
            Team::Right => "right",
        })
    }
}

/// Controller device a player joined from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Mobile,
    Pc,
}

/// Authoritative player record (humans and bots)
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub device: DeviceKind,
    /// Stable per-device identifier used to recognise reconnects
    pub device_id: Option<String>,
    pub skin: Option<String>,
    pub team: Team,

    // Position and movement
    pub x: f32,
    pub y: f32,
    /// Movement direction in degrees, `None` when standing still
    pub move_heading: Option<f32>,
    /// Facing direction in degrees
    pub aim_heading: f32,
    pub radius: f32,
    /// Pixels per tick
    pub speed: f32,

    // Survivability
    pub lives: f32,
    pub max_lives: f32,
    pub shield: u32,
    pub shield_max: u32,
    /// Lives per second
    pub regen_rate: f32,

    // Progression
    pub level: u32,
    pub exp: f32,
    pub upgrade_points: u32,
    pub upgrades: UpgradeLevels,

    // Weapon
    pub bullet_cooldown_ms: u64,
    pub bullet_damage: f32,
    pub bullet_speed: f32,
    pub bullet_range: f32,

    // Stats
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage_dealt: f32,

    /// Only meaningful in round-based mode
    pub alive: bool,
    pub bot: Option<BotBrain>,
    pub disconnected: bool,
    pub app_inactive: bool,

    pub last_shot_at: u64,
    pub last_shield_repair_at: u64,
    pub last_regen_at: u64,
    pub last_damaged_by: Option<PlayerId>,

    /// Transport currently bound to this player
    #[serde(skip)]
    pub connection: Option<ConnectionHandle>,
}

impl Player {
    pub fn new(
        id: PlayerId,
        name: String,
        team: Team,
        device: DeviceKind,
        settings: &BalanceSettings,
    ) -> Self {
        let mut player = Self {
            id,
            name: sanitize_name(&name),
            device,
            device_id: None,
            skin: None,
            team,
            x: 0.0,
            y: 0.0,
            move_heading: None,
            aim_heading: team.forward_degrees(),
            radius: upgrades::BASE_RADIUS,
            speed: BASE_SPEED,
            lives: upgrades::BASE_LIVES,
            max_lives: upgrades::BASE_LIVES,
            shield: 0,
            shield_max: 0,
            regen_rate: 0.0,
            level: 1,
            exp: 0.0,
            upgrade_points: 0,
            upgrades: UpgradeLevels::default(),
            bullet_cooldown_ms: upgrades::BASE_BULLET_COOLDOWN_MS,
            bullet_damage: upgrades::BASE_BULLET_DAMAGE,
            bullet_speed: upgrades::BASE_BULLET_SPEED,
            bullet_range: upgrades::BASE_BULLET_RANGE,
            kills: 0,
            deaths: 0,
            assists: 0,
            damage_dealt: 0.0,
            alive: true,
            bot: None,
            disconnected: false,
            app_inactive: false,
            last_shot_at: 0,
            last_shield_repair_at: 0,
            last_regen_at: 0,
            last_damaged_by: None,
            connection: None,
        };
        player.recompute_stats(settings);
        player
    }

    pub fn is_bot(&self) -> bool {
        self.bot.is_some()
    }

    /// Rebuild every derived stat from the upgrade counters
    pub fn recompute_stats(&mut self, settings: &BalanceSettings) {
        let levels = self.upgrades;
        self.bullet_damage = upgrades::bullet_damage(levels.damage, settings);
        self.bullet_cooldown_ms = upgrades::bullet_cooldown_ms(levels.more_bullets);
        self.bullet_speed = upgrades::bullet_speed(levels.bullet_speed);
        self.bullet_range = upgrades::bullet_range(levels.bullet_speed);
        self.max_lives = upgrades::max_lives(levels.health);
        self.regen_rate = upgrades::regen_rate(levels.health);
        self.radius = upgrades::player_radius(levels.health);
        self.shield_max = upgrades::shield_max(levels.shield);

        let bonus = self.bot.map(|b| b.behavior.speed_bonus()).unwrap_or(0.0);
        self.speed = BASE_SPEED * upgrades::speed_penalty(levels.health) + bonus;

        self.lives = self.lives.clamp(0.0, self.max_lives);
        self.shield = self.shield.min(self.shield_max);
    }

    /// Wipe progression and stats back to a fresh level-1 player
    pub fn reset_progress(&mut self, settings: &BalanceSettings) {
        self.level = 1;
        self.exp = 0.0;
        self.upgrade_points = 0;
        self.upgrades = UpgradeLevels::default();
        self.kills = 0;
        self.deaths = 0;
        self.assists = 0;
        self.damage_dealt = 0.0;
        self.last_damaged_by = None;
        self.recompute_stats(settings);
        self.lives = self.max_lives;
        self.shield = self.shield_max;
        self.alive = true;
    }

    /// End-of-match ranking score
    pub fn match_score(&self) -> u32 {
        (self.kills as f32 * 50.0 + self.assists as f32 * 10.0 + self.damage_dealt).ceil() as u32
    }
}

/// Trim and cap a display name, substituting a default for blank names
pub fn sanitize_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return DEFAULT_NAME.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}
