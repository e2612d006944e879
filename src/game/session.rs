//! Session aggregate - everything the match loop owns
//!
//! A single task holds the `SessionState` and hands `&mut` access to the tick
//! pipeline, the command gateway and the presence sweep in turn.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::bots::{BotBehavior, BotBrain, BotNamer};
use super::combat::Bullet;
use super::leveling::{compute_level_cap, MAX_MATCH_MINUTES};
use super::physics::{PhysicsSystem, WorldBounds, CLASSIC_SPAWN_OFFSET, SPAWN_INSET};
use super::player::{DeviceKind, Player, PlayerId, Team};
use super::presence::PresenceConfig;
use super::settings::BalanceSettings;
use super::zones::{ControlPoint, ZoneSettings};
use super::{ConnectionHandle, Outbound};
use crate::config::GameConfig;
use crate::util::time::secs_until;
use crate::ws::protocol::{MatchResults, PlayerResult, ServerMsg};

pub const DEFAULT_DURATION_MS: u64 = 2 * 60 * 1000;
pub const DEFAULT_MAX_ROUNDS: u32 = 5;
pub const MAX_ROUND_LIMIT: u32 = 20;
/// Pause between tdm rounds
pub const ROUND_INTERMISSION_MS: u64 = 3_000;
/// How long results stay on screen before an end/restart resets the session
pub const RESULT_DISPLAY_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameMode {
    #[default]
    Classic,
    Control,
    Tdm,
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GameMode::Classic => "classic",
            GameMode::Control => "control",
            GameMode::Tdm => "tdm",
        })
    }
}

impl FromStr for GameMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classic" => Ok(GameMode::Classic),
            "control" | "zone" | "zones" => Ok(GameMode::Control),
            "tdm" => Ok(GameMode::Tdm),
            other => Err(format!("unknown mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchPhase {
    #[default]
    Idle,
    Running,
    Paused,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    HeartbeatTimeout,
    AppInactive,
    ConnectionClosed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::HeartbeatTimeout => "heartbeat_timeout",
            DisconnectReason::AppInactive => "app_inactive",
            DisconnectReason::ConnectionClosed => "connection_closed",
        })
    }
}

/// A player waiting to reconnect, stats intact
#[derive(Debug, Clone, Serialize)]
pub struct DisconnectedEntry {
    pub player: Player,
    pub disconnected_at: u64,
    pub reason: DisconnectReason,
}

#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub player: Option<PlayerId>,
    pub last_ack: u64,
}

/// Round bookkeeping for tdm
#[derive(Debug, Clone, Default)]
pub struct RoundState {
    pub completed: u32,
    pub max_rounds: u32,
    pub intermission_until: Option<u64>,
    pub last_countdown: Option<u64>,
}

impl RoundState {
    fn new(max_rounds: u32) -> Self {
        Self {
            max_rounds,
            ..Self::default()
        }
    }

    /// 1-based number of the round being played
    pub fn current(&self) -> u32 {
        (self.completed + 1).min(self.max_rounds.max(1))
    }

    fn reset(&mut self) {
        self.completed = 0;
        self.intermission_until = None;
        self.last_countdown = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReset {
    pub at: u64,
    /// Start a fresh match once the reset has run
    pub restart: bool,
}

pub struct SessionState {
    pub settings: BalanceSettings,
    pub bounds: WorldBounds,
    pub players: HashMap<PlayerId, Player>,
    pub disconnected: HashMap<PlayerId, DisconnectedEntry>,
    pub connections: HashMap<ConnectionHandle, ConnectionEntry>,
    pub bullets: Vec<Bullet>,
    pub zones: Vec<ControlPoint>,
    pub zone_settings: ZoneSettings,
    pub score_left: f32,
    pub score_right: f32,
    pub mode: GameMode,
    pub phase: MatchPhase,
    pub started_at: u64,
    pub paused_at: Option<u64>,
    /// Set when the match paused itself because everyone left
    pub auto_paused: bool,
    pub duration_ms: u64,
    pub level_cap: u32,
    pub rounds: RoundState,
    pub force_game_over: bool,
    pub pending_reset: Option<PendingReset>,
    pub presence: PresenceConfig,
    pub heartbeat_seq: u64,
    pub tick_rate: u32,
    pub tick: u64,
    pub rng: ChaCha8Rng,
    pub bot_names: BotNamer,
}

impl SessionState {
    pub fn new(settings: BalanceSettings, config: &GameConfig) -> Self {
        let duration_ms = DEFAULT_DURATION_MS;
        let level_cap = compute_level_cap(duration_ms as f32 / 60_000.0, &settings);
        Self {
            settings,
            bounds: WorldBounds::default(),
            players: HashMap::new(),
            disconnected: HashMap::new(),
            connections: HashMap::new(),
            bullets: Vec::new(),
            zones: Vec::new(),
            zone_settings: ZoneSettings::default(),
            score_left: 0.0,
            score_right: 0.0,
            mode: GameMode::default(),
            phase: MatchPhase::Idle,
            started_at: 0,
            paused_at: None,
            auto_paused: false,
            duration_ms,
            level_cap,
            rounds: RoundState::new(DEFAULT_MAX_ROUNDS),
            force_game_over: false,
            pending_reset: None,
            presence: PresenceConfig::from(config),
            heartbeat_seq: 0,
            tick_rate: config.tick_rate.max(1),
            tick: 0,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            bot_names: BotNamer::new(),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Running, not between tdm rounds and not already decided
    pub fn is_active(&self) -> bool {
        self.phase == MatchPhase::Running
            && !self.force_game_over
            && self.rounds.intermission_until.is_none()
    }

    /// Match (or tdm round) time elapsed, frozen while paused or ended
    pub fn elapsed_ms(&self, now: u64) -> u64 {
        if self.phase == MatchPhase::Idle {
            return 0;
        }
        self.paused_at.unwrap_or(now).saturating_sub(self.started_at)
    }

    pub fn remaining_secs(&self, now: u64) -> u64 {
        if self.phase == MatchPhase::Idle {
            return self.duration_ms / 1000;
        }
        secs_until(self.duration_ms, self.elapsed_ms(now))
    }

    pub fn player_for(&self, connection: &ConnectionHandle) -> Option<PlayerId> {
        self.connections.get(connection).and_then(|c| c.player)
    }

    pub fn team_size(&self, team: Team) -> usize {
        self.players.values().filter(|p| p.team == team).count()
    }

    pub fn living_on(&self, team: Team) -> usize {
        self.players
            .values()
            .filter(|p| p.team == team && p.alive)
            .count()
    }

    /// Team with fewer players; ties go left
    pub fn smaller_team(&self) -> Team {
        if self.team_size(Team::Right) < self.team_size(Team::Left) {
            Team::Right
        } else {
            Team::Left
        }
    }

    pub fn highest_level(&self) -> u32 {
        self.players
            .values()
            .chain(self.disconnected.values().map(|e| &e.player))
            .map(|p| p.level)
            .max()
            .unwrap_or(1)
    }

    /// Player ids in a stable order so a seeded session replays identically
    pub fn sorted_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.players.keys().copied().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Players
    // ------------------------------------------------------------------

    /// Put a player back on its spawn point at full strength
    pub fn spawn(&mut self, id: PlayerId, now: u64) {
        let Some(team) = self.players.get(&id).map(|p| p.team) else {
            return;
        };
        let (x, y) = self.spawn_point(team);
        if let Some(player) = self.players.get_mut(&id) {
            player.x = x;
            player.y = y;
            player.lives = player.max_lives;
            player.shield = player.shield_max;
            player.last_shot_at = now;
            player.last_damaged_by = None;
            player.alive = true;
        }
    }

    fn spawn_point(&mut self, team: Team) -> (f32, f32) {
        match self.mode {
            GameMode::Tdm => self.bounds.random_point_in_half(team, SPAWN_INSET, &mut self.rng),
            GameMode::Classic | GameMode::Control => {
                let x = match team {
                    Team::Left => CLASSIC_SPAWN_OFFSET,
                    Team::Right => self.bounds.width - CLASSIC_SPAWN_OFFSET,
                };
                (x, self.bounds.height / 2.0)
            }
        }
    }

    pub fn spawn_all(&mut self, now: u64) {
        for id in self.sorted_ids() {
            self.spawn(id, now);
        }
    }

    /// Insert a freshly created player and place it
    pub fn add_player(&mut self, player: Player, now: u64) -> PlayerId {
        let id = player.id;
        self.players.insert(id, player);
        self.spawn(id, now);
        id
    }

    pub fn add_bot(&mut self, team: Option<Team>, behavior: Option<BotBehavior>, now: u64) -> PlayerId {
        let team = team.unwrap_or_else(|| self.smaller_team());
        let behavior = behavior.unwrap_or_else(|| BotBehavior::random(&mut self.rng));
        let name = self.bot_names.acquire(&mut self.rng);

        let mut bot = Player::new(PlayerId::new(), name, team, DeviceKind::Pc, &self.settings);
        bot.bot = Some(BotBrain::new(behavior));
        bot.recompute_stats(&self.settings);
        let id = self.add_player(bot, now);
        info!(player_id = %id, team = %team, behavior = %behavior, "Bot added");
        id
    }

    /// Remove a player from the live set or the disconnected table
    pub fn remove_player(&mut self, id: PlayerId) -> Option<Player> {
        let player = self
            .players
            .remove(&id)
            .or_else(|| self.disconnected.remove(&id).map(|e| e.player))?;

        if player.is_bot() {
            self.bot_names.release(&player.name);
        }
        if let Some(conn) = &player.connection {
            if let Some(entry) = self.connections.get_mut(conn) {
                entry.player = None;
            }
        }
        self.bullets.retain(|b| b.shooter_id != id);
        Some(player)
    }

    pub fn remove_bots(&mut self, team: Option<Team>, keep: usize) {
        let mut bots: Vec<PlayerId> = self
            .players
            .values()
            .filter(|p| p.is_bot() && team.map_or(true, |t| p.team == t))
            .map(|p| p.id)
            .collect();
        bots.sort();
        for id in bots.into_iter().skip(keep) {
            self.remove_player(id);
        }
    }

    pub fn set_team(&mut self, id: PlayerId, team: Team, now: u64) -> bool {
        let Some(player) = self.players.get_mut(&id) else {
            return false;
        };
        if player.team == team {
            return false;
        }
        let eliminated = self.mode == GameMode::Tdm && !player.alive;
        player.team = team;
        player.aim_heading = team.forward_degrees();
        player.move_heading = None;
        self.spawn(id, now);
        // Eliminated tdm players sit out the rest of the round on the new side
        if eliminated {
            if let Some(player) = self.players.get_mut(&id) {
                player.alive = false;
            }
        }
        true
    }

    // ------------------------------------------------------------------
    // Match lifecycle
    // ------------------------------------------------------------------

    pub fn start(&mut self, now: u64) -> Vec<Outbound> {
        match self.phase {
            MatchPhase::Running | MatchPhase::Paused => return Vec::new(),
            MatchPhase::Ended => self.reset(now),
            MatchPhase::Idle => {}
        }

        self.phase = MatchPhase::Running;
        self.started_at = now;
        self.paused_at = None;
        self.auto_paused = false;
        self.force_game_over = false;
        self.score_left = 0.0;
        self.score_right = 0.0;
        self.bullets.clear();
        self.zones.clear();
        self.rounds.reset();
        self.spawn_all(now);
        info!(mode = %self.mode, duration_ms = self.duration_ms, "Match started");

        let mut out = Vec::new();
        if self.mode == GameMode::Tdm {
            out.push(Outbound::broadcast(ServerMsg::RoundStart {
                round: self.rounds.current(),
                max_rounds: self.rounds.max_rounds,
            }));
        }
        out
    }

    pub fn pause(&mut self, now: u64, auto: bool) -> bool {
        if self.phase != MatchPhase::Running {
            return false;
        }
        self.phase = MatchPhase::Paused;
        self.paused_at = Some(now);
        self.auto_paused = auto;
        info!(auto, "Match paused");
        true
    }

    /// Resume a paused match, shifting every running clock by the pause length
    pub fn resume(&mut self, now: u64) -> bool {
        if self.phase != MatchPhase::Paused {
            return false;
        }
        let paused_for = self
            .paused_at
            .map(|at| now.saturating_sub(at))
            .unwrap_or(0);

        self.started_at += paused_for;
        if let Some(until) = self.rounds.intermission_until.as_mut() {
            *until += paused_for;
        }
        for zone in &mut self.zones {
            zone.spawned_at += paused_for;
        }
        self.phase = MatchPhase::Running;
        self.paused_at = None;
        self.auto_paused = false;
        info!(paused_for_ms = paused_for, "Match resumed");
        true
    }

    /// Game over: freeze the clock and publish results
    pub fn finish(&mut self, now: u64) -> Outbound {
        self.phase = MatchPhase::Ended;
        self.force_game_over = true;
        self.auto_paused = false;
        if self.paused_at.is_none() {
            self.paused_at = Some(now);
        }
        self.rounds.intermission_until = None;
        self.bullets.clear();

        let results = self.results();
        info!(
            score_left = results.score_left,
            score_right = results.score_right,
            winner = ?results.winner,
            "Match ended"
        );
        Outbound::broadcast(ServerMsg::MatchEnded(results))
    }

    /// End (or restart) on command; the reset waits for the result display
    pub fn end(&mut self, now: u64, restart: bool) -> Vec<Outbound> {
        if self.phase == MatchPhase::Idle {
            if restart {
                self.reset(now);
                return self.start(now);
            }
            return Vec::new();
        }

        let mut out = Vec::new();
        if self.phase != MatchPhase::Ended {
            out.push(self.finish(now));
        }
        self.pending_reset = Some(PendingReset {
            at: now + RESULT_DISPLAY_MS,
            restart,
        });
        out
    }

    /// Back to an idle lobby: scores, bullets, zones and progress cleared
    pub fn reset(&mut self, now: u64) {
        self.phase = MatchPhase::Idle;
        self.started_at = 0;
        self.paused_at = None;
        self.auto_paused = false;
        self.force_game_over = false;
        self.pending_reset = None;
        self.score_left = 0.0;
        self.score_right = 0.0;
        self.bullets.clear();
        self.zones.clear();
        self.disconnected.clear();
        self.rounds.reset();

        for player in self.players.values_mut() {
            player.reset_progress(&self.settings);
        }
        self.spawn_all(now);
        info!("Session reset");
    }

    // ------------------------------------------------------------------
    // Tunables
    // ------------------------------------------------------------------

    pub fn set_duration_minutes(&mut self, minutes: f64) -> bool {
        if !minutes.is_finite() || minutes <= 0.0 {
            return false;
        }
        let minutes = minutes.min(MAX_MATCH_MINUTES as f64);
        self.duration_ms = (minutes * 60_000.0).round() as u64;
        self.recompute_level_cap();
        true
    }

    /// Level cap for the current duration, never below anyone's level
    pub fn recompute_level_cap(&mut self) {
        let cap = compute_level_cap(self.duration_ms as f32 / 60_000.0, &self.settings);
        self.level_cap = cap.max(self.highest_level());
    }

    pub fn set_level_cap(&mut self, levels: f64) -> bool {
        if !levels.is_finite() || levels < 1.0 {
            return false;
        }
        let max = self.settings.upgrade_max.max_level_cap();
        let requested = (levels.floor() as u32).clamp(1, max);
        self.level_cap = requested.max(self.highest_level());
        true
    }

    pub fn set_round_limit(&mut self, rounds: f64) -> bool {
        if !rounds.is_finite() || rounds < 1.0 {
            return false;
        }
        let rounds = (rounds.floor() as u32).clamp(1, MAX_ROUND_LIMIT);
        self.rounds.max_rounds = rounds.max(self.rounds.completed);
        true
    }

    pub fn set_mode(&mut self, mode: GameMode, now: u64) -> bool {
        if self.mode == mode {
            return false;
        }
        self.mode = mode;
        self.zones.clear();
        self.bullets.clear();
        self.rounds.reset();
        self.spawn_all(now);
        info!(mode = %mode, "Game mode changed");
        true
    }

    pub fn set_world_size(&mut self, width: f32, height: f32) -> bool {
        const MIN_SIDE: f32 = 200.0;
        const MAX_SIDE: f32 = 10_000.0;
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return false;
        }
        self.bounds = WorldBounds {
            width: width.clamp(MIN_SIDE, MAX_SIDE),
            height: height.clamp(MIN_SIDE, MAX_SIDE),
        };
        for player in self.players.values_mut() {
            let (x, y) = PhysicsSystem::clamp_to_team_half(
                player.x,
                player.y,
                player.radius,
                player.team,
                &self.bounds,
            );
            player.x = x;
            player.y = y;
        }
        self.zones.clear();
        true
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    pub fn results(&self) -> MatchResults {
        let mut players: Vec<PlayerResult> = self
            .players
            .values()
            .map(|p| player_result(p, false))
            .chain(self.disconnected.values().map(|e| player_result(&e.player, true)))
            .collect();
        players.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));

        let score_left = self.score_left.ceil() as u32;
        let score_right = self.score_right.ceil() as u32;
        let winner = match score_left.cmp(&score_right) {
            std::cmp::Ordering::Greater => Some(Team::Left),
            std::cmp::Ordering::Less => Some(Team::Right),
            std::cmp::Ordering::Equal => {
                let damage = |team: Team| -> f32 {
                    players
                        .iter()
                        .filter(|p| p.team == team)
                        .map(|p| p.damage)
                        .sum()
                };
                let (left, right) = (damage(Team::Left), damage(Team::Right));
                if left > right {
                    Some(Team::Left)
                } else if right > left {
                    Some(Team::Right)
                } else {
                    None
                }
            }
        };

        MatchResults {
            ended_at: Utc::now(),
            mode: self.mode,
            score_left,
            score_right,
            winner,
            players,
        }
    }
}

fn player_result(p: &Player, disconnected: bool) -> PlayerResult {
    PlayerResult {
        player_id: p.id,
        name: p.name.clone(),
        team: p.team,
        kills: p.kills,
        deaths: p.deaths,
        assists: p.assists,
        damage: p.damage_dealt,
        score: p.match_score(),
        bot: p.is_bot(),
        disconnected,
    }
}
