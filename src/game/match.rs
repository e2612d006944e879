//! Authoritative tick loop
//!
//! `GameMatch` owns the session and multiplexes ticks, heartbeats, inbound
//! messages and shutdown on one task. The per-tick pipeline lives on
//! `SessionState` so it can be driven directly in tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::GameConfig;
use crate::util::time::{secs_until, tick_interval, MatchClock};
use crate::ws::protocol::{RegenKind, ServerMsg};

use super::bots::{decide, pick_upgrade, BotView};
use super::combat::{volley, Bullet, CombatSystem};
use super::leveling::try_level_up;
use super::physics::PhysicsSystem;
use super::player::{Player, PlayerId, Team};
use super::session::{GameMode, MatchPhase, SessionState, ROUND_INTERMISSION_MS};
use super::settings::BalanceSettings;
use super::snapshot::SnapshotBuilder;
use super::upgrades::{apply_upgrade, available_upgrades};
use super::zones::spawn_mirrored_pair;
use super::{InputKind, Outbound, PlayerInput};

const INPUT_QUEUE: usize = 1024;
const OUTBOUND_QUEUE: usize = 256;
/// Regen and shield repair happen at most this often
const REGEN_INTERVAL_MS: u64 = 1_000;

/// Cheap, cloneable handle to the running match
#[derive(Clone)]
pub struct MatchHandle {
    pub input_tx: mpsc::Sender<PlayerInput>,
    pub outbound_tx: broadcast::Sender<Outbound>,
    pub player_count: Arc<AtomicUsize>,
    pub connection_count: Arc<AtomicUsize>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl MatchHandle {
    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Relaxed)
    }

    pub fn connection_count(&self) -> usize {
        self.connection_count.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound_tx.subscribe()
    }

    /// Ask the loop to exit. Safe to call any number of times.
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }
}

/// Match task state
pub struct GameMatch {
    pub state: SessionState,
    input_rx: mpsc::Receiver<PlayerInput>,
    outbound_tx: broadcast::Sender<Outbound>,
    snapshot_builder: SnapshotBuilder,
    player_count: Arc<AtomicUsize>,
    connection_count: Arc<AtomicUsize>,
    shutdown_rx: watch::Receiver<bool>,
    config: GameConfig,
    clock: MatchClock,
}

impl GameMatch {
    pub fn new(config: &GameConfig, settings: BalanceSettings) -> (Self, MatchHandle) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let (outbound_tx, _) = broadcast::channel(OUTBOUND_QUEUE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let player_count = Arc::new(AtomicUsize::new(0));
        let connection_count = Arc::new(AtomicUsize::new(0));

        let handle = MatchHandle {
            input_tx,
            outbound_tx: outbound_tx.clone(),
            player_count: player_count.clone(),
            connection_count: connection_count.clone(),
            shutdown_tx: Arc::new(shutdown_tx),
        };

        let game = Self {
            state: SessionState::new(settings, config),
            input_rx,
            outbound_tx,
            snapshot_builder: SnapshotBuilder::new(config.snapshot_rate),
            player_count,
            connection_count,
            shutdown_rx,
            config: config.clone(),
            clock: MatchClock::new(),
        };

        (game, handle)
    }

    /// Main game loop
    pub async fn run(mut self) {
        info!(
            tick_rate = self.config.tick_rate,
            snapshot_rate = self.config.snapshot_rate,
            seed = self.config.seed,
            "Game loop started"
        );

        let mut ticks = interval(tick_interval(self.config.tick_rate));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticks.tick() => {
                    let now = self.clock.now();
                    self.run_tick(now);
                }
                _ = heartbeat.tick() => {
                    let now = self.clock.now();
                    self.run_heartbeat(now);
                }
                input = self.input_rx.recv() => match input {
                    Some(input) => {
                        let now = self.clock.now();
                        self.handle_input(input, now);
                    }
                    None => {
                        warn!("Input channel closed, stopping game loop");
                        break;
                    }
                },
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!(ticks = self.state.tick, "Game loop stopped");
    }

    /// One simulation step plus a snapshot when due.
    ///
    /// Snapshots never go out more often than the configured rate; discrete
    /// events travel as their own messages.
    pub fn run_tick(&mut self, now: u64) {
        let out = self.state.run_tick(now);
        self.publish(out);
        self.update_counts();

        if self.snapshot_builder.should_send(now) {
            let snapshot = self.snapshot_builder.build(&self.state, now);
            let _ = self.outbound_tx.send(Outbound::broadcast(snapshot));
        }
    }

    fn run_heartbeat(&mut self, now: u64) {
        let ping = self.state.heartbeat_ping(now);
        self.publish(vec![ping]);

        let demoted = self.state.sweep_stale(now);
        let purged = self.state.purge_expired(now);
        if demoted > 0 || purged > 0 {
            debug!(demoted, purged, "Presence sweep");
        }
        self.update_counts();
    }

    fn handle_input(&mut self, input: PlayerInput, now: u64) {
        let PlayerInput { connection, kind } = input;
        let out = match kind {
            InputKind::Connected => vec![self.state.register_connection(connection, now)],
            InputKind::Message(msg) => self.state.apply_message(&connection, msg, now),
            InputKind::Closed => {
                self.state.connection_closed(&connection, now);
                Vec::new()
            }
        };
        self.update_counts();
        self.publish(out);
    }

    fn publish(&self, out: Vec<Outbound>) {
        for msg in out {
            // No subscribers is fine
            let _ = self.outbound_tx.send(msg);
        }
    }

    fn update_counts(&self) {
        self.player_count
            .store(self.state.players.len(), Ordering::Relaxed);
        self.connection_count
            .store(self.state.connections.len(), Ordering::Relaxed);
    }
}

impl SessionState {
    /// Advance the simulation by one tick
    pub fn run_tick(&mut self, now: u64) -> Vec<Outbound> {
        self.tick += 1;
        let mut out = Vec::new();

        if let Some(pending) = self.pending_reset {
            if now >= pending.at {
                self.reset(now);
                if pending.restart {
                    out.extend(self.start(now));
                }
            }
        }

        if self.phase == MatchPhase::Paused || self.players.is_empty() {
            return out;
        }

        self.check_duration(now, &mut out);
        self.update_players(now, &mut out);
        self.update_bullets(now, &mut out);
        self.update_zones(now);
        self.update_rounds(now, &mut out);
        out
    }

    fn check_duration(&mut self, now: u64, out: &mut Vec<Outbound>) {
        if !self.is_active() || self.elapsed_ms(now) < self.duration_ms {
            return;
        }
        match self.mode {
            GameMode::Tdm => {
                let left = self.living_on(Team::Left);
                let right = self.living_on(Team::Right);
                let winner = match left.cmp(&right) {
                    std::cmp::Ordering::Greater => Some(Team::Left),
                    std::cmp::Ordering::Less => Some(Team::Right),
                    std::cmp::Ordering::Equal => None,
                };
                info!(?winner, "Round time expired");
                self.end_round(winner, now, out);
            }
            GameMode::Classic | GameMode::Control => out.push(self.finish(now)),
        }
    }

    fn update_players(&mut self, now: u64, out: &mut Vec<Outbound>) {
        let tdm = self.mode == GameMode::Tdm;
        let active = self.is_active();
        let xp_per_tick = self.settings.xp_passive / self.tick_rate as f32;
        let targets = |team: Team| -> Vec<(f32, f32)> {
            self.players
                .values()
                .filter(|p| p.team == team && (!tdm || p.alive))
                .map(|p| (p.x, p.y))
                .collect()
        };
        let left_targets = targets(Team::Left);
        let right_targets = targets(Team::Right);

        for id in self.sorted_ids() {
            let Some(player) = self.players.get_mut(&id) else {
                continue;
            };
            if tdm && !player.alive {
                continue;
            }

            if let Some(brain) = player.bot {
                let team = player.team;
                let enemies = match team {
                    Team::Left => &right_targets,
                    Team::Right => &left_targets,
                };
                let hostile: Vec<&Bullet> = self.bullets.iter().filter(|b| b.team != team).collect();
                let view = BotView {
                    enemies,
                    hostile_bullets: &hostile,
                    bounds: &self.bounds,
                    now,
                };
                let decision = decide(player, &brain, &view, &mut self.rng);
                player.aim_heading = decision.aim;
                player.move_heading = decision.movement;
                if let Some(brain) = player.bot.as_mut() {
                    brain.next_decision_at = decision.next_decision_at;
                }

                if player.upgrade_points > 0 {
                    let choices = available_upgrades(player, &self.settings);
                    if let Some(kind) = pick_upgrade(brain.behavior, &choices, &mut self.rng) {
                        let _ = apply_upgrade(player, kind, &self.settings);
                    }
                }
            }

            if let Some(heading) = player.move_heading {
                let (x, y) = PhysicsSystem::step(player.x, player.y, heading, player.speed);
                let (x, y) =
                    PhysicsSystem::clamp_to_team_half(x, y, player.radius, player.team, &self.bounds);
                player.x = x;
                player.y = y;
            }

            if active {
                player.exp += xp_per_tick;
            }
            if try_level_up(player, self.level_cap, &self.settings) {
                debug!(player_id = %id, level = player.level, "Level up");
                if let Some(connection) = player.connection.clone() {
                    out.push(Outbound::to(
                        connection,
                        ServerMsg::LevelUp {
                            level: player.level,
                            upgrade_points: player.upgrade_points,
                            available: available_upgrades(player, &self.settings),
                        },
                    ));
                }
            }

            regenerate(player, now, out);

            if active && CombatSystem::can_fire(player.last_shot_at, player.bullet_cooldown_ms, now) {
                let shots = volley(
                    player.team,
                    player.upgrades.more_bullets,
                    player.upgrades.diagonal,
                    self.settings.upgrade_max.diagonal,
                );
                for shot in shots {
                    self.bullets.push(Bullet::fire(player, shot.angle_deg, shot.bounce));
                }
                player.last_shot_at = now;
            }
        }
    }

    fn update_bullets(&mut self, now: u64, out: &mut Vec<Outbound>) {
        let tdm = self.mode == GameMode::Tdm;
        let ids = self.sorted_ids();
        let bullets = std::mem::take(&mut self.bullets);

        for mut bullet in bullets {
            if !bullet.update(&self.bounds) {
                continue;
            }
            let hit = ids.iter().copied().find(|id| {
                self.players.get(id).is_some_and(|p| {
                    p.team != bullet.team && (!tdm || p.alive) && bullet.check_hit(p.x, p.y, p.radius)
                })
            });
            match hit {
                Some(target) => self.resolve_hit(&bullet, target, now, out),
                None => self.bullets.push(bullet),
            }
        }
    }

    fn resolve_hit(&mut self, bullet: &Bullet, target_id: PlayerId, now: u64, out: &mut Vec<Outbound>) {
        let shooter_id = bullet.shooter_id;
        let Some(target) = self.players.get_mut(&target_id) else {
            return;
        };
        let previous = target.last_damaged_by;
        let outcome = CombatSystem::apply_hit(target, bullet.damage, now);
        target.last_damaged_by = Some(shooter_id);
        let (x, y) = (target.x, target.y);
        out.push(Outbound::broadcast(ServerMsg::DamagePopup {
            target_id,
            x,
            y,
            amount: outcome.amount,
            shield: outcome.shield_absorbed,
        }));

        let xp_per_hit = self.settings.xp_per_hit;
        if let Some(shooter) = self.shooter_mut(shooter_id) {
            shooter.exp += xp_per_hit;
            shooter.damage_dealt += outcome.amount;
        }

        if !outcome.killed {
            return;
        }

        let victim_name = match self.players.get_mut(&target_id) {
            Some(victim) => {
                victim.deaths += 1;
                victim.last_damaged_by = None;
                victim.name.clone()
            }
            None => return,
        };

        let assist_id = previous.filter(|id| *id != shooter_id && self.players.contains_key(id));
        if let Some(assist) = assist_id.and_then(|id| self.players.get_mut(&id)) {
            assist.assists += 1;
        }

        let xp_per_kill = self.settings.xp_per_kill;
        let killer_name = match self.shooter_mut(shooter_id) {
            Some(shooter) => {
                shooter.kills += 1;
                shooter.exp += xp_per_kill;
                shooter.name.clone()
            }
            None => String::new(),
        };

        if self.mode == GameMode::Classic && self.phase == MatchPhase::Running {
            match bullet.team {
                Team::Left => self.score_left += 1.0,
                Team::Right => self.score_right += 1.0,
            }
        }

        info!(killer = %killer_name, victim = %victim_name, "Kill");
        out.push(Outbound::broadcast(ServerMsg::Kill {
            killer_id: shooter_id,
            killer_name,
            victim_id: target_id,
            victim_name,
            assist_id,
        }));

        match self.mode {
            GameMode::Tdm => {
                if let Some(victim) = self.players.get_mut(&target_id) {
                    victim.alive = false;
                    victim.move_heading = None;
                }
            }
            GameMode::Classic | GameMode::Control => self.spawn(target_id, now),
        }
    }

    /// Shooter record for crediting a hit, even if it has since disconnected
    fn shooter_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        match self.players.get_mut(&id) {
            Some(player) => Some(player),
            None => self.disconnected.get_mut(&id).map(|e| &mut e.player),
        }
    }

    fn update_zones(&mut self, now: u64) {
        if self.mode != GameMode::Control || !self.is_active() {
            return;
        }

        if self.zones.is_empty() {
            let pair = spawn_mirrored_pair(&self.bounds, &self.zone_settings, now, &mut self.rng);
            debug!(x = pair[0].x, y = pair[0].y, "Control points spawned");
            self.zones.extend(pair);
        }

        let rate = self.tick_rate as f32;
        for zone in &mut self.zones {
            let inside = self
                .players
                .values()
                .filter(|p| p.team == zone.team && zone.contains(p.x, p.y))
                .count();
            let gain = inside as f32 / rate;
            zone.captured += gain;
            match zone.team {
                Team::Left => self.score_left += gain,
                Team::Right => self.score_right += gain,
            }
        }

        let lifetime = self.zone_settings.lifetime_ms;
        self.zones.retain(|zone| !zone.is_spent(now, lifetime));
    }

    fn update_rounds(&mut self, now: u64, out: &mut Vec<Outbound>) {
        if self.mode != GameMode::Tdm || self.phase != MatchPhase::Running || self.force_game_over {
            return;
        }

        if let Some(until) = self.rounds.intermission_until {
            if now >= until {
                self.rounds.intermission_until = None;
                self.rounds.last_countdown = None;
                self.bullets.clear();
                self.started_at = now;
                self.spawn_all(now);
                info!(round = self.rounds.current(), "Round started");
                out.push(Outbound::broadcast(ServerMsg::RoundStart {
                    round: self.rounds.current(),
                    max_rounds: self.rounds.max_rounds,
                }));
            } else {
                let seconds = secs_until(until, now);
                if self.rounds.last_countdown != Some(seconds) {
                    self.rounds.last_countdown = Some(seconds);
                    out.push(Outbound::broadcast(ServerMsg::RoundCountdown { seconds }));
                }
            }
            return;
        }

        if self.team_size(Team::Left) == 0 || self.team_size(Team::Right) == 0 {
            return;
        }
        let winner = match (self.living_on(Team::Left), self.living_on(Team::Right)) {
            (0, 0) => None,
            (0, _) => Some(Team::Right),
            (_, 0) => Some(Team::Left),
            _ => return,
        };
        self.end_round(winner, now, out);
    }

    fn end_round(&mut self, winner: Option<Team>, now: u64, out: &mut Vec<Outbound>) {
        match winner {
            Some(Team::Left) => self.score_left += 1.0,
            Some(Team::Right) => self.score_right += 1.0,
            None => {}
        }
        self.rounds.completed += 1;
        self.bullets.clear();
        info!(round = self.rounds.completed, ?winner, "Round ended");
        out.push(Outbound::broadcast(ServerMsg::RoundEnd {
            round: self.rounds.completed,
            winner,
            score_left: self.score_left.floor() as u32,
            score_right: self.score_right.floor() as u32,
        }));

        if self.rounds.completed >= self.rounds.max_rounds {
            out.push(self.finish(now));
            return;
        }
        self.rounds.intermission_until = Some(now + ROUND_INTERMISSION_MS);
        self.rounds.last_countdown = None;
    }
}

/// Once-a-second lives regen and shield repair
fn regenerate(player: &mut Player, now: u64, out: &mut Vec<Outbound>) {
    if player.regen_rate > 0.0
        && player.lives < player.max_lives
        && now.saturating_sub(player.last_regen_at) >= REGEN_INTERVAL_MS
    {
        let before = player.lives;
        player.lives = (player.lives + player.regen_rate).min(player.max_lives);
        player.last_regen_at = now;
        out.push(Outbound::broadcast(ServerMsg::RegenPopup {
            player_id: player.id,
            x: player.x,
            y: player.y,
            amount: player.lives - before,
            kind: RegenKind::Lives,
        }));
    }

    if player.shield < player.shield_max
        && now.saturating_sub(player.last_shield_repair_at) >= REGEN_INTERVAL_MS
    {
        player.shield += 1;
        player.last_shield_repair_at = now;
        out.push(Outbound::broadcast(ServerMsg::RegenPopup {
            player_id: player.id,
            x: player.x,
            y: player.y,
            amount: 1.0,
            kind: RegenKind::Shield,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::bots::BotBehavior;
    use crate::game::physics::DESPAWN_MARGIN;
    use crate::game::session::tests::{human, session};
    use crate::game::ConnectionHandle;
    use crate::ws::protocol::ClientMsg;
    use std::time::Duration;

    const TICK_MS: f64 = 1000.0 / 60.0;

    fn at(tick: u64) -> u64 {
        (tick as f64 * TICK_MS) as u64
    }

    #[test]
    fn test_two_bot_classic_score_tracks_kills() {
        let mut state = session();
        state.add_bot(Some(Team::Left), Some(BotBehavior::Aggressive), 0);
        state.add_bot(Some(Team::Right), Some(BotBehavior::Aggressive), 0);
        state.start(0);

        let bounds = state.bounds;
        let mut kills_seen = 0;
        for tick in 1..=60 * 90 {
            let out = state.run_tick(at(tick));
            kills_seen += out
                .iter()
                .filter(|o| matches!(o.msg, ServerMsg::Kill { .. }))
                .count();

            let kills: u32 = state.players.values().map(|p| p.kills).sum();
            assert_eq!(state.score_left + state.score_right, kills as f32);
            for bullet in &state.bullets {
                assert!(bounds.contains_with_margin(bullet.x, bullet.y, DESPAWN_MARGIN));
            }
            for player in state.players.values() {
                assert!(player.lives >= 0.0 && player.lives <= player.max_lives);
                assert!(player.shield <= player.shield_max);
                assert!(player.level <= state.level_cap);
            }
        }

        let kills: u32 = state.players.values().map(|p| p.kills).sum();
        assert_eq!(kills as usize, kills_seen);
        assert!(kills > 0, "bots facing each other should score");
    }

    #[test]
    fn test_snapshot_rate_holds_under_streaming_input() {
        let (mut game, handle) = GameMatch::new(&GameConfig::default(), BalanceSettings::default());
        let mut rx = handle.subscribe();
        let conn = ConnectionHandle::new_socket();
        game.handle_input(
            PlayerInput {
                connection: conn.clone(),
                kind: InputKind::Connected,
            },
            0,
        );
        game.handle_input(
            PlayerInput {
                connection: conn.clone(),
                kind: InputKind::Message(ClientMsg::JoinWithName {
                    name: "Pat".to_string(),
                    device: None,
                    device_id: None,
                    skin: None,
                }),
            },
            0,
        );
        game.state.add_bot(Some(Team::Right), Some(BotBehavior::Aggressive), 0);
        game.state.start(0);

        let mut snapshots = 0;
        for tick in 1..=60 {
            let now = at(tick);
            let angle = (tick * 6) as f32;
            game.handle_input(
                PlayerInput {
                    connection: conn.clone(),
                    kind: InputKind::Message(ClientMsg::UpdateHeading { angle: Some(angle) }),
                },
                now,
            );
            game.run_tick(now);
            while let Ok(out) = rx.try_recv() {
                if matches!(out.msg, ServerMsg::GameState(_)) {
                    snapshots += 1;
                }
            }
        }
        // One second of play at 30 snapshots per second
        assert!(snapshots <= 31, "sent {} snapshots", snapshots);
        assert!(snapshots >= 29, "sent {} snapshots", snapshots);
    }

    #[test]
    fn test_classic_match_ends_at_duration() {
        let mut state = session();
        human(&mut state, "A", Team::Left);
        state.start(0);
        let out = state.run_tick(state.duration_ms - 1);
        assert!(out.iter().all(|o| !matches!(o.msg, ServerMsg::MatchEnded(_))));
        let out = state.run_tick(state.duration_ms);
        assert!(out.iter().any(|o| matches!(o.msg, ServerMsg::MatchEnded(_))));
        assert_eq!(state.phase, MatchPhase::Ended);
        assert!(state.bullets.is_empty());
    }

    #[test]
    fn test_tdm_round_end_credits_once() {
        let mut state = session();
        state.mode = GameMode::Tdm;
        let left = human(&mut state, "L", Team::Left);
        let right = human(&mut state, "R", Team::Right);
        state.start(0);

        state.players.get_mut(&right).unwrap().alive = false;
        let out = state.run_tick(16);
        let ends = out
            .iter()
            .filter(|o| matches!(o.msg, ServerMsg::RoundEnd { .. }))
            .count();
        assert_eq!(ends, 1);
        assert_eq!(state.score_left, 1.0);
        assert_eq!(state.rounds.completed, 1);

        let mut countdowns = Vec::new();
        for now in (32..3_000).step_by(16) {
            for o in state.run_tick(now) {
                match o.msg {
                    ServerMsg::RoundEnd { .. } => panic!("round credited twice"),
                    ServerMsg::RoundCountdown { seconds } => countdowns.push(seconds),
                    _ => {}
                }
            }
        }
        assert_eq!(countdowns, vec![3, 2, 1]);
        assert_eq!(state.score_left, 1.0);

        let out = state.run_tick(16 + ROUND_INTERMISSION_MS);
        assert!(out
            .iter()
            .any(|o| matches!(o.msg, ServerMsg::RoundStart { round: 2, .. })));
        assert!(state.players[&left].alive && state.players[&right].alive);
    }

    #[test]
    fn test_tdm_round_limit_ends_match() {
        let mut state = session();
        state.mode = GameMode::Tdm;
        state.rounds.max_rounds = 1;
        human(&mut state, "L", Team::Left);
        let right = human(&mut state, "R", Team::Right);
        state.start(0);

        state.players.get_mut(&right).unwrap().alive = false;
        let out = state.run_tick(16);
        assert!(out.iter().any(|o| matches!(o.msg, ServerMsg::MatchEnded(_))));
        assert_eq!(state.phase, MatchPhase::Ended);
        assert!(state.force_game_over);
    }

    #[test]
    fn test_tdm_waits_for_both_teams() {
        let mut state = session();
        state.mode = GameMode::Tdm;
        let lone = human(&mut state, "L", Team::Left);
        state.start(0);
        state.players.get_mut(&lone).unwrap().alive = false;
        let out = state.run_tick(16);
        assert!(out.iter().all(|o| !matches!(o.msg, ServerMsg::RoundEnd { .. })));
        assert_eq!(state.rounds.completed, 0);
    }

    #[test]
    fn test_level_never_exceeds_cap() {
        let mut state = session();
        let id = human(&mut state, "A", Team::Left);
        let conn = ConnectionHandle::new_socket();
        state.players.get_mut(&id).unwrap().connection = Some(conn.clone());
        state.level_cap = 3;
        state.start(0);

        let mut level_ups = 0;
        for tick in 1..=20 {
            state.players.get_mut(&id).unwrap().exp += 100.0;
            let out = state.run_tick(at(tick));
            level_ups += out
                .iter()
                .filter(|o| o.is_for(&conn) && matches!(o.msg, ServerMsg::LevelUp { .. }))
                .count();
            assert!(state.players[&id].level <= 3);
        }
        assert_eq!(level_ups, 2);
        assert_eq!(state.players[&id].upgrade_points, 2);
    }

    #[test]
    fn test_control_zone_scores_for_occupants() {
        let mut state = session();
        state.mode = GameMode::Control;
        let id = human(&mut state, "A", Team::Left);
        state.start(0);
        state.run_tick(16);
        assert_eq!(state.zones.len(), 2);

        let (x, y) = {
            let zone = state.zones.iter().find(|z| z.team == Team::Left).unwrap();
            (zone.x, zone.y)
        };
        {
            let player = state.players.get_mut(&id).unwrap();
            player.x = x;
            player.y = y;
        }
        let before = state.score_left;
        state.run_tick(32);
        assert!((state.score_left - before - 1.0 / 60.0).abs() < 1e-5);
        assert_eq!(state.score_right, 0.0);

        // Lifetime expiry replaces the pair
        let lifetime = state.zone_settings.lifetime_ms;
        state.run_tick(lifetime + 16);
        state.run_tick(lifetime + 32);
        assert!(state.zones.iter().all(|z| z.spawned_at == lifetime + 32));
    }

    #[test]
    fn test_pause_freezes_entities() {
        let mut state = session();
        let id = human(&mut state, "A", Team::Left);
        state.players.get_mut(&id).unwrap().move_heading = Some(90.0);
        state.start(0);
        state.run_tick(16);
        state.pause(20, false);

        let (x, y) = (state.players[&id].x, state.players[&id].y);
        let bullets = state.bullets.len();
        for tick in 2..50 {
            assert!(state.run_tick(at(tick)).is_empty());
        }
        assert_eq!((state.players[&id].x, state.players[&id].y), (x, y));
        assert_eq!(state.bullets.len(), bullets);
    }

    #[test]
    fn test_pending_reset_runs_after_display_delay() {
        let mut state = session();
        let id = human(&mut state, "A", Team::Left);
        state.start(0);
        state.players.get_mut(&id).unwrap().kills = 2;
        state.end(1_000, true);

        state.run_tick(5_999);
        assert_eq!(state.phase, MatchPhase::Ended);
        state.run_tick(6_000);
        assert_eq!(state.phase, MatchPhase::Running);
        assert_eq!(state.players[&id].kills, 0);
        assert!(state.pending_reset.is_none());
    }

    #[test]
    fn test_shield_and_regen_tick_once_per_second() {
        let mut state = session();
        let id = human(&mut state, "A", Team::Left);
        {
            let player = state.players.get_mut(&id).unwrap();
            player.upgrades.health = 1;
            player.upgrades.shield = 2;
            player.recompute_stats(&state.settings);
            player.lives = 1.0;
            player.shield = 0;
            player.last_regen_at = 0;
            player.last_shield_repair_at = 0;
        }
        state.run_tick(500);
        assert_eq!(state.players[&id].lives, 1.0);
        let out = state.run_tick(1_000);
        let popups = out
            .iter()
            .filter(|o| matches!(o.msg, ServerMsg::RegenPopup { .. }))
            .count();
        assert_eq!(popups, 2);
        assert_eq!(state.players[&id].lives, 2.0);
        assert_eq!(state.players[&id].shield, 1);
        state.run_tick(1_500);
        assert_eq!(state.players[&id].shield, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_welcomes_snapshots_and_stops() {
        let config = GameConfig {
            seed: 1,
            ..GameConfig::default()
        };
        let (game, handle) = GameMatch::new(&config, BalanceSettings::default());
        let mut rx = handle.subscribe();
        let task = tokio::spawn(game.run());

        let conn = ConnectionHandle::new_socket();
        tokio_test::assert_ok!(
            handle
                .input_tx
                .send(PlayerInput {
                    connection: conn.clone(),
                    kind: InputKind::Connected,
                })
                .await
        );

        let (mut welcomed, mut snapshot) = (false, false);
        while !(welcomed && snapshot) {
            let out = rx.recv().await.expect("outbound channel open");
            match out.msg {
                ServerMsg::Welcome { .. } => {
                    assert!(out.is_for(&conn));
                    welcomed = true;
                }
                ServerMsg::GameState(_) => snapshot = true,
                _ => {}
            }
        }
        assert_eq!(handle.connection_count(), 1);
        assert_eq!(handle.player_count(), 0);

        handle.stop();
        handle.stop();
        let finished = tokio::time::timeout(Duration::from_secs(1), task).await;
        assert!(finished.is_ok(), "game loop did not stop");
    }
}
