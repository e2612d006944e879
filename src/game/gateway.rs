//! Command gateway - applies controller messages to the session
//!
//! Invalid or out-of-range commands are dropped with a debug log; nothing is
//! reported back to the sender.

use serde_json::Value;
use tracing::{debug, info};

use super::bots::BotBehavior;
use super::player::{sanitize_name, DeviceKind, Player, PlayerId, Team};
use super::presence::player_info;
use super::session::{GameMode, SessionState};
use super::settings::numeric;
use super::upgrades::{apply_upgrade, UpgradeKind};
use super::{ConnectionHandle, Outbound};
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Largest bot count `set_bots` will fill a team up to
pub const MAX_BOTS_PER_TEAM: u32 = 8;

impl SessionState {
    /// Apply one inbound message from `connection`
    pub fn apply_message(&mut self, connection: &ConnectionHandle, msg: ClientMsg, now: u64) -> Vec<Outbound> {
        match msg {
            ClientMsg::JoinWithName {
                name,
                device,
                device_id,
                skin,
            } => self.join(connection, &name, device, device_id, skin, now),

            ClientMsg::UpdateHeading { angle } => {
                self.update_heading(connection, angle);
                Vec::new()
            }

            ClientMsg::Upgrade { option } => {
                self.upgrade(connection, &option);
                Vec::new()
            }

            ClientMsg::SetMatchDuration { minutes } => {
                if !with_number(&minutes, |m| self.set_duration_minutes(m)) {
                    debug!(value = %minutes, "Ignored match duration");
                }
                Vec::new()
            }

            ClientMsg::SetLevelCap { levels } => {
                if !with_number(&levels, |l| self.set_level_cap(l)) {
                    debug!(value = %levels, "Ignored level cap");
                }
                Vec::new()
            }

            ClientMsg::SetRoundLimit { rounds } => {
                if !with_number(&rounds, |r| self.set_round_limit(r)) {
                    debug!(value = %rounds, "Ignored round limit");
                }
                Vec::new()
            }

            ClientMsg::SetMode { mode } => {
                match mode.parse::<GameMode>() {
                    Ok(mode) => {
                        self.set_mode(mode, now);
                    }
                    Err(e) => debug!(error = %e, "Ignored mode change"),
                }
                Vec::new()
            }

            ClientMsg::SetZoneLifetime { seconds } => {
                match numeric(&seconds).filter(|s| s.is_finite() && *s > 0.0) {
                    Some(s) => self.zone_settings.set_lifetime_secs(s.round() as u64),
                    None => debug!(value = %seconds, "Ignored zone lifetime"),
                }
                Vec::new()
            }

            ClientMsg::SetZoneSize { percent } => {
                match numeric(&percent).filter(|p| p.is_finite() && *p > 0.0) {
                    Some(p) => {
                        let bounds = self.bounds;
                        self.zone_settings.set_size_percent(p as f32, &bounds);
                    }
                    None => debug!(value = %percent, "Ignored zone size"),
                }
                Vec::new()
            }

            ClientMsg::ReloadSettings { settings } => {
                self.reload_settings(&settings);
                Vec::new()
            }

            ClientMsg::SetBots { enable, count } => {
                self.set_bots(enable, count, now);
                Vec::new()
            }

            ClientMsg::AddBot { team } => {
                self.add_bot(team, None, now);
                Vec::new()
            }

            ClientMsg::StartGame => self.start(now),
            ClientMsg::PauseGame => {
                self.pause(now, false);
                Vec::new()
            }
            ClientMsg::ResumeGame => {
                self.resume(now);
                Vec::new()
            }
            ClientMsg::EndGame => self.end(now, false),
            ClientMsg::RestartGame => self.end(now, true),

            ClientMsg::SetTeam { player_id, team } => {
                self.set_team(player_id, team, now);
                Vec::new()
            }

            ClientMsg::SwitchTeam { player_id } => {
                let target = player_id.or_else(|| self.player_for(connection));
                match target.and_then(|id| self.players.get(&id).map(|p| (id, p.team))) {
                    Some((id, team)) => {
                        self.set_team(id, team.opposite(), now);
                    }
                    None => debug!(connection = %connection, "Ignored team switch"),
                }
                Vec::new()
            }

            ClientMsg::SetSkin { player_id, skin } => {
                let target = player_id.or_else(|| self.player_for(connection));
                if let Some(player) = target.and_then(|id| self.players.get_mut(&id)) {
                    let skin = skin.trim();
                    player.skin = (!skin.is_empty()).then(|| skin.to_string());
                }
                Vec::new()
            }

            ClientMsg::SetBotBehavior { player_id, behavior } => {
                self.set_bot_behavior(player_id, &behavior);
                Vec::new()
            }

            ClientMsg::RemovePlayer { player_id } => self.kick(player_id),

            ClientMsg::HeartbeatAck { .. } => self.acknowledge_heartbeat(connection, now),

            ClientMsg::ClientActivity { active } => self.client_activity(connection, active, now),

            ClientMsg::SetWorldSize { width, height } => {
                if !self.set_world_size(width, height) {
                    debug!(width, height, "Ignored world size");
                }
                Vec::new()
            }
        }
    }

    /// Join, rejoin by device id, or rebind a live player to a new transport
    fn join(
        &mut self,
        connection: &ConnectionHandle,
        name: &str,
        device: Option<DeviceKind>,
        device_id: Option<String>,
        skin: Option<String>,
        now: u64,
    ) -> Vec<Outbound> {
        let device_id = device_id
            .filter(|d| !d.trim().is_empty())
            .or_else(|| connection.device_id().map(str::to_string));

        // Already playing on this transport: treat as a rename
        if let Some(id) = self.player_for(connection) {
            if let Some(player) = self.players.get_mut(&id) {
                player.name = sanitize_name(name);
                if skin.is_some() {
                    player.skin = skin;
                }
                return vec![Outbound::to(connection.clone(), player_info(player))];
            }
        }

        if let Some(device_id) = device_id.as_deref() {
            let parked = self
                .disconnected
                .iter()
                .find(|(_, e)| e.player.device_id.as_deref() == Some(device_id))
                .map(|(id, _)| *id);
            if let Some(id) = parked {
                return self.restore(id, connection.clone(), now).into_iter().collect();
            }

            let live = self
                .players
                .values()
                .find(|p| !p.is_bot() && p.device_id.as_deref() == Some(device_id))
                .map(|p| p.id);
            if let Some(id) = live {
                self.bind(id, connection.clone(), now);
                if let Some(player) = self.players.get_mut(&id) {
                    player.connection = Some(connection.clone());
                    player.name = sanitize_name(name);
                    info!(player_id = %id, connection = %connection, "Player rebound to new connection");
                    return vec![Outbound::to(connection.clone(), player_info(player))];
                }
            }
        }

        let team = self.smaller_team();
        let mut player = Player::new(
            PlayerId::new(),
            name.to_string(),
            team,
            device.unwrap_or_default(),
            &self.settings,
        );
        player.device_id = device_id;
        player.skin = skin;
        player.connection = Some(connection.clone());
        let info = player_info(&player);

        let id = self.add_player(player, now);
        self.bind(id, connection.clone(), now);
        info!(player_id = %id, team = %team, connection = %connection, "Player joined");

        if self.auto_paused {
            self.resume(now);
        }
        vec![Outbound::to(connection.clone(), info)]
    }

    fn update_heading(&mut self, connection: &ConnectionHandle, angle: Option<f32>) {
        let Some(player) = self
            .player_for(connection)
            .and_then(|id| self.players.get_mut(&id))
        else {
            return;
        };
        match angle {
            Some(a) if a.is_finite() => {
                player.move_heading = Some(a);
                player.aim_heading = a;
            }
            Some(_) => debug!(player_id = %player.id, "Ignored non-finite heading"),
            None => player.move_heading = None,
        }
    }

    fn upgrade(&mut self, connection: &ConnectionHandle, option: &str) {
        let Some(player) = self
            .player_for(connection)
            .and_then(|id| self.players.get_mut(&id))
        else {
            return;
        };
        let result = option
            .parse::<UpgradeKind>()
            .and_then(|kind| apply_upgrade(player, kind, &self.settings));
        match result {
            Ok(()) => debug!(player_id = %player.id, upgrade = option, "Upgrade applied"),
            Err(e) => debug!(player_id = %player.id, error = %e, "Upgrade rejected"),
        }
    }

    fn reload_settings(&mut self, overrides: &std::collections::HashMap<String, Value>) {
        let applied = self.settings.apply_overrides(overrides);
        if applied == 0 {
            debug!("Settings reload changed nothing");
            return;
        }

        let caps = self.settings.upgrade_max;
        let players = self
            .players
            .values_mut()
            .chain(self.disconnected.values_mut().map(|e| &mut e.player));
        for player in players {
            player.upgrades.clamp_to(&caps);
            player.recompute_stats(&self.settings);
        }
        self.recompute_level_cap();
        info!(applied, "Balance settings reloaded");
    }

    /// Enable fills each team up to `count` bots; disable removes them all
    fn set_bots(&mut self, enable: bool, count: Option<u32>, now: u64) {
        if !enable {
            self.remove_bots(None, 0);
            return;
        }
        let per_team = count.unwrap_or(1).min(MAX_BOTS_PER_TEAM) as usize;
        for team in Team::ALL {
            let existing = self
                .players
                .values()
                .filter(|p| p.is_bot() && p.team == team)
                .count();
            if existing > per_team {
                self.remove_bots(Some(team), per_team);
            }
            for _ in existing..per_team {
                self.add_bot(Some(team), None, now);
            }
        }
    }

    fn set_bot_behavior(&mut self, id: PlayerId, behavior: &str) {
        let behavior = match behavior.parse::<BotBehavior>() {
            Ok(b) => b,
            Err(e) => {
                debug!(error = %e, "Ignored bot behavior");
                return;
            }
        };
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        let Some(brain) = player.bot.as_mut() else {
            debug!(player_id = %id, "Behavior change for a human ignored");
            return;
        };
        brain.behavior = behavior;
        brain.next_decision_at = 0;
        player.recompute_stats(&self.settings);
    }

    fn kick(&mut self, id: PlayerId) -> Vec<Outbound> {
        let Some(player) = self.remove_player(id) else {
            return Vec::new();
        };
        info!(player_id = %id, name = %player.name, "Player removed");
        match player.connection {
            Some(connection) if !player.is_bot() => vec![Outbound::to(
                connection,
                ServerMsg::Kicked {
                    reason: "removed_by_host".to_string(),
                },
            )],
            _ => Vec::new(),
        }
    }
}

fn with_number(value: &Value, apply: impl FnOnce(f64) -> bool) -> bool {
    numeric(value).map(apply).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::session::tests::session;
    use crate::game::session::{DisconnectReason, MatchPhase};
    use crate::ws::protocol::decode_client;
    use serde_json::json;

    fn send(state: &mut SessionState, conn: &ConnectionHandle, raw: Value, now: u64) -> Vec<Outbound> {
        let msg = decode_client(&raw.to_string(), false).unwrap();
        state.apply_message(conn, msg, now)
    }

    fn join(state: &mut SessionState, name: &str, device_id: &str) -> (ConnectionHandle, PlayerId) {
        let conn = ConnectionHandle::new_socket();
        state.register_connection(conn.clone(), 0);
        let out = send(
            state,
            &conn,
            json!({"type": "join_with_name", "name": name, "device_id": device_id}),
            0,
        );
        let id = match &out[0].msg {
            ServerMsg::PlayerInfo { player_id, .. } => *player_id,
            other => panic!("expected player info, got {:?}", other),
        };
        assert!(out[0].is_for(&conn));
        (conn, id)
    }

    #[test]
    fn test_join_balances_teams() {
        let mut state = session();
        let (_, a) = join(&mut state, "A", "dev-a");
        let (_, b) = join(&mut state, "B", "dev-b");
        assert_eq!(state.players[&a].team, Team::Left);
        assert_eq!(state.players[&b].team, Team::Right);
    }

    #[test]
    fn test_rejoin_by_device_restores_progress() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        {
            let player = state.players.get_mut(&id).unwrap();
            player.kills = 4;
            player.upgrades.health = 1;
        }
        state.connection_closed(&conn, 100);
        assert_eq!(state.disconnected[&id].reason, DisconnectReason::ConnectionClosed);

        let (new_conn, rejoined) = join(&mut state, "A again", "dev-a");
        assert_eq!(rejoined, id);
        let player = &state.players[&id];
        assert_eq!(player.kills, 4);
        assert_eq!(player.upgrades.health, 1);
        assert_eq!(player.connection.as_ref(), Some(&new_conn));
        assert!(state.disconnected.is_empty());
    }

    #[test]
    fn test_overlapping_device_sockets_keep_player_live() {
        let mut state = session();
        let old = ConnectionHandle::new_device("phone-1");
        state.register_connection(old.clone(), 0);
        send(&mut state, &old, json!({"type": "join_with_name", "name": "Pat"}), 0);
        let id = state.player_for(&old).unwrap();

        // Phone reconnects before the old socket reports closed
        let new = ConnectionHandle::new_device("phone-1");
        assert_ne!(old, new);
        state.register_connection(new.clone(), 1_000);
        let out = send(&mut state, &new, json!({"type": "join_with_name", "name": "Pat"}), 1_000);
        assert!(out[0].is_for(&new));
        assert!(!out[0].is_for(&old));
        assert_eq!(state.player_for(&new), Some(id));

        state.connection_closed(&old, 1_500);
        assert!(state.players.contains_key(&id));
        assert!(state.disconnected.is_empty());
        assert_eq!(state.connections.len(), 1);
        assert_eq!(state.player_for(&new), Some(id));

        // Acks on the new socket keep the player from going stale
        state.acknowledge_heartbeat(&new, 6_000);
        assert_eq!(state.sweep_stale(9_000), 0);
        assert!(state.players.contains_key(&id));
        assert_eq!(state.players.len(), 1);
    }

    #[test]
    fn test_heading_sets_move_and_aim() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        send(&mut state, &conn, json!({"type": "update_heading", "angle": 90.0}), 1);
        assert_eq!(state.players[&id].move_heading, Some(90.0));
        assert_eq!(state.players[&id].aim_heading, 90.0);
        send(&mut state, &conn, json!({"type": "update_heading", "angle": null}), 2);
        assert_eq!(state.players[&id].move_heading, None);
        assert_eq!(state.players[&id].aim_heading, 90.0);
    }

    #[test]
    fn test_upgrade_command() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        state.players.get_mut(&id).unwrap().upgrade_points = 1;
        send(&mut state, &conn, json!({"type": "upgrade", "option": "teleport"}), 1);
        assert_eq!(state.players[&id].upgrade_points, 1);
        send(&mut state, &conn, json!({"type": "upgrade", "option": "bulletSpeed"}), 1);
        assert_eq!(state.players[&id].upgrades.bullet_speed, 1);
        assert_eq!(state.players[&id].upgrade_points, 0);
    }

    #[test]
    fn test_non_numeric_duration_ignored() {
        let mut state = session();
        let conn = ConnectionHandle::new_socket();
        let before = state.duration_ms;
        send(&mut state, &conn, json!({"type": "set_match_duration", "minutes": "soon"}), 0);
        assert_eq!(state.duration_ms, before);
        send(&mut state, &conn, json!({"type": "set_match_duration", "minutes": "3"}), 0);
        assert_eq!(state.duration_ms, 180_000);
        send(&mut state, &conn, json!({"type": "set_match_duration", "minutes": 30}), 0);
        assert_eq!(state.duration_ms, 600_000);
    }

    #[test]
    fn test_set_bots_fills_and_clears() {
        let mut state = session();
        let conn = ConnectionHandle::new_socket();
        send(&mut state, &conn, json!({"type": "set_bots", "enable": true, "count": 2}), 0);
        assert_eq!(state.team_size(Team::Left), 2);
        assert_eq!(state.team_size(Team::Right), 2);
        send(&mut state, &conn, json!({"type": "set_bots", "enable": true, "count": 1}), 0);
        assert_eq!(state.players.len(), 2);
        send(&mut state, &conn, json!({"type": "set_bots", "enable": false}), 0);
        assert!(state.players.is_empty());
    }

    #[test]
    fn test_bot_behavior_switch() {
        let mut state = session();
        let conn = ConnectionHandle::new_socket();
        let id = state.add_bot(Some(Team::Left), Some(BotBehavior::Defensive), 0);
        let slow = state.players[&id].speed;
        send(
            &mut state,
            &conn,
            json!({"type": "set_bot_behavior", "player_id": id, "behavior": "aloof"}),
            0,
        );
        let bot = &state.players[&id];
        assert_eq!(bot.bot.unwrap().behavior, BotBehavior::Aloof);
        assert_eq!(bot.speed, slow + 1.0);
    }

    #[test]
    fn test_remove_player_kicks_human() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        let admin = ConnectionHandle::new_socket();
        let out = send(&mut state, &admin, json!({"type": "remove_player", "player_id": id}), 0);
        assert_eq!(out.len(), 1);
        assert!(out[0].is_for(&conn));
        assert!(!out[0].is_for(&admin));
        assert!(matches!(out[0].msg, ServerMsg::Kicked { .. }));
        assert!(state.players.is_empty());
        assert_eq!(state.player_for(&conn), None);
    }

    #[test]
    fn test_switch_team_and_mode() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        send(&mut state, &conn, json!({"type": "switch_team"}), 0);
        assert_eq!(state.players[&id].team, Team::Right);
        assert_eq!(state.players[&id].x, state.bounds.width - 100.0);

        send(&mut state, &conn, json!({"type": "set_mode", "mode": "tdm"}), 0);
        assert_eq!(state.mode, GameMode::Tdm);
        send(&mut state, &conn, json!({"type": "set_mode", "mode": "capture-the-flag"}), 0);
        assert_eq!(state.mode, GameMode::Tdm);
    }

    #[test]
    fn test_lifecycle_commands() {
        let mut state = session();
        let (conn, _) = join(&mut state, "A", "dev-a");
        send(&mut state, &conn, json!({"type": "start_game"}), 0);
        assert_eq!(state.phase, MatchPhase::Running);
        send(&mut state, &conn, json!({"type": "pause_game"}), 10);
        assert_eq!(state.phase, MatchPhase::Paused);
        send(&mut state, &conn, json!({"type": "resume_game"}), 20);
        assert_eq!(state.phase, MatchPhase::Running);
        let out = send(&mut state, &conn, json!({"type": "restart_game"}), 30);
        assert!(matches!(out[0].msg, ServerMsg::MatchEnded(_)));
        assert!(state.pending_reset.unwrap().restart);
    }

    #[test]
    fn test_reload_settings_clamps_upgrades() {
        let mut state = session();
        let (conn, id) = join(&mut state, "A", "dev-a");
        state.players.get_mut(&id).unwrap().upgrades.health = 5;
        send(
            &mut state,
            &conn,
            json!({"type": "reload_settings", "settings": {"upgradeMax.health": 2, "bogus": 1}}),
            0,
        );
        let player = &state.players[&id];
        assert_eq!(player.upgrades.health, 2);
        assert_eq!(player.max_lives, 23.0);
    }
}
