//! Presence tracking - heartbeats, demotion to the disconnected table and
//! reconnection

use std::time::Duration;

use tracing::{debug, info};

use super::player::PlayerId;
use super::session::{ConnectionEntry, DisconnectReason, DisconnectedEntry, MatchPhase, SessionState};
use super::{ConnectionHandle, Outbound};
use crate::config::GameConfig;
use crate::ws::protocol::ServerMsg;

/// Heartbeat and retention timings, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    pub heartbeat_interval_ms: u64,
    pub stale_after_ms: u64,
    pub retention_ms: u64,
}

impl From<&GameConfig> for PresenceConfig {
    fn from(config: &GameConfig) -> Self {
        fn ms(d: Duration) -> u64 {
            d.as_millis() as u64
        }
        Self {
            heartbeat_interval_ms: ms(config.heartbeat_interval),
            stale_after_ms: ms(config.heartbeat_stale_after),
            retention_ms: ms(config.disconnect_retention),
        }
    }
}

impl SessionState {
    /// Track a newly opened transport
    pub fn register_connection(&mut self, connection: ConnectionHandle, now: u64) -> Outbound {
        self.connections.insert(
            connection.clone(),
            ConnectionEntry {
                player: None,
                last_ack: now,
            },
        );
        debug!(connection = %connection, "Connection registered");
        Outbound::to(
            connection,
            ServerMsg::Welcome {
                server_time: now,
                world: self.bounds,
            },
        )
    }

    pub fn heartbeat_ping(&mut self, now: u64) -> Outbound {
        self.heartbeat_seq += 1;
        Outbound::broadcast(ServerMsg::HeartbeatPing {
            seq: self.heartbeat_seq,
            server_time: now,
        })
    }

    /// Record an ack; brings back a player that only timed out
    pub fn acknowledge_heartbeat(&mut self, connection: &ConnectionHandle, now: u64) -> Vec<Outbound> {
        let Some(entry) = self.connections.get_mut(connection) else {
            return Vec::new();
        };
        entry.last_ack = now;

        let Some(id) = entry.player else {
            return Vec::new();
        };
        let timed_out = self
            .disconnected
            .get(&id)
            .is_some_and(|e| e.reason == DisconnectReason::HeartbeatTimeout);
        if !timed_out {
            return Vec::new();
        }
        self.restore(id, connection.clone(), now).into_iter().collect()
    }

    /// App foreground/background notification
    pub fn client_activity(&mut self, connection: &ConnectionHandle, active: bool, now: u64) -> Vec<Outbound> {
        let Some(entry) = self.connections.get_mut(connection) else {
            return Vec::new();
        };
        let Some(id) = entry.player else {
            return Vec::new();
        };

        if active {
            entry.last_ack = now;
            if self.disconnected.contains_key(&id) {
                return self.restore(id, connection.clone(), now).into_iter().collect();
            }
        } else if self.players.contains_key(&id) {
            self.demote(id, DisconnectReason::AppInactive, now);
        }
        Vec::new()
    }

    /// Transport went away
    pub fn connection_closed(&mut self, connection: &ConnectionHandle, now: u64) {
        let Some(entry) = self.connections.remove(connection) else {
            return;
        };
        debug!(connection = %connection, "Connection closed");
        if let Some(id) = entry.player {
            let still_bound = self
                .players
                .get(&id)
                .is_some_and(|p| p.connection.as_ref() == Some(connection));
            if still_bound {
                self.demote(id, DisconnectReason::ConnectionClosed, now);
            }
        }
    }

    /// Demote every bound player whose connection stopped acking
    pub fn sweep_stale(&mut self, now: u64) -> usize {
        let stale_after = self.presence.stale_after_ms;
        let stale: Vec<PlayerId> = self
            .connections
            .values()
            .filter(|c| now.saturating_sub(c.last_ack) > stale_after)
            .filter_map(|c| c.player)
            .filter(|id| self.players.contains_key(id))
            .collect();

        for id in &stale {
            self.demote(*id, DisconnectReason::HeartbeatTimeout, now);
        }
        stale.len()
    }

    /// Drop disconnected entries older than the retention window
    pub fn purge_expired(&mut self, now: u64) -> usize {
        let retention = self.presence.retention_ms;
        let before = self.disconnected.len();
        self.disconnected.retain(|id, entry| {
            let keep = now.saturating_sub(entry.disconnected_at) <= retention;
            if !keep {
                info!(player_id = %id, "Purged disconnected player");
            }
            keep
        });
        before - self.disconnected.len()
    }

    /// Move a live player into the disconnected table
    pub fn demote(&mut self, id: PlayerId, reason: DisconnectReason, now: u64) -> bool {
        let Some(mut player) = self.players.remove(&id) else {
            return false;
        };
        player.disconnected = true;
        player.app_inactive = reason == DisconnectReason::AppInactive;
        player.move_heading = None;
        info!(player_id = %id, reason = %reason, "Player disconnected");

        self.disconnected.insert(
            id,
            DisconnectedEntry {
                player,
                disconnected_at: now,
                reason,
            },
        );

        if self.players.is_empty() && self.phase == MatchPhase::Running {
            self.pause(now, true);
        }
        true
    }

    /// Bring a disconnected player back under `connection`
    pub fn restore(&mut self, id: PlayerId, connection: ConnectionHandle, now: u64) -> Option<Outbound> {
        let mut player = self.disconnected.remove(&id)?.player;
        player.disconnected = false;
        player.app_inactive = false;
        player.connection = Some(connection.clone());

        let info = player_info(&player);
        self.players.insert(id, player);
        self.bind(id, connection.clone(), now);
        info!(player_id = %id, connection = %connection, "Player restored");

        if self.phase == MatchPhase::Paused && self.auto_paused {
            self.resume(now);
        }
        Some(Outbound::to(connection, info))
    }

    /// Point `connection` at `id`, unbinding whatever it pointed at before
    pub(crate) fn bind(&mut self, id: PlayerId, connection: ConnectionHandle, now: u64) {
        for entry in self.connections.values_mut() {
            if entry.player == Some(id) {
                entry.player = None;
            }
        }
        let entry = self
            .connections
            .entry(connection)
            .or_insert(ConnectionEntry {
                player: None,
                last_ack: now,
            });
        entry.player = Some(id);
        entry.last_ack = now;
    }
}

pub(crate) fn player_info(player: &super::player::Player) -> ServerMsg {
    ServerMsg::PlayerInfo {
        player_id: player.id,
        name: player.name.clone(),
        team: player.team,
        device: player.device,
        skin: player.skin.clone(),
    }
}
