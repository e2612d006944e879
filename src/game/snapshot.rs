//! Snapshot building and rate limiting

use crate::util::time::snapshot_interval_ms;
use crate::ws::protocol::{GameStateSnapshot, ServerMsg};

use super::session::{GameMode, MatchPhase, SessionState};

/// Builds snapshots for network transmission
pub struct SnapshotBuilder {
    /// Minimum milliseconds between two snapshots
    min_interval_ms: u64,
    last_sent_at: Option<u64>,
}

impl SnapshotBuilder {
    pub fn new(snapshots_per_second: u32) -> Self {
        Self {
            min_interval_ms: snapshot_interval_ms(snapshots_per_second),
            last_sent_at: None,
        }
    }

    /// Check if it's time to send a snapshot, and mark it sent if so
    pub fn should_send(&mut self, now: u64) -> bool {
        let due = self
            .last_sent_at
            .map_or(true, |last| now.saturating_sub(last) >= self.min_interval_ms);
        if due {
            self.last_sent_at = Some(now);
        }
        due
    }

    /// Build a snapshot message
    pub fn build(&self, state: &SessionState, now: u64) -> ServerMsg {
        let zones = if state.mode == GameMode::Control {
            state.zones.clone()
        } else {
            Vec::new()
        };

        ServerMsg::GameState(GameStateSnapshot {
            tick: state.tick,
            server_time: now,
            players: state.players.clone(),
            disconnected: state.disconnected.clone(),
            bullets: state.bullets.clone(),
            score_left: state.score_left.max(0.0).floor() as u32,
            score_right: state.score_right.max(0.0).floor() as u32,
            mode: state.mode,
            round: state.rounds.current(),
            max_rounds: state.rounds.max_rounds,
            zones,
            remaining_secs: state.remaining_secs(now),
            duration_secs: state.duration_ms / 1000,
            level_cap: state.level_cap,
            world: state.bounds,
            paused: state.phase == MatchPhase::Paused,
            active: state.is_active(),
            started: state.phase != MatchPhase::Idle,
            game_over: state.force_game_over,
        })
    }
}
