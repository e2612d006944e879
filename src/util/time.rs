//! Time utilities for game simulation

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Tick rate configuration.
///
/// Movement and bullet speeds are expressed in pixels per tick, so changing
/// the simulation rate changes game speed.
pub const SIMULATION_TPS: u32 = 60;
pub const SNAPSHOT_TPS: u32 = 30;

/// Milliseconds between ticks at the given rate
pub fn tick_interval(tps: u32) -> Duration {
    Duration::from_micros(1_000_000 / tps.max(1) as u64)
}

/// Minimum milliseconds between two snapshots at the given rate
pub fn snapshot_interval_ms(snapshots_per_second: u32) -> u64 {
    1000 / snapshots_per_second.max(1) as u64
}

/// Whole seconds left until `deadline`, rounded up (0 once passed)
pub fn secs_until(deadline: u64, now: u64) -> u64 {
    deadline.saturating_sub(now).div_ceil(1000)
}

/// Millisecond clock for the match loop.
///
/// Anchored to wall-clock time at creation but advanced by a monotonic
/// tokio instant, so it follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MatchClock {
    origin_ms: u64,
    start: tokio::time::Instant,
}

impl MatchClock {
    pub fn new() -> Self {
        Self {
            origin_ms: unix_millis(),
            start: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> u64 {
        self.origin_ms + self.start.elapsed().as_millis() as u64
    }
}

impl Default for MatchClock {
    fn default() -> Self {
        Self::new()
    }
}
