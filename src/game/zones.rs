//! Control points for zone-control mode

use rand::Rng;
use serde::Serialize;

use super::physics::{PhysicsSystem, WorldBounds, SPAWN_INSET};
use super::player::Team;

pub const DEFAULT_ZONE_LIFETIME_MS: u64 = 30_000;
pub const DEFAULT_ZONE_RADIUS: f32 = 40.0;
/// Capture value at which a zone is spent
pub const CAPTURE_CAP: f32 = 50.0;

pub const MIN_ZONE_LIFETIME_SECS: u64 = 5;
pub const MAX_ZONE_LIFETIME_SECS: u64 = 300;
pub const MIN_ZONE_PERCENT: f32 = 1.0;
pub const MAX_ZONE_PERCENT: f32 = 50.0;

/// Zone tuning that commands may change mid-session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneSettings {
    pub lifetime_ms: u64,
    pub radius: f32,
}

impl Default for ZoneSettings {
    fn default() -> Self {
        Self {
            lifetime_ms: DEFAULT_ZONE_LIFETIME_MS,
            radius: DEFAULT_ZONE_RADIUS,
        }
    }
}

impl ZoneSettings {
    pub fn set_lifetime_secs(&mut self, seconds: u64) {
        self.lifetime_ms = seconds.clamp(MIN_ZONE_LIFETIME_SECS, MAX_ZONE_LIFETIME_SECS) * 1000;
    }

    /// Radius as a percentage of the shorter world side
    pub fn set_size_percent(&mut self, percent: f32, bounds: &WorldBounds) {
        let percent = percent.clamp(MIN_ZONE_PERCENT, MAX_ZONE_PERCENT);
        self.radius = bounds.width.min(bounds.height) * percent / 100.0;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControlPoint {
    pub team: Team,
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub spawned_at: u64,
    pub captured: f32,
}

impl ControlPoint {
    pub fn contains(&self, x: f32, y: f32) -> bool {
        PhysicsSystem::point_in_circle(x, y, self.x, self.y, self.radius)
    }

    pub fn is_spent(&self, now: u64, lifetime_ms: u64) -> bool {
        now.saturating_sub(self.spawned_at) >= lifetime_ms || self.captured >= CAPTURE_CAP
    }
}

/// One zone per team, mirrored across the centre line
pub fn spawn_mirrored_pair<R: Rng>(
    bounds: &WorldBounds,
    settings: &ZoneSettings,
    now: u64,
    rng: &mut R,
) -> [ControlPoint; 2] {
    let inset = SPAWN_INSET.max(settings.radius);
    let (x, y) = bounds.random_point_in_half(Team::Left, inset, rng);
    let zone = |team: Team, x: f32| ControlPoint {
        team,
        x,
        y,
        radius: settings.radius,
        spawned_at: now,
        captured: 0.0,
    };
    [zone(Team::Left, x), zone(Team::Right, bounds.width - x)]
}
