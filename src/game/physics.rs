//! Movement integration and arena constraints

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::player::Team;

/// Bullets may travel this far past the world edge before despawning
pub const DESPAWN_MARGIN: f32 = 50.0;
/// Inset used for random spawns and zone placement
pub const SPAWN_INSET: f32 = 50.0;
/// Classic spawns sit this far from the team's back wall
pub const CLASSIC_SPAWN_OFFSET: f32 = 100.0;

/// Arena size in pixels; the left team owns `x < width / 2`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub width: f32,
    pub height: f32,
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl WorldBounds {
    pub fn center(&self) -> (f32, f32) {
        (self.width / 2.0, self.height / 2.0)
    }

    /// Horizontal extent of a team's half
    pub fn team_x_range(&self, team: Team) -> (f32, f32) {
        let half = self.width / 2.0;
        match team {
            Team::Left => (0.0, half),
            Team::Right => (half, self.width),
        }
    }

    /// Centre of a team's half
    pub fn team_center(&self, team: Team) -> (f32, f32) {
        let (min_x, max_x) = self.team_x_range(team);
        ((min_x + max_x) / 2.0, self.height / 2.0)
    }

    /// Whether a point is inside the world grown by `margin` on every side
    pub fn contains_with_margin(&self, x: f32, y: f32, margin: f32) -> bool {
        x >= -margin && x <= self.width + margin && y >= -margin && y <= self.height + margin
    }

    /// Uniform point inside a team's half, `inset` away from its edges
    pub fn random_point_in_half<R: Rng>(&self, team: Team, inset: f32, rng: &mut R) -> (f32, f32) {
        let (min_x, max_x) = self.team_x_range(team);
        let x = sample(rng, min_x + inset, max_x - inset);
        let y = sample(rng, inset, self.height - inset);
        (x, y)
    }
}

/// Uniform sample that tolerates degenerate ranges on tiny worlds
fn sample<R: Rng>(rng: &mut R, lo: f32, hi: f32) -> f32 {
    if hi > lo {
        rng.gen_range(lo..=hi)
    } else {
        (lo + hi) / 2.0
    }
}

/// Physics helpers for moving players around the arena
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance a position one tick along `heading_deg` at `speed` px/tick
    pub fn step(x: f32, y: f32, heading_deg: f32, speed: f32) -> (f32, f32) {
        let rad = heading_deg.to_radians();
        (x + rad.cos() * speed, y + rad.sin() * speed)
    }

    /// Keep a player of `radius` inside its team's half and the world
    pub fn clamp_to_team_half(
        x: f32,
        y: f32,
        radius: f32,
        team: Team,
        bounds: &WorldBounds,
    ) -> (f32, f32) {
        let (min_x, max_x) = bounds.team_x_range(team);
        (
            clamp_span(x, min_x + radius, max_x - radius),
            clamp_span(y, radius, bounds.height - radius),
        )
    }

    /// Check if a point is inside a circle
    pub fn point_in_circle(x: f32, y: f32, cx: f32, cy: f32, radius: f32) -> bool {
        let dx = x - cx;
        let dy = y - cy;
        dx * dx + dy * dy <= radius * radius
    }

    /// Strict circle-circle overlap
    pub fn circles_overlap(x1: f32, y1: f32, r1: f32, x2: f32, y2: f32, r2: f32) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let combined = r1 + r2;
        dx * dx + dy * dy < combined * combined
    }

    /// Heading in degrees from one point to another
    pub fn heading_to(from_x: f32, from_y: f32, to_x: f32, to_y: f32) -> f32 {
        (to_y - from_y).atan2(to_x - from_x).to_degrees()
    }
}

/// Clamp that centres the value when the span collapses
fn clamp_span(value: f32, lo: f32, hi: f32) -> f32 {
    if lo > hi {
        (lo + hi) / 2.0
    } else {
        value.clamp(lo, hi)
    }
}
