//! Combat system - volleys, bullets, damage

use serde::Serialize;

use super::physics::{PhysicsSystem, WorldBounds, DESPAWN_MARGIN};
use super::player::{Player, PlayerId, Team};
use super::upgrades::bullet_radius;

/// Total fan angle of the forward volley, degrees
pub const FIRE_SPREAD_DEG: f32 = 10.0;
/// Offsets of the diagonal pairs unlocked by each diagonal level, degrees
pub const DIAGONAL_ANGLES: [f32; 3] = [30.0, 45.0, 60.0];

/// Active projectile
#[derive(Debug, Clone, Serialize)]
pub struct Bullet {
    pub x: f32,
    pub y: f32,
    /// Pixels per tick
    pub vel_x: f32,
    pub vel_y: f32,
    pub radius: f32,
    pub team: Team,
    pub damage: f32,
    pub shooter_id: PlayerId,
    /// Reflects off the top and bottom walls
    pub bounce: bool,
    /// Distance left before the bullet fizzles
    #[serde(skip)]
    pub range_remaining: f32,
}

impl Bullet {
    /// Fire a bullet from `shooter` towards `angle_deg`
    pub fn fire(shooter: &Player, angle_deg: f32, bounce: bool) -> Self {
        let rad = angle_deg.to_radians();
        Self {
            x: shooter.x,
            y: shooter.y,
            vel_x: rad.cos() * shooter.bullet_speed,
            vel_y: rad.sin() * shooter.bullet_speed,
            radius: bullet_radius(shooter.upgrades.damage),
            team: shooter.team,
            damage: shooter.bullet_damage,
            shooter_id: shooter.id,
            bounce,
            range_remaining: shooter.bullet_range,
        }
    }

    /// Advance one tick. Returns false once the bullet should be removed.
    pub fn update(&mut self, bounds: &WorldBounds) -> bool {
        self.x += self.vel_x;
        self.y += self.vel_y;
        self.range_remaining -= (self.vel_x * self.vel_x + self.vel_y * self.vel_y).sqrt();

        if self.bounce && (self.y - self.radius < 0.0 || self.y + self.radius > bounds.height) {
            self.vel_y = -self.vel_y;
        }

        self.range_remaining > 0.0 && bounds.contains_with_margin(self.x, self.y, DESPAWN_MARGIN)
    }

    /// Check collision with a target circle
    pub fn check_hit(&self, target_x: f32, target_y: f32, target_radius: f32) -> bool {
        PhysicsSystem::circles_overlap(self.x, self.y, self.radius, target_x, target_y, target_radius)
    }
}

/// One bullet of a volley, relative to nothing: absolute heading in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shot {
    pub angle_deg: f32,
    pub bounce: bool,
}

/// Offsets of `count` bullets spread evenly across `spread` degrees,
/// centred on zero
pub fn spread_offsets(count: u32, spread: f32) -> Vec<f32> {
    if count <= 1 {
        return vec![0.0];
    }
    let step = spread / (count - 1) as f32;
    (0..count).map(|i| -spread / 2.0 + step * i as f32).collect()
}

/// Every bullet a volley from a player with these upgrades produces
pub fn volley(team: Team, more_bullets: u32, diagonal_level: u32, diagonal_cap: u32) -> Vec<Shot> {
    let forward = team.forward_degrees();
    let mut shots: Vec<Shot> = spread_offsets(1 + more_bullets, FIRE_SPREAD_DEG)
        .into_iter()
        .map(|offset| Shot {
            angle_deg: forward + offset,
            bounce: false,
        })
        .collect();

    let bounce = diagonal_level > 0 && diagonal_level >= diagonal_cap;
    for offset in DIAGONAL_ANGLES.iter().take(diagonal_level as usize) {
        let (up, down) = match team {
            Team::Left => (*offset, -*offset),
            Team::Right => (180.0 - *offset, 180.0 + *offset),
        };
        shots.push(Shot { angle_deg: up, bounce });
        shots.push(Shot { angle_deg: down, bounce });
    }

    shots
}

/// Result of a bullet landing on a player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitOutcome {
    /// Damage shown to clients (1 when a shield absorbed the hit)
    pub amount: f32,
    pub shield_absorbed: bool,
    pub killed: bool,
}

/// Combat rules shared by the tick loop
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a player can fire (cooldown check)
    pub fn can_fire(last_shot_at: u64, cooldown_ms: u64, now: u64) -> bool {
        now.saturating_sub(last_shot_at) >= cooldown_ms
    }

    /// Apply one bullet's damage: shields soak one unit per hit
    pub fn apply_hit(target: &mut Player, damage: f32, now: u64) -> HitOutcome {
        if target.shield > 0 {
            target.shield -= 1;
            target.last_shield_repair_at = now;
            return HitOutcome {
                amount: 1.0,
                shield_absorbed: true,
                killed: false,
            };
        }

        target.lives = (target.lives - damage).max(0.0);
        HitOutcome {
            amount: damage,
            shield_absorbed: false,
            killed: target.lives <= 0.0,
        }
    }
}
