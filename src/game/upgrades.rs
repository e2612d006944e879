//! Upgrade economy - categories, caps, costs and derived stats
//!
//! Every derived stat is a pure function of an upgrade level, so recomputing
//! a player's stats from its counters is idempotent.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::player::Player;
use super::settings::BalanceSettings;

pub const BASE_LIVES: f32 = 3.0;
pub const BASE_RADIUS: f32 = 20.0;
/// Pixels per tick
pub const BASE_SPEED: f32 = 3.0;
pub const BASE_BULLET_COOLDOWN_MS: u64 = 1000;
/// Pixels per tick
pub const BASE_BULLET_SPEED: f32 = 8.0;
pub const BASE_BULLET_RANGE: f32 = 900.0;
pub const BASE_BULLET_DAMAGE: f32 = 1.0;
pub const BASE_BULLET_RADIUS: f32 = 5.0;

const LIVES_PER_HEALTH_LEVEL: f32 = 10.0;
const COOLDOWN_CUT_PER_LEVEL: f32 = 0.08;
const RANGE_CUT_PER_LEVEL: f32 = 0.08;
const SPEED_PENALTY: [f32; 6] = [1.0, 0.95, 0.9, 0.85, 0.8, 0.75];
const RADIUS_GROWTH: f32 = 1.1;

/// Upgrade categories a player can spend points on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UpgradeKind {
    #[serde(rename = "moreDamage")]
    Damage,
    #[serde(rename = "diagonalBullets")]
    Diagonal,
    #[serde(rename = "shield")]
    Shield,
    #[serde(rename = "moreBullets")]
    MoreBullets,
    #[serde(rename = "bulletSpeed")]
    BulletSpeed,
    #[serde(rename = "health")]
    Health,
}

impl UpgradeKind {
    pub const ALL: [UpgradeKind; 6] = [
        UpgradeKind::Damage,
        UpgradeKind::Diagonal,
        UpgradeKind::Shield,
        UpgradeKind::MoreBullets,
        UpgradeKind::BulletSpeed,
        UpgradeKind::Health,
    ];

    /// Wire / settings key
    pub fn key(self) -> &'static str {
        match self {
            UpgradeKind::Damage => "moreDamage",
            UpgradeKind::Diagonal => "diagonalBullets",
            UpgradeKind::Shield => "shield",
            UpgradeKind::MoreBullets => "moreBullets",
            UpgradeKind::BulletSpeed => "bulletSpeed",
            UpgradeKind::Health => "health",
        }
    }

    pub fn is_offensive(self) -> bool {
        matches!(
            self,
            UpgradeKind::Damage
                | UpgradeKind::MoreBullets
                | UpgradeKind::BulletSpeed
                | UpgradeKind::Diagonal
        )
    }

    pub fn is_defensive(self) -> bool {
        matches!(self, UpgradeKind::Shield | UpgradeKind::Health)
    }
}

impl fmt::Display for UpgradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for UpgradeKind {
    type Err = UpgradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UpgradeKind::ALL
            .into_iter()
            .find(|kind| kind.key() == s)
            .ok_or_else(|| UpgradeError::UnknownCategory(s.to_string()))
    }
}

/// Maximum level per category (tunable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeCaps {
    #[serde(rename = "moreDamage")]
    pub damage: u32,
    #[serde(rename = "diagonalBullets")]
    pub diagonal: u32,
    pub shield: u32,
    #[serde(rename = "moreBullets")]
    pub more_bullets: u32,
    #[serde(rename = "bulletSpeed")]
    pub bullet_speed: u32,
    pub health: u32,
}

impl Default for UpgradeCaps {
    fn default() -> Self {
        Self {
            damage: 5,
            diagonal: 3,
            shield: 5,
            more_bullets: 5,
            bullet_speed: 5,
            health: 5,
        }
    }
}

impl UpgradeCaps {
    pub fn cap(&self, kind: UpgradeKind) -> u32 {
        match kind {
            UpgradeKind::Damage => self.damage,
            UpgradeKind::Diagonal => self.diagonal,
            UpgradeKind::Shield => self.shield,
            UpgradeKind::MoreBullets => self.more_bullets,
            UpgradeKind::BulletSpeed => self.bullet_speed,
            UpgradeKind::Health => self.health,
        }
    }

    pub fn set(&mut self, kind: UpgradeKind, value: u32) {
        let slot = match kind {
            UpgradeKind::Damage => &mut self.damage,
            UpgradeKind::Diagonal => &mut self.diagonal,
            UpgradeKind::Shield => &mut self.shield,
            UpgradeKind::MoreBullets => &mut self.more_bullets,
            UpgradeKind::BulletSpeed => &mut self.bullet_speed,
            UpgradeKind::Health => &mut self.health,
        };
        *slot = value;
    }

    /// Sum of all category caps
    pub fn total(&self) -> u32 {
        UpgradeKind::ALL.iter().map(|k| self.cap(*k)).sum()
    }

    /// Highest level cap a match may use: three quarters of all upgrade levels
    pub fn max_level_cap(&self) -> u32 {
        (self.total() * 3 / 4).max(1)
    }
}

/// Purchased level per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeLevels {
    #[serde(rename = "moreDamage")]
    pub damage: u32,
    #[serde(rename = "diagonalBullets")]
    pub diagonal: u32,
    pub shield: u32,
    #[serde(rename = "moreBullets")]
    pub more_bullets: u32,
    #[serde(rename = "bulletSpeed")]
    pub bullet_speed: u32,
    pub health: u32,
}

impl UpgradeLevels {
    pub fn get(&self, kind: UpgradeKind) -> u32 {
        match kind {
            UpgradeKind::Damage => self.damage,
            UpgradeKind::Diagonal => self.diagonal,
            UpgradeKind::Shield => self.shield,
            UpgradeKind::MoreBullets => self.more_bullets,
            UpgradeKind::BulletSpeed => self.bullet_speed,
            UpgradeKind::Health => self.health,
        }
    }

    fn slot(&mut self, kind: UpgradeKind) -> &mut u32 {
        match kind {
            UpgradeKind::Damage => &mut self.damage,
            UpgradeKind::Diagonal => &mut self.diagonal,
            UpgradeKind::Shield => &mut self.shield,
            UpgradeKind::MoreBullets => &mut self.more_bullets,
            UpgradeKind::BulletSpeed => &mut self.bullet_speed,
            UpgradeKind::Health => &mut self.health,
        }
    }

    /// Lower any counter above its cap (used after caps are retuned)
    pub fn clamp_to(&mut self, caps: &UpgradeCaps) {
        for kind in UpgradeKind::ALL {
            let cap = caps.cap(kind);
            let slot = self.slot(kind);
            *slot = (*slot).min(cap);
        }
    }
}

/// Upgrade rejection reasons
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpgradeError {
    #[error("Unknown upgrade category: {0}")]
    UnknownCategory(String),

    #[error("Upgrade {0} is already at its cap")]
    AtCap(UpgradeKind),

    #[error("Upgrade needs {needed} points, player has {available}")]
    InsufficientPoints { needed: u32, available: u32 },
}

/// Points needed to buy the next level of `kind` from `current_level`
pub fn upgrade_cost(kind: UpgradeKind, current_level: u32) -> u32 {
    match kind {
        UpgradeKind::Shield if current_level >= 3 => 2,
        _ => 1,
    }
}

/// Spend points on an upgrade and refresh the derived stats
pub fn apply_upgrade(
    player: &mut Player,
    kind: UpgradeKind,
    settings: &BalanceSettings,
) -> Result<(), UpgradeError> {
    let current = player.upgrades.get(kind);
    if current >= settings.upgrade_max.cap(kind) {
        return Err(UpgradeError::AtCap(kind));
    }

    let cost = upgrade_cost(kind, current);
    if player.upgrade_points < cost {
        return Err(UpgradeError::InsufficientPoints {
            needed: cost,
            available: player.upgrade_points,
        });
    }

    player.upgrade_points -= cost;
    *player.upgrades.slot(kind) += 1;
    player.recompute_stats(settings);

    match kind {
        UpgradeKind::Health => {
            player.lives = (player.lives + LIVES_PER_HEALTH_LEVEL).min(player.max_lives);
        }
        UpgradeKind::Shield => {
            player.shield = player.shield_max;
        }
        _ => {}
    }

    Ok(())
}

/// Categories the player could buy right now
pub fn available_upgrades(player: &Player, settings: &BalanceSettings) -> Vec<UpgradeKind> {
    UpgradeKind::ALL
        .into_iter()
        .filter(|kind| {
            let level = player.upgrades.get(*kind);
            level < settings.upgrade_max.cap(*kind)
                && upgrade_cost(*kind, level) <= player.upgrade_points
        })
        .collect()
}

// ============================================================================
// Derived stats
// ============================================================================

/// Flat damage bonus table: small steps up to level 4, a spike at 5, then
/// steady steps for retuned caps above 5
pub fn bullet_damage(level: u32, settings: &BalanceSettings) -> f32 {
    let low_steps = level.min(4) as f32;
    let spike = if level >= 5 { settings.dmg_step_cap } else { 0.0 };
    let high_steps = level.saturating_sub(5) as f32;
    BASE_BULLET_DAMAGE + settings.dmg_step_low * low_steps + spike + settings.dmg_step_hi * high_steps
}

pub fn bullet_cooldown_ms(more_bullets_level: u32) -> u64 {
    let factor = (1.0 - COOLDOWN_CUT_PER_LEVEL * more_bullets_level as f32).max(0.2);
    (BASE_BULLET_COOLDOWN_MS as f32 * factor).round() as u64
}

pub fn bullet_speed(level: u32) -> f32 {
    BASE_BULLET_SPEED + level as f32
}

pub fn bullet_range(level: u32) -> f32 {
    BASE_BULLET_RANGE * (1.0 - RANGE_CUT_PER_LEVEL * level as f32).max(0.2)
}

pub fn bullet_radius(damage_level: u32) -> f32 {
    BASE_BULLET_RADIUS + 2.0 * damage_level as f32
}

pub fn max_lives(health_level: u32) -> f32 {
    BASE_LIVES + LIVES_PER_HEALTH_LEVEL * health_level as f32
}

/// Lives restored per second
pub fn regen_rate(health_level: u32) -> f32 {
    health_level as f32
}

pub fn speed_penalty(health_level: u32) -> f32 {
    let idx = (health_level as usize).min(SPEED_PENALTY.len() - 1);
    SPEED_PENALTY[idx]
}

pub fn player_radius(health_level: u32) -> f32 {
    BASE_RADIUS * RADIUS_GROWTH.powi(health_level as i32)
}

pub fn shield_max(shield_level: u32) -> u32 {
    shield_level
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{DeviceKind, PlayerId, Team};

    fn test_player(points: u32) -> Player {
        let settings = BalanceSettings::default();
        let mut player = Player::new(
            PlayerId::new(),
            "Tester".to_string(),
            Team::Left,
            DeviceKind::Mobile,
            &settings,
        );
        player.upgrade_points = points;
        player
    }

    #[test]
    fn test_upgrade_kind_round_trips_key() {
        for kind in UpgradeKind::ALL {
            assert_eq!(kind.key().parse::<UpgradeKind>(), Ok(kind));
        }
        assert!(matches!(
            "laser".parse::<UpgradeKind>(),
            Err(UpgradeError::UnknownCategory(_))
        ));
    }

    #[test]
    fn test_total_and_level_cap() {
        let caps = UpgradeCaps::default();
        assert_eq!(caps.total(), 28);
        assert_eq!(caps.max_level_cap(), 21);
    }

    #[test]
    fn test_upgrade_spends_points_and_updates_stats() {
        let settings = BalanceSettings::default();
        let mut player = test_player(2);

        apply_upgrade(&mut player, UpgradeKind::Damage, &settings).unwrap();
        assert_eq!(player.upgrades.damage, 1);
        assert_eq!(player.upgrade_points, 1);
        assert!((player.bullet_damage - 1.75).abs() < 1e-6);

        apply_upgrade(&mut player, UpgradeKind::BulletSpeed, &settings).unwrap();
        assert_eq!(player.bullet_speed, 9.0);
        assert!(player.bullet_range < BASE_BULLET_RANGE);
        assert_eq!(player.upgrade_points, 0);
    }

    #[test]
    fn test_upgrade_at_cap_is_noop() {
        let settings = BalanceSettings::default();
        let mut player = test_player(0);
        player.upgrades.diagonal = settings.upgrade_max.diagonal;
        player.upgrade_points = 4;
        player.recompute_stats(&settings);
        let before = player.clone();

        let result = apply_upgrade(&mut player, UpgradeKind::Diagonal, &settings);
        assert_eq!(result, Err(UpgradeError::AtCap(UpgradeKind::Diagonal)));
        assert_eq!(player.upgrade_points, before.upgrade_points);
        assert_eq!(player.upgrades, before.upgrades);
        assert_eq!(player.bullet_damage, before.bullet_damage);
    }

    #[test]
    fn test_upgrade_without_points_is_rejected() {
        let settings = BalanceSettings::default();
        let mut player = test_player(0);
        let result = apply_upgrade(&mut player, UpgradeKind::Health, &settings);
        assert!(matches!(result, Err(UpgradeError::InsufficientPoints { .. })));
        assert_eq!(player.upgrades.health, 0);
    }

    #[test]
    fn test_shield_costs_two_from_level_three() {
        let settings = BalanceSettings::default();
        let mut player = test_player(5);
        for _ in 0..3 {
            apply_upgrade(&mut player, UpgradeKind::Shield, &settings).unwrap();
        }
        assert_eq!(player.upgrade_points, 2);
        assert_eq!(player.shield, 3);

        apply_upgrade(&mut player, UpgradeKind::Shield, &settings).unwrap();
        assert_eq!(player.upgrade_points, 0);
        assert_eq!(player.shield_max, 4);
        assert_eq!(player.shield, 4);

        player.upgrade_points = 1;
        let result = apply_upgrade(&mut player, UpgradeKind::Shield, &settings);
        assert_eq!(
            result,
            Err(UpgradeError::InsufficientPoints { needed: 2, available: 1 })
        );
    }

    #[test]
    fn test_health_upgrade_adds_life_and_slows() {
        let settings = BalanceSettings::default();
        let mut player = test_player(1);
        let base_speed = player.speed;
        let base_radius = player.radius;

        apply_upgrade(&mut player, UpgradeKind::Health, &settings).unwrap();
        assert_eq!(player.max_lives, 13.0);
        assert_eq!(player.lives, 13.0);
        assert_eq!(player.regen_rate, 1.0);
        assert!(player.speed < base_speed);
        assert!(player.radius > base_radius);
    }

    #[test]
    fn test_derived_stats_are_monotonic() {
        let settings = BalanceSettings::default();
        for level in 0..5 {
            assert!(bullet_damage(level + 1, &settings) > bullet_damage(level, &settings));
            assert!(bullet_cooldown_ms(level + 1) < bullet_cooldown_ms(level));
            assert!(bullet_speed(level + 1) > bullet_speed(level));
            assert!(bullet_range(level + 1) < bullet_range(level));
            assert!(speed_penalty(level + 1) < speed_penalty(level));
        }
        assert!((bullet_damage(5, &settings) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let settings = BalanceSettings::default();
        let mut player = test_player(3);
        apply_upgrade(&mut player, UpgradeKind::Health, &settings).unwrap();
        apply_upgrade(&mut player, UpgradeKind::MoreBullets, &settings).unwrap();
        let once = player.clone();
        player.recompute_stats(&settings);
        player.recompute_stats(&settings);
        assert_eq!(player.speed, once.speed);
        assert_eq!(player.bullet_cooldown_ms, once.bullet_cooldown_ms);
        assert_eq!(player.max_lives, once.max_lives);
    }

    #[test]
    fn test_available_upgrades_respects_caps_and_cost() {
        let settings = BalanceSettings::default();
        let mut player = test_player(1);
        player.upgrades.damage = settings.upgrade_max.damage;
        player.upgrades.shield = 3;
        let choices = available_upgrades(&player, &settings);
        assert!(!choices.contains(&UpgradeKind::Damage));
        assert!(!choices.contains(&UpgradeKind::Shield));
        assert!(choices.contains(&UpgradeKind::Health));
    }
}
