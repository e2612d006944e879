//! Bot controller - behaviors, bullet dodging and call-signs

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::combat::Bullet;
use super::physics::{PhysicsSystem, WorldBounds};
use super::player::Player;
use super::upgrades::UpgradeKind;

/// Bullets closer than this are considered for dodging
pub const DODGE_RADIUS: f32 = 150.0;
/// Minimum cosine between a bullet's velocity and the bot direction
const DODGE_COS: f32 = 0.7;
/// Weight of the dodge vector against the planned movement
const DODGE_WEIGHT: f32 = 2.0;

const AGGRESSIVE_INTERVAL_MS: u64 = 500;
const DEFENSIVE_INTERVAL_MS: u64 = 1000;
const DEFENSIVE_JITTER_DEG: f32 = 30.0;
const ALOOF_MIN_INTERVAL_MS: u64 = 400;
const ALOOF_MAX_INTERVAL_MS: u64 = 1000;
/// Defensive bots stop walking once this close to their post
const HOLD_DISTANCE: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotBehavior {
    Aggressive,
    Defensive,
    Aloof,
}

impl BotBehavior {
    pub const ALL: [BotBehavior; 3] = [
        BotBehavior::Aggressive,
        BotBehavior::Defensive,
        BotBehavior::Aloof,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BotBehavior::Aggressive => "aggressive",
            BotBehavior::Defensive => "defensive",
            BotBehavior::Aloof => "aloof",
        }
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Self::ALL[rng.gen_range(0..Self::ALL.len())]
    }

    /// Extra movement speed in px/tick
    pub fn speed_bonus(self) -> f32 {
        match self {
            BotBehavior::Aloof => 1.0,
            _ => 0.0,
        }
    }
}

impl fmt::Display for BotBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown bot behavior: {0}")]
pub struct UnknownBehavior(pub String);

impl FromStr for BotBehavior {
    type Err = UnknownBehavior;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|b| b.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownBehavior(s.to_string()))
    }
}

/// Per-bot controller state carried on the player record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BotBrain {
    pub behavior: BotBehavior,
    #[serde(skip)]
    pub next_decision_at: u64,
}

impl BotBrain {
    pub fn new(behavior: BotBehavior) -> Self {
        Self {
            behavior,
            next_decision_at: 0,
        }
    }
}

/// What a bot sees on a given tick
pub struct BotView<'a> {
    /// Positions of the enemies it may target
    pub enemies: &'a [(f32, f32)],
    /// Bullets fired by the other team
    pub hostile_bullets: &'a [&'a Bullet],
    pub bounds: &'a WorldBounds,
    pub now: u64,
}

/// One tick's worth of bot intent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotDecision {
    pub aim: f32,
    pub movement: Option<f32>,
    pub next_decision_at: u64,
}

/// Run the bot's behavior for this tick
pub fn decide<R: Rng>(bot: &Player, brain: &BotBrain, view: &BotView<'_>, rng: &mut R) -> BotDecision {
    let nearest = nearest_enemy(bot, view.enemies);
    let aim = nearest
        .map(|(x, y)| PhysicsSystem::heading_to(bot.x, bot.y, x, y))
        .unwrap_or_else(|| bot.team.forward_degrees());

    let (mut movement, next_decision_at) = if view.now >= brain.next_decision_at {
        plan_movement(bot, brain.behavior, nearest, view, rng)
    } else {
        (bot.move_heading, brain.next_decision_at)
    };

    if let Some(dodge) = dodge_heading(bot, movement, view.hostile_bullets) {
        movement = Some(dodge);
    }

    BotDecision {
        aim,
        movement,
        next_decision_at,
    }
}

fn plan_movement<R: Rng>(
    bot: &Player,
    behavior: BotBehavior,
    nearest: Option<(f32, f32)>,
    view: &BotView<'_>,
    rng: &mut R,
) -> (Option<f32>, u64) {
    match behavior {
        BotBehavior::Aggressive => {
            let (tx, ty) = nearest.unwrap_or_else(|| view.bounds.center());
            (
                Some(PhysicsSystem::heading_to(bot.x, bot.y, tx, ty)),
                view.now + AGGRESSIVE_INTERVAL_MS,
            )
        }
        BotBehavior::Defensive => {
            let (cx, cy) = view.bounds.team_center(bot.team);
            let heading = if PhysicsSystem::point_in_circle(bot.x, bot.y, cx, cy, HOLD_DISTANCE) {
                None
            } else {
                let jitter = rng.gen_range(-DEFENSIVE_JITTER_DEG..=DEFENSIVE_JITTER_DEG);
                Some(PhysicsSystem::heading_to(bot.x, bot.y, cx, cy) + jitter)
            };
            (heading, view.now + DEFENSIVE_INTERVAL_MS)
        }
        BotBehavior::Aloof => (
            Some(rng.gen_range(0.0..360.0)),
            view.now + rng.gen_range(ALOOF_MIN_INTERVAL_MS..=ALOOF_MAX_INTERVAL_MS),
        ),
    }
}

fn nearest_enemy(bot: &Player, enemies: &[(f32, f32)]) -> Option<(f32, f32)> {
    enemies.iter().copied().min_by(|a, b| {
        let da = (a.0 - bot.x).powi(2) + (a.1 - bot.y).powi(2);
        let db = (b.0 - bot.x).powi(2) + (b.1 - bot.y).powi(2);
        da.total_cmp(&db)
    })
}

/// Heading that steers the bot away from incoming bullets, if any threaten it
pub fn dodge_heading(bot: &Player, movement: Option<f32>, bullets: &[&Bullet]) -> Option<f32> {
    let (mut vx, mut vy) = match movement {
        Some(h) => {
            let rad = h.to_radians();
            (rad.cos(), rad.sin())
        }
        None => (0.0, 0.0),
    };
    let mut threatened = false;

    for bullet in bullets {
        let dx = bot.x - bullet.x;
        let dy = bot.y - bullet.y;
        let dist = (dx * dx + dy * dy).sqrt();
        let speed = (bullet.vel_x * bullet.vel_x + bullet.vel_y * bullet.vel_y).sqrt();
        if dist > DODGE_RADIUS || dist == 0.0 || speed == 0.0 {
            continue;
        }

        let (ux, uy) = (bullet.vel_x / speed, bullet.vel_y / speed);
        let cos = (ux * dx + uy * dy) / dist;
        if cos <= DODGE_COS {
            continue;
        }

        // Step sideways off the bullet's line, on whichever side the bot already is
        let (px, py) = (-uy, ux);
        let side = if px * dx + py * dy >= 0.0 { 1.0 } else { -1.0 };
        vx += px * side * DODGE_WEIGHT;
        vy += py * side * DODGE_WEIGHT;
        threatened = true;
    }

    if !threatened || (vx == 0.0 && vy == 0.0) {
        return None;
    }
    Some(vy.atan2(vx).to_degrees())
}

/// Pick one upgrade out of the affordable choices according to the behavior
pub fn pick_upgrade<R: Rng>(behavior: BotBehavior, choices: &[UpgradeKind], rng: &mut R) -> Option<UpgradeKind> {
    let preferred: Vec<UpgradeKind> = match behavior {
        BotBehavior::Aggressive => choices.iter().copied().filter(|k| k.is_offensive()).collect(),
        BotBehavior::Defensive => choices.iter().copied().filter(|k| k.is_defensive()).collect(),
        BotBehavior::Aloof => Vec::new(),
    };
    preferred
        .choose(rng)
        .or_else(|| choices.choose(rng))
        .copied()
}

const CALL_SIGNS: [&str; 24] = [
    "Viper", "Maverick", "Falcon", "Ghost", "Raven", "Blaze", "Nova", "Havoc", "Jinx", "Talon",
    "Echo", "Rook", "Saber", "Onyx", "Comet", "Rogue", "Spectre", "Bolt", "Wraith", "Cobra",
    "Orbit", "Flint", "Vortex", "Zephyr",
];

/// Hands out bot names without repeats until the pool runs dry
#[derive(Debug, Default)]
pub struct BotNamer {
    in_use: HashSet<String>,
    counter: u32,
}

impl BotNamer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire<R: Rng>(&mut self, rng: &mut R) -> String {
        let free: Vec<&str> = CALL_SIGNS
            .iter()
            .copied()
            .filter(|n| !self.in_use.contains(*n))
            .collect();

        let name = match free.choose(rng) {
            Some(name) => name.to_string(),
            None => loop {
                self.counter += 1;
                let candidate = format!("Bot{}", self.counter);
                if !self.in_use.contains(&candidate) {
                    break candidate;
                }
            },
        };
        self.in_use.insert(name.clone());
        name
    }

    pub fn release(&mut self, name: &str) {
        self.in_use.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{DeviceKind, PlayerId, Team};
    use crate::game::settings::BalanceSettings;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn bot(team: Team, behavior: BotBehavior) -> Player {
        let settings = BalanceSettings::default();
        let mut p = Player::new(PlayerId::new(), "Bot".into(), team, DeviceKind::Pc, &settings);
        p.bot = Some(BotBrain::new(behavior));
        p.recompute_stats(&settings);
        p.x = 200.0;
        p.y = 300.0;
        p
    }

    fn enemy_bullet(x: f32, y: f32, vel_x: f32, vel_y: f32) -> Bullet {
        Bullet {
            x,
            y,
            vel_x,
            vel_y,
            radius: 5.0,
            team: Team::Right,
            damage: 1.0,
            shooter_id: PlayerId::new(),
            bounce: false,
            range_remaining: 900.0,
        }
    }

    #[test]
    fn test_behavior_parsing() {
        assert_eq!("Aggressive".parse::<BotBehavior>(), Ok(BotBehavior::Aggressive));
        assert_eq!("aloof".parse::<BotBehavior>(), Ok(BotBehavior::Aloof));
        assert!("sneaky".parse::<BotBehavior>().is_err());
    }

    #[test]
    fn test_aloof_bots_move_faster() {
        let calm = bot(Team::Left, BotBehavior::Defensive);
        let aloof = bot(Team::Left, BotBehavior::Aloof);
        assert_eq!(aloof.speed, calm.speed + 1.0);
    }

    #[test]
    fn test_aggressive_aims_and_moves_at_nearest_enemy() {
        let me = bot(Team::Left, BotBehavior::Aggressive);
        let brain = me.bot.unwrap();
        let bounds = WorldBounds::default();
        let enemies = [(600.0, 300.0), (210.0, 400.0)];
        let view = BotView {
            enemies: &enemies,
            hostile_bullets: &[],
            bounds: &bounds,
            now: 1_000,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let decision = decide(&me, &brain, &view, &mut rng);
        let expected = PhysicsSystem::heading_to(200.0, 300.0, 210.0, 400.0);
        assert!((decision.aim - expected).abs() < 1e-4);
        assert_eq!(decision.movement, Some(decision.aim));
        assert_eq!(decision.next_decision_at, 1_500);
    }

    #[test]
    fn test_no_enemies_aims_forward_and_heads_for_centre() {
        let me = bot(Team::Right, BotBehavior::Aggressive);
        let brain = me.bot.unwrap();
        let bounds = WorldBounds::default();
        let view = BotView {
            enemies: &[],
            hostile_bullets: &[],
            bounds: &bounds,
            now: 0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let decision = decide(&me, &brain, &view, &mut rng);
        assert_eq!(decision.aim, 180.0);
        let heading = decision.movement.unwrap();
        assert!((heading - 0.0).abs() < 1e-4);
    }

    #[test]
    fn test_keeps_plan_until_next_decision() {
        let mut me = bot(Team::Left, BotBehavior::Aloof);
        me.move_heading = Some(42.0);
        let brain = BotBrain {
            behavior: BotBehavior::Aloof,
            next_decision_at: 5_000,
        };
        let bounds = WorldBounds::default();
        let view = BotView {
            enemies: &[],
            hostile_bullets: &[],
            bounds: &bounds,
            now: 4_000,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let decision = decide(&me, &brain, &view, &mut rng);
        assert_eq!(decision.movement, Some(42.0));
        assert_eq!(decision.next_decision_at, 5_000);
    }

    #[test]
    fn test_aloof_reschedules_within_window() {
        let me = bot(Team::Left, BotBehavior::Aloof);
        let brain = me.bot.unwrap();
        let bounds = WorldBounds::default();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for now in [0u64, 10_000, 20_000] {
            let view = BotView {
                enemies: &[],
                hostile_bullets: &[],
                bounds: &bounds,
                now,
            };
            let decision = decide(&me, &brain, &view, &mut rng);
            let wait = decision.next_decision_at - now;
            assert!((ALOOF_MIN_INTERVAL_MS..=ALOOF_MAX_INTERVAL_MS).contains(&wait));
        }
    }

    #[test]
    fn test_dodges_incoming_bullet() {
        let me = bot(Team::Left, BotBehavior::Defensive);
        // Bullet 100 px to the right, flying straight at the bot
        let incoming = enemy_bullet(300.0, 300.0, -8.0, 0.0);
        let heading = dodge_heading(&me, None, &[&incoming]).unwrap();
        // Perpendicular escape: straight up or down
        assert!((heading.abs() - 90.0).abs() < 1e-3);

        // Same bullet flying away is ignored
        let leaving = enemy_bullet(300.0, 300.0, 8.0, 0.0);
        assert_eq!(dodge_heading(&me, None, &[&leaving]), None);

        // Too far away
        let distant = enemy_bullet(500.0, 300.0, -8.0, 0.0);
        assert_eq!(dodge_heading(&me, None, &[&distant]), None);
    }

    #[test]
    fn test_upgrade_preferences() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let all = UpgradeKind::ALL;
        for _ in 0..20 {
            let pick = pick_upgrade(BotBehavior::Defensive, &all, &mut rng).unwrap();
            assert!(pick.is_defensive());
            let pick = pick_upgrade(BotBehavior::Aggressive, &all, &mut rng).unwrap();
            assert!(pick.is_offensive());
        }
        // Falls back to whatever is affordable
        let only_health = [UpgradeKind::Health];
        assert_eq!(
            pick_upgrade(BotBehavior::Aggressive, &only_health, &mut rng),
            Some(UpgradeKind::Health)
        );
        assert_eq!(pick_upgrade(BotBehavior::Aloof, &[], &mut rng), None);
    }

    #[test]
    fn test_namer_never_repeats() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let mut namer = BotNamer::new();
        let names: Vec<String> = (0..30).map(|_| namer.acquire(&mut rng)).collect();
        let unique: HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().any(|n| n.starts_with("Bot")));

        namer.release("Viper");
        assert_eq!(namer.acquire(&mut rng), "Viper");
    }
}
