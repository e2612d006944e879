//! XP curve and level-cap math

use super::player::Player;
use super::settings::BalanceSettings;

/// Longest match duration the cap calculation considers, in minutes
pub const MAX_MATCH_MINUTES: f32 = 10.0;

/// XP needed to advance from `level` to `level + 1`
pub fn xp_required(level: u32, settings: &BalanceSettings) -> f32 {
    let base = settings.xp_base.max(f32::EPSILON);
    (base * (level.max(1) as f32).powf(settings.xp_growth_exp)).ceil()
}

/// Highest whole level reachable after `t_secs` seconds of gaining
/// `xp_per_sec`, for a curve with the given base and growth exponent
pub fn max_level_at_time(t_secs: f32, xp_per_sec: f32, xp_base: f32, growth_exp: f32) -> u32 {
    let base = xp_base.max(f32::EPSILON);
    let earned = (xp_per_sec * t_secs).max(0.0);
    if growth_exp == 0.0 {
        return (earned / base).floor() as u32;
    }
    let top = (growth_exp + 1.0) * earned / base;
    top.powf(1.0 / (growth_exp + 1.0)).floor() as u32
}

/// Level cap for a match lasting `minutes`: what passive XP alone can reach,
/// bounded by the upgrade economy
pub fn compute_level_cap(minutes: f32, settings: &BalanceSettings) -> u32 {
    let t_secs = minutes.clamp(0.0, MAX_MATCH_MINUTES) * 60.0;
    let reachable = max_level_at_time(
        t_secs,
        settings.xp_passive,
        settings.xp_base,
        settings.xp_growth_exp,
    );
    reachable.clamp(1, settings.upgrade_max.max_level_cap())
}

/// Advance one level if the player has the XP and room under `cap`.
/// At the cap, XP is held at the threshold instead.
pub fn try_level_up(player: &mut Player, cap: u32, settings: &BalanceSettings) -> bool {
    let threshold = xp_required(player.level, settings);
    if player.exp < threshold {
        return false;
    }
    if player.level >= cap {
        player.exp = threshold;
        return false;
    }

    player.exp -= threshold;
    player.level += 1;
    player.upgrade_points += 1;
    player.lives = player.max_lives;
    player.shield = player.shield_max;
    true
}
