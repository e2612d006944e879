//! Tunable balance settings
//!
//! Loaded once at start-up from a JSON file and adjustable at runtime through
//! the `reload_settings` command.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::upgrades::{UpgradeCaps, UpgradeKind};

/// Balance knobs for the XP curve and damage table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceSettings {
    /// Passive XP gained per second while a match runs
    #[serde(rename = "XP_PASSIVE")]
    pub xp_passive: f32,
    /// XP awarded to the shooter per hit
    #[serde(rename = "XP_PER_HIT")]
    pub xp_per_hit: f32,
    /// XP awarded to the shooter per kill
    #[serde(rename = "XP_PER_KILL")]
    pub xp_per_kill: f32,
    #[serde(rename = "xpBase")]
    pub xp_base: f32,
    #[serde(rename = "xpGrowthExp")]
    pub xp_growth_exp: f32,
    /// Damage added by each of the first four damage levels
    #[serde(rename = "dmgStepLow")]
    pub dmg_step_low: f32,
    /// Damage added by damage level 5
    #[serde(rename = "dmgStepCap")]
    pub dmg_step_cap: f32,
    /// Damage added by each level past 5
    #[serde(rename = "dmgStepHi")]
    pub dmg_step_hi: f32,
    #[serde(rename = "upgradeMax")]
    pub upgrade_max: UpgradeCaps,
}

impl Default for BalanceSettings {
    fn default() -> Self {
        Self {
            xp_passive: 0.5,
            xp_per_hit: 2.0,
            xp_per_kill: 5.0,
            xp_base: 10.0,
            xp_growth_exp: 0.0,
            dmg_step_low: 0.75,
            dmg_step_cap: 2.0,
            dmg_step_hi: 1.0,
            upgrade_max: UpgradeCaps::default(),
        }
    }
}

/// Largest cap accepted for a single upgrade category
const MAX_CATEGORY_CAP: u32 = 20;

impl BalanceSettings {
    /// Read settings from `path`, writing the defaults there when it is missing
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            let defaults = Self::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, serde_json::to_string_pretty(&defaults)?)?;
            info!(path = %path.display(), "Wrote default balance settings");
            return Ok(defaults);
        }

        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Like [`BalanceSettings::load`] but falls back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read balance settings, using defaults");
                Self::default()
            }
        }
    }

    /// Merge a key/value map of overrides. Unknown keys and values that are
    /// not numbers (or numeric strings) are skipped. Returns how many keys
    /// were applied.
    pub fn apply_overrides(&mut self, overrides: &HashMap<String, Value>) -> usize {
        let mut applied = 0;
        for (key, value) in overrides {
            let Some(number) = numeric(value) else {
                continue;
            };
            if self.apply_one(key, number) {
                applied += 1;
            }
        }
        applied
    }

    fn apply_one(&mut self, key: &str, value: f64) -> bool {
        if !value.is_finite() || value < 0.0 {
            return false;
        }
        let value_f32 = value as f32;

        if let Some(category) = key.strip_prefix("upgradeMax.") {
            let Ok(kind) = category.parse::<UpgradeKind>() else {
                return false;
            };
            let cap = value.round() as u32;
            if cap == 0 || cap > MAX_CATEGORY_CAP {
                return false;
            }
            self.upgrade_max.set(kind, cap);
            return true;
        }

        let slot = match key {
            "XP_PASSIVE" => &mut self.xp_passive,
            "XP_PER_HIT" => &mut self.xp_per_hit,
            "XP_PER_KILL" => &mut self.xp_per_kill,
            "xpBase" if value > 0.0 => &mut self.xp_base,
            "xpGrowthExp" => &mut self.xp_growth_exp,
            "dmgStepLow" => &mut self.dmg_step_low,
            "dmgStepCap" => &mut self.dmg_step_cap,
            "dmgStepHi" => &mut self.dmg_step_hi,
            _ => return false,
        };
        *slot = value_f32;
        true
    }
}

/// A JSON number, or a string holding one
pub(crate) fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Settings file errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn overrides(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_defaults_match_json_keys() {
        let json = serde_json::to_value(BalanceSettings::default()).unwrap();
        assert_eq!(json["XP_PASSIVE"], json!(0.5));
        assert_eq!(json["xpBase"], json!(10.0));
        assert_eq!(json["upgradeMax"]["diagonalBullets"], json!(3));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let parsed: BalanceSettings = serde_json::from_str(r#"{"XP_PER_KILL": 9}"#).unwrap();
        assert_eq!(parsed.xp_per_kill, 9.0);
        assert_eq!(parsed.xp_per_hit, 2.0);
        assert_eq!(parsed.upgrade_max, UpgradeCaps::default());
    }

    #[test]
    fn test_apply_overrides_skips_bad_entries() {
        let mut settings = BalanceSettings::default();
        let applied = settings.apply_overrides(&overrides(&[
            ("XP_PASSIVE", json!(1.5)),
            ("xpGrowthExp", json!("0.5")),
            ("notASetting", json!(3)),
            ("XP_PER_HIT", json!("lots")),
            ("xpBase", json!(0)),
            ("upgradeMax.health", json!(7)),
            ("upgradeMax.teleport", json!(2)),
        ]));

        assert_eq!(applied, 3);
        assert_eq!(settings.xp_passive, 1.5);
        assert_eq!(settings.xp_growth_exp, 0.5);
        assert_eq!(settings.xp_per_hit, 2.0);
        assert_eq!(settings.xp_base, 10.0);
        assert_eq!(settings.upgrade_max.health, 7);
    }

    #[test]
    fn test_load_writes_defaults_when_missing() {
        let dir = std::env::temp_dir().join(format!("arena-settings-{}", uuid::Uuid::new_v4()));
        let path = dir.join("balance.json");

        let loaded = BalanceSettings::load(&path).unwrap();
        assert_eq!(loaded, BalanceSettings::default());
        assert!(path.exists());

        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(BalanceSettings::load(&path), Err(SettingsError::Parse(_))));
        assert_eq!(BalanceSettings::load_or_default(&path), BalanceSettings::default());

        let _ = fs::remove_dir_all(&dir);
    }
}
