//! Activity threshold table
//!
//! Static configuration mapping activity labels to acceptable vital-sign
//! ranges, plus the BPM bands used to suggest an activity and the
//! temperature comfort band. Built once at startup, never mutated.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub const RESTING: &str = "resting";
pub const LIGHT_ACTIVITY: &str = "light activity";
pub const VIGOROUS_ACTIVITY: &str = "vigorous activity";
pub const SLEEP: &str = "sleep";

/// Threshold table errors
#[derive(Debug, Error, PartialEq)]
pub enum ProfileError {
    #[error("Unknown activity profile: {0}")]
    UnknownProfile(String),

    #[error("Invalid threshold configuration: {0}")]
    Invalid(String),

    #[error("Failed to read threshold file: {0}")]
    Config(String),
}

/// A named operating mode with its acceptable ranges
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityProfile {
    pub name: String,
    pub bpm_min: f64,
    pub bpm_max: f64,
    pub spo2_min: f64,
}

impl ActivityProfile {
    pub fn new(name: &str, bpm_min: f64, bpm_max: f64, spo2_min: f64) -> Self {
        Self {
            name: name.to_string(),
            bpm_min,
            bpm_max,
            spo2_min,
        }
    }

    pub fn bpm_in_range(&self, bpm: f64) -> bool {
        bpm >= self.bpm_min && bpm <= self.bpm_max
    }
}

/// BPM interval `[lower, upper)` that suggests a profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionBand {
    pub profile: String,
    pub lower: f64,
    pub upper: f64,
}

impl SuggestionBand {
    pub fn new(profile: &str, lower: f64, upper: f64) -> Self {
        Self {
            profile: profile.to_string(),
            lower,
            upper,
        }
    }

    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.lower && bpm < self.upper
    }
}

/// Comfort band for body-surface temperature (inclusive, Celsius)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemperatureBand {
    pub min: f64,
    pub max: f64,
}

impl TemperatureBand {
    pub fn contains(&self, celsius: f64) -> bool {
        celsius >= self.min && celsius <= self.max
    }
}

impl Default for TemperatureBand {
    fn default() -> Self {
        Self { min: 25.0, max: 28.0 }
    }
}

fn default_profiles() -> Vec<ActivityProfile> {
    vec![
        ActivityProfile::new(RESTING, 60.0, 100.0, 95.0),
        ActivityProfile::new(LIGHT_ACTIVITY, 70.0, 120.0, 94.0),
        ActivityProfile::new(VIGOROUS_ACTIVITY, 90.0, 160.0, 92.0),
        ActivityProfile::new(SLEEP, 50.0, 85.0, 95.0),
    ]
}

fn default_bands() -> Vec<SuggestionBand> {
    vec![
        SuggestionBand::new(SLEEP, 40.0, 60.0),
        SuggestionBand::new(RESTING, 60.0, 100.0),
        SuggestionBand::new(LIGHT_ACTIVITY, 100.0, 120.0),
        SuggestionBand::new(VIGOROUS_ACTIVITY, 120.0, 220.0),
    ]
}

/// Shape of an optional threshold override file. Omitted sections keep
/// the built-in values.
#[derive(Debug, Deserialize)]
struct ThresholdConfig {
    #[serde(default = "default_profiles")]
    profiles: Vec<ActivityProfile>,
    #[serde(default = "default_bands")]
    bands: Vec<SuggestionBand>,
    #[serde(default)]
    temperature: TemperatureBand,
}

/// Validated, immutable threshold configuration
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdTable {
    profiles: Vec<ActivityProfile>,
    bands: Vec<SuggestionBand>,
    temperature: TemperatureBand,
}

impl ThresholdTable {
    /// Build and validate a table.
    pub fn new(
        profiles: Vec<ActivityProfile>,
        bands: Vec<SuggestionBand>,
        temperature: TemperatureBand,
    ) -> Result<Self, ProfileError> {
        for profile in &profiles {
            if !(profile.bpm_min < profile.bpm_max) {
                return Err(ProfileError::Invalid(format!(
                    "profile '{}' needs bpm_min < bpm_max (got {} / {})",
                    profile.name, profile.bpm_min, profile.bpm_max
                )));
            }
        }

        if !profiles.iter().any(|p| p.name == RESTING) {
            return Err(ProfileError::Invalid(format!(
                "a '{}' profile is required as the fallback",
                RESTING
            )));
        }

        for band in &bands {
            if !(band.lower < band.upper) {
                return Err(ProfileError::Invalid(format!(
                    "band for '{}' needs lower < upper (got {} / {})",
                    band.profile, band.lower, band.upper
                )));
            }
            if !profiles.iter().any(|p| p.name == band.profile) {
                return Err(ProfileError::Invalid(format!(
                    "band references unknown profile '{}'",
                    band.profile
                )));
            }
        }

        for pair in bands.windows(2) {
            if pair[1].lower < pair[0].upper {
                return Err(ProfileError::Invalid(format!(
                    "bands must be ascending and non-overlapping ('{}' then '{}')",
                    pair[0].profile, pair[1].profile
                )));
            }
            if pair[1].lower > pair[0].upper {
                warn!(
                    from = pair[0].upper,
                    to = pair[1].lower,
                    "Gap between suggestion bands, BPM in the gap suggests resting"
                );
            }
        }

        if !(temperature.min < temperature.max) {
            return Err(ProfileError::Invalid(format!(
                "temperature band needs min < max (got {} / {})",
                temperature.min, temperature.max
            )));
        }

        Ok(Self {
            profiles,
            bands,
            temperature,
        })
    }

    /// Load overrides from a TOML/JSON/YAML file.
    pub fn from_file(path: &str) -> Result<Self, ProfileError> {
        let raw: ThresholdConfig = config::Config::builder()
            .add_source(config::File::with_name(path))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| ProfileError::Config(e.to_string()))?;

        let table = Self::new(raw.profiles, raw.bands, raw.temperature)?;
        info!(
            path = %path,
            profiles = table.profiles.len(),
            bands = table.bands.len(),
            "Loaded threshold table"
        );
        Ok(table)
    }

    pub fn lookup(&self, name: &str) -> Result<&ActivityProfile, ProfileError> {
        self.profiles
            .iter()
            .find(|p| p.name == name)
            .ok_or_else(|| ProfileError::UnknownProfile(name.to_string()))
    }

    /// Lookup that degrades to the resting profile for stale labels.
    pub fn lookup_or_default(&self, name: &str) -> &ActivityProfile {
        match self.lookup(name) {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Falling back to resting profile");
                self.resting()
            }
        }
    }

    pub fn resting(&self) -> &ActivityProfile {
        self.profiles
            .iter()
            .find(|p| p.name == RESTING)
            .unwrap_or(&self.profiles[0])
    }

    /// Profile suggested by BPM alone: first ascending band that matches.
    pub fn suggest(&self, bpm: Option<f64>) -> &str {
        bpm.and_then(|bpm| self.bands.iter().find(|b| b.contains(bpm)))
            .map(|b| b.profile.as_str())
            .unwrap_or(RESTING)
    }

    pub fn profiles(&self) -> &[ActivityProfile] {
        &self.profiles
    }

    #[cfg(test)]
    pub fn bands(&self) -> &[SuggestionBand] {
        &self.bands
    }

    pub fn temperature(&self) -> TemperatureBand {
        self.temperature
    }
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            profiles: default_profiles(),
            bands: default_bands(),
            temperature: TemperatureBand::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let defaults = ThresholdTable::default();
        let rebuilt = ThresholdTable::new(
            defaults.profiles().to_vec(),
            defaults.bands().to_vec(),
            defaults.temperature(),
        );
        assert!(rebuilt.is_ok());
    }

    #[test]
    fn test_lookup() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        assert_eq!(resting.bpm_min, 60.0);
        assert_eq!(resting.bpm_max, 100.0);
        assert_eq!(resting.spo2_min, 95.0);

        assert_eq!(
            table.lookup("jogging"),
            Err(ProfileError::UnknownProfile("jogging".to_string()))
        );
    }

    #[test]
    fn test_lookup_or_default_falls_back_to_resting() {
        let table = ThresholdTable::default();
        assert_eq!(table.lookup_or_default("Nghỉ ngơi").name, RESTING);
        assert_eq!(table.lookup_or_default(SLEEP).name, SLEEP);
    }

    #[test]
    fn test_suggest_first_band_wins() {
        let table = ThresholdTable::default();
        assert_eq!(table.suggest(Some(45.0)), SLEEP);
        assert_eq!(table.suggest(Some(60.0)), RESTING);
        assert_eq!(table.suggest(Some(75.0)), RESTING);
        assert_eq!(table.suggest(Some(100.0)), LIGHT_ACTIVITY);
        assert_eq!(table.suggest(Some(119.9)), LIGHT_ACTIVITY);
        assert_eq!(table.suggest(Some(130.0)), VIGOROUS_ACTIVITY);
    }

    #[test]
    fn test_suggest_outside_bands_defaults_to_resting() {
        let table = ThresholdTable::default();
        assert_eq!(table.suggest(Some(20.0)), RESTING);
        assert_eq!(table.suggest(Some(250.0)), RESTING);
        assert_eq!(table.suggest(None), RESTING);
    }

    #[test]
    fn test_every_bpm_maps_to_exactly_one_band() {
        let table = ThresholdTable::default();
        let mut bpm = 40.0;
        while bpm < 220.0 {
            let matching = table.bands().iter().filter(|b| b.contains(bpm)).count();
            assert_eq!(matching, 1, "bpm {} matched {} bands", bpm, matching);
            bpm += 0.25;
        }
    }

    #[test]
    fn test_rejects_inverted_profile() {
        let result = ThresholdTable::new(
            vec![ActivityProfile::new(RESTING, 100.0, 60.0, 95.0)],
            vec![],
            TemperatureBand::default(),
        );
        assert!(matches!(result, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_requires_resting_profile() {
        let result = ThresholdTable::new(
            vec![ActivityProfile::new(SLEEP, 50.0, 85.0, 95.0)],
            vec![],
            TemperatureBand::default(),
        );
        assert!(matches!(result, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_rejects_overlapping_bands() {
        let result = ThresholdTable::new(
            default_profiles(),
            vec![
                SuggestionBand::new(RESTING, 60.0, 100.0),
                SuggestionBand::new(LIGHT_ACTIVITY, 95.0, 120.0),
            ],
            TemperatureBand::default(),
        );
        assert!(matches!(result, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_rejects_band_for_unknown_profile() {
        let result = ThresholdTable::new(
            default_profiles(),
            vec![SuggestionBand::new("jogging", 100.0, 140.0)],
            TemperatureBand::default(),
        );
        assert!(matches!(result, Err(ProfileError::Invalid(_))));
    }

    #[test]
    fn test_gaps_are_allowed() {
        let result = ThresholdTable::new(
            default_profiles(),
            vec![
                SuggestionBand::new(RESTING, 60.0, 94.0),
                SuggestionBand::new(LIGHT_ACTIVITY, 95.0, 120.0),
            ],
            TemperatureBand::default(),
        )
        .unwrap();
        assert_eq!(result.suggest(Some(94.5)), RESTING);
    }

    #[test]
    fn test_from_file_overrides_temperature_band() {
        let dir = std::env::temp_dir().join(format!("vitalwatch-thresholds-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("thresholds.toml");
        std::fs::write(&path, "[temperature]\nmin = 25.0\nmax = 29.0\n").unwrap();

        let table = ThresholdTable::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(table.temperature().max, 29.0);
        assert_eq!(table.profiles().len(), 4);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_from_missing_file() {
        let result = ThresholdTable::from_file("/nonexistent/vitalwatch/thresholds.toml");
        assert!(matches!(result, Err(ProfileError::Config(_))));
    }
}
