//! Heart-rate classifier
//!
//! Pure classification of a sample against the active activity profile.
//! Every channel is checked independently; all applicable warnings are
//! reported.

use std::collections::BTreeSet;

use crate::models::{ClassificationResult, Sample, Warning};
use crate::profiles::{ActivityProfile, ThresholdTable};

pub fn classify(
    sample: &Sample,
    active: &ActivityProfile,
    table: &ThresholdTable,
) -> ClassificationResult {
    let mut warnings = BTreeSet::new();

    if let Some(bpm) = sample.bpm {
        if !active.bpm_in_range(bpm) {
            warnings.insert(Warning::HeartRateOutOfRange);
        }
    }

    if let Some(spo2) = sample.spo2 {
        if spo2 < active.spo2_min {
            warnings.insert(Warning::Spo2Low);
        }
    }

    // Comfort band does not depend on the activity profile
    if let Some(temperature) = sample.temperature {
        if !table.temperature().contains(temperature) {
            warnings.insert(Warning::TemperatureOutOfRange);
        }
    }

    let suggested_profile = table.suggest(sample.bpm).to_string();
    let is_profile_mismatch =
        suggested_profile != active.name && warnings.contains(&Warning::HeartRateOutOfRange);

    ClassificationResult {
        warnings,
        suggested_profile,
        is_profile_mismatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::{RESTING, SLEEP, VIGOROUS_ACTIVITY};
    use chrono::Utc;

    fn sample(bpm: Option<f64>, spo2: Option<f64>, temperature: Option<f64>) -> Sample {
        Sample {
            bpm,
            spo2,
            temperature,
            ppg: Some(1000.0),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_normal_resting_sample() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(Some(75.0), Some(97.0), Some(26.0)), resting, &table);

        assert!(result.warnings.is_empty());
        assert_eq!(result.suggested_profile, RESTING);
        assert!(!result.is_profile_mismatch);
    }

    #[test]
    fn test_high_bpm_under_resting_is_mismatch() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(Some(130.0), Some(97.0), Some(26.0)), resting, &table);

        assert!(result.has_warning(Warning::HeartRateOutOfRange));
        assert_eq!(result.suggested_profile, VIGOROUS_ACTIVITY);
        assert!(result.is_profile_mismatch);
    }

    #[test]
    fn test_warnings_are_not_exclusive() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(Some(130.0), Some(90.0), Some(31.0)), resting, &table);

        assert_eq!(result.warnings.len(), 3);
    }

    #[test]
    fn test_missing_temperature_does_not_suppress_other_warnings() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(Some(40.0), Some(90.0), None), resting, &table);

        assert!(result.has_warning(Warning::HeartRateOutOfRange));
        assert!(result.has_warning(Warning::Spo2Low));
        assert!(!result.has_warning(Warning::TemperatureOutOfRange));
    }

    #[test]
    fn test_unknown_channels_raise_nothing() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(None, None, None), resting, &table);

        assert!(result.warnings.is_empty());
        assert_eq!(result.suggested_profile, RESTING);
        assert!(!result.is_profile_mismatch);
    }

    #[test]
    fn test_suggestion_without_range_violation_is_not_mismatch() {
        // 80 BPM suggests resting but is inside the sleep range
        let table = ThresholdTable::default();
        let sleep = table.lookup(SLEEP).unwrap();
        let result = classify(&sample(Some(80.0), Some(97.0), Some(26.0)), sleep, &table);

        assert_eq!(result.suggested_profile, RESTING);
        assert!(!result.is_profile_mismatch);
    }

    #[test]
    fn test_out_of_range_matching_suggestion_is_not_mismatch() {
        // 250 BPM suggests resting (outside every band) while resting is active
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let result = classify(&sample(Some(250.0), Some(97.0), Some(26.0)), resting, &table);

        assert!(result.has_warning(Warning::HeartRateOutOfRange));
        assert!(!result.is_profile_mismatch);
    }

    #[test]
    fn test_classify_is_pure() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();
        let input = sample(Some(112.0), Some(93.0), Some(24.0));

        assert_eq!(classify(&input, resting, &table), classify(&input, resting, &table));
    }

    #[test]
    fn test_range_edges_are_inclusive() {
        let table = ThresholdTable::default();
        let resting = table.lookup(RESTING).unwrap();

        let low = classify(&sample(Some(60.0), Some(95.0), Some(25.0)), resting, &table);
        let high = classify(&sample(Some(100.0), Some(95.0), Some(28.0)), resting, &table);

        assert!(low.warnings.is_empty());
        assert!(high.warnings.is_empty());
    }
}
