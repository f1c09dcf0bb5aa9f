//! Sample normalizer
//!
//! Validates inbound wire messages against the expected schema and turns
//! them into typed [`Sample`]s, holding over the previous value of any
//! channel that arrives as the "no reading" sentinel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::Sample;

/// Wire marker meaning "no reading this cycle"
pub const SENTINEL: f64 = -999.0;

/// Errors raised while accepting an inbound message
#[derive(Debug, Error, PartialEq)]
pub enum IngestError {
    #[error("Malformed sensor message: {0}")]
    Malformed(String),
}

/// Physical bounds a non-sentinel channel value must respect
struct ChannelBounds {
    field: &'static str,
    min: f64,
    max: f64,
}

const BPM_BOUNDS: ChannelBounds = ChannelBounds { field: "BPM", min: 0.0, max: 300.0 };
const SPO2_BOUNDS: ChannelBounds = ChannelBounds { field: "SpO2", min: 0.0, max: 100.0 };
const TEMP_BOUNDS: ChannelBounds = ChannelBounds { field: "TempC", min: -40.0, max: 80.0 };
const IR_BOUNDS: ChannelBounds = ChannelBounds { field: "IR", min: 0.0, max: f64::MAX };

/// Raw message as published by the wearable
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    #[serde(rename = "BPM")]
    pub bpm: f64,
    #[serde(rename = "SpO2")]
    pub spo2: f64,
    #[serde(rename = "TempC")]
    pub temperature: f64,
    #[serde(rename = "IR")]
    pub ir: f64,
}

impl RawReading {
    pub fn new(bpm: f64, spo2: f64, temperature: f64, ir: f64) -> Self {
        Self { bpm, spo2, temperature, ir }
    }

    /// Every channel set to the sentinel
    #[cfg(test)]
    pub fn unknown() -> Self {
        Self::new(SENTINEL, SENTINEL, SENTINEL, SENTINEL)
    }

    /// Parse and schema-check a message body.
    pub fn parse(body: &[u8]) -> Result<Self, IngestError> {
        let value: serde_json::Value = serde_json::from_slice(body)
            .map_err(|e| IngestError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(IngestError::Malformed(
                "Sensor message must be a JSON object".to_string(),
            ));
        }
        let raw: RawReading = serde_json::from_value(value)
            .map_err(|e| IngestError::Malformed(e.to_string()))?;
        raw.validate()?;
        Ok(raw)
    }

    /// Check every channel is either the sentinel or a plausible value.
    pub fn validate(&self) -> Result<(), IngestError> {
        check_channel(self.bpm, &BPM_BOUNDS)?;
        check_channel(self.spo2, &SPO2_BOUNDS)?;
        check_channel(self.temperature, &TEMP_BOUNDS)?;
        check_channel(self.ir, &IR_BOUNDS)?;
        Ok(())
    }
}

fn check_channel(value: f64, bounds: &ChannelBounds) -> Result<(), IngestError> {
    if is_sentinel(value) {
        return Ok(());
    }

    if !value.is_finite() {
        return Err(IngestError::Malformed(format!(
            "{} must be a finite number",
            bounds.field
        )));
    }

    if value < bounds.min || value > bounds.max {
        return Err(IngestError::Malformed(format!(
            "{} {} out of valid range [{}, {}]",
            bounds.field, value, bounds.min, bounds.max
        )));
    }

    Ok(())
}

fn is_sentinel(value: f64) -> bool {
    value == SENTINEL
}

fn hold_over(raw: f64, previous: Option<f64>) -> Option<f64> {
    if is_sentinel(raw) {
        previous
    } else {
        Some(raw)
    }
}

/// Build a sample from a raw reading, carrying over `previous` for every
/// channel that holds the sentinel.
///
/// Pure and total. Callers must have validated `raw`.
pub fn normalize(raw: &RawReading, previous: &Sample, captured_at: DateTime<Utc>) -> Sample {
    let sample = Sample {
        bpm: hold_over(raw.bpm, previous.bpm),
        spo2: hold_over(raw.spo2, previous.spo2),
        temperature: hold_over(raw.temperature, previous.temperature),
        ppg: hold_over(raw.ir, previous.ppg),
        captured_at,
    };

    debug!(
        bpm = ?sample.bpm,
        spo2 = ?sample.spo2,
        temperature = ?sample.temperature,
        "Normalized sensor sample"
    );

    sample
}

#[cfg(test)]
mod tests {
    use super::*;

    fn previous() -> Sample {
        Sample {
            bpm: Some(80.0),
            spo2: Some(98.0),
            temperature: Some(26.5),
            ppg: Some(1200.0),
            captured_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_sentinel_returns_previous() {
        let prev = previous();
        let sample = normalize(&RawReading::unknown(), &prev, prev.captured_at);
        assert_eq!(sample, prev);
    }

    #[test]
    fn test_real_values_win_over_previous() {
        let prev = previous();
        let raw = RawReading::new(75.0, 97.0, 26.0, 1000.0);
        let sample = normalize(&raw, &prev, Utc::now());

        assert_eq!(sample.bpm, Some(75.0));
        assert_eq!(sample.spo2, Some(97.0));
        assert_eq!(sample.temperature, Some(26.0));
        assert_eq!(sample.ppg, Some(1000.0));
    }

    #[test]
    fn test_partial_sentinel_holds_over_per_channel() {
        let prev = previous();
        let raw = RawReading::new(SENTINEL, 93.0, SENTINEL, 900.0);
        let sample = normalize(&raw, &prev, Utc::now());

        assert_eq!(sample.bpm, Some(80.0));
        assert_eq!(sample.spo2, Some(93.0));
        assert_eq!(sample.temperature, Some(26.5));
        assert_eq!(sample.ppg, Some(900.0));
    }

    #[test]
    fn test_stream_start_keeps_unknown_channels_empty() {
        let start = Sample::empty(Utc::now());
        let raw = RawReading::new(72.0, SENTINEL, SENTINEL, SENTINEL);
        let sample = normalize(&raw, &start, Utc::now());

        assert_eq!(sample.bpm, Some(72.0));
        assert!(sample.spo2.is_none());
        assert!(sample.temperature.is_none());
        assert!(sample.ppg.is_none());
    }

    #[test]
    fn test_parse_valid_message() {
        let raw = RawReading::parse(br#"{"BPM":75,"SpO2":97,"TempC":26.4,"IR":1000}"#).unwrap();
        assert_eq!(raw, RawReading::new(75.0, 97.0, 26.4, 1000.0));
    }

    #[test]
    fn test_parse_accepts_sentinels() {
        let raw =
            RawReading::parse(br#"{"BPM":-999,"SpO2":-999,"TempC":-999,"IR":-999}"#).unwrap();
        assert_eq!(raw, RawReading::unknown());
    }

    #[test]
    fn test_parse_rejects_missing_field() {
        let result = RawReading::parse(br#"{"BPM":75,"SpO2":97,"TempC":26}"#);
        assert!(matches!(result, Err(IngestError::Malformed(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_type() {
        let result = RawReading::parse(br#"{"BPM":"fast","SpO2":97,"TempC":26,"IR":1}"#);
        assert!(result.is_err());
        assert!(RawReading::parse(b"not json").is_err());
        assert!(RawReading::parse(b"[1,2,3,4]").is_err());
    }

    #[test]
    fn test_parse_rejects_non_object_payloads() {
        for body in [&b"[75,97,26,1000]"[..], b"75", b"\"BPM\"", b"null"] {
            match RawReading::parse(body) {
                Err(IngestError::Malformed(msg)) => assert!(msg.contains("JSON object")),
                other => panic!("expected malformed, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_parse_rejects_implausible_values() {
        let result = RawReading::parse(br#"{"BPM":75,"SpO2":140,"TempC":26,"IR":1}"#);
        match result {
            Err(IngestError::Malformed(msg)) => assert!(msg.contains("SpO2")),
            other => panic!("expected malformed, got {:?}", other),
        }
        assert!(RawReading::parse(br#"{"BPM":-5,"SpO2":97,"TempC":26,"IR":1}"#).is_err());
    }

    #[test]
    fn test_non_finite_values() {
        assert!(RawReading::new(f64::NAN, 97.0, 26.0, 1.0).validate().is_err());
        assert!(RawReading::new(70.0, 97.0, f64::INFINITY, 1.0).validate().is_err());
    }
}
