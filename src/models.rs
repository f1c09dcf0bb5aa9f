//! Data models for vital-sign samples and related structures
//!
//! Defines the core data structures shared by the classification pipeline,
//! the session actor and the HTTP/WebSocket boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::device::DeviceConfigMessage;
use crate::history::{HistoryFilter, HistoryPage};
use crate::monitor::Snapshot;

/// One instant's reading across the four sensor channels.
///
/// A channel is either a finite number or `None`. The wire sentinel never
/// reaches this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Heart rate (beats per minute)
    pub bpm: Option<f64>,
    /// Peripheral oxygen saturation (percent)
    pub spo2: Option<f64>,
    /// Body-surface temperature (Celsius)
    pub temperature: Option<f64>,
    /// Raw infrared photoplethysmography amplitude (unitless)
    pub ppg: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl Sample {
    /// A sample with every channel unknown, as seen at stream start.
    pub fn empty(captured_at: DateTime<Utc>) -> Self {
        Self {
            bpm: None,
            spo2: None,
            temperature: None,
            ppg: None,
            captured_at,
        }
    }

    /// Whether every channel is unknown
    pub fn is_empty(&self) -> bool {
        self.bpm.is_none() && self.spo2.is_none() && self.temperature.is_none() && self.ppg.is_none()
    }
}

/// Vital-sign channel that can trigger a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Bpm,
    Spo2,
    Temperature,
}

impl Channel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bpm" | "hr" | "heart_rate" | "heartrate" => Some(Channel::Bpm),
            "spo2" | "oxygen" => Some(Channel::Spo2),
            "temperature" | "temp" | "tempc" => Some(Channel::Temperature),
            _ => None,
        }
    }
}

/// Threshold violation reported by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    HeartRateOutOfRange,
    Spo2Low,
    TemperatureOutOfRange,
}

impl Warning {
    pub fn channel(self) -> Channel {
        match self {
            Warning::HeartRateOutOfRange => Channel::Bpm,
            Warning::Spo2Low => Channel::Spo2,
            Warning::TemperatureOutOfRange => Channel::Temperature,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Warning::HeartRateOutOfRange => "heart rate out of range",
            Warning::Spo2Low => "SpO2 low",
            Warning::TemperatureOutOfRange => "temperature out of range",
        }
    }
}

/// Outcome of classifying one sample against the active profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub warnings: BTreeSet<Warning>,
    pub suggested_profile: String,
    pub is_profile_mismatch: bool,
}

impl ClassificationResult {
    pub fn is_alert(&self) -> bool {
        !self.warnings.is_empty()
    }

    #[cfg(test)]
    pub fn has_warning(&self, warning: Warning) -> bool {
        self.warnings.contains(&warning)
    }

    pub fn channels(&self) -> impl Iterator<Item = Channel> + '_ {
        self.warnings.iter().map(|w| w.channel())
    }
}

/// Status tag stored with every history record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Normal,
    Alert,
    /// No sensor data: the feed went stale
    None,
}

/// A classified sample as kept in the alert history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: Uuid,
    pub sample: Sample,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub classification: Option<ClassificationResult>,
    pub status: RecordStatus,
    /// Activity profile that was active when the sample was classified
    pub profile: String,
}

impl AlertRecord {
    pub fn classified(sample: Sample, classification: ClassificationResult, profile: &str) -> Self {
        let status = if classification.is_alert() {
            RecordStatus::Alert
        } else {
            RecordStatus::Normal
        };
        Self {
            id: Uuid::new_v4(),
            sample,
            classification: Some(classification),
            status,
            profile: profile.to_string(),
        }
    }

    /// Marker record written when the feed goes silent
    pub fn no_data(captured_at: DateTime<Utc>, profile: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            sample: Sample::empty(captured_at),
            classification: None,
            status: RecordStatus::None,
            profile: profile.to_string(),
        }
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.sample.captured_at
    }

    pub fn triggered_channels(&self) -> BTreeSet<Channel> {
        self.classification
            .as_ref()
            .map(|c| c.channels().collect())
            .unwrap_or_default()
    }
}

/// Severity of the status line shown to the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
    DeviceError,
    NoData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayStatus {
    pub text: String,
    pub severity: Severity,
}

impl DisplayStatus {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    ThresholdWarning,
    ConfirmationRequested,
    ProfileChanged,
    /// The user rejected the suggestion: the sensor reading is suspect
    DeviceCheck,
    /// Confirmation timed out: physiological alert, higher severity
    HardAlert,
    NoSensorData,
}

impl NotificationKind {
    pub fn severity(self) -> Severity {
        match self {
            NotificationKind::ThresholdWarning | NotificationKind::ConfirmationRequested => {
                Severity::Warning
            }
            NotificationKind::ProfileChanged => Severity::Normal,
            NotificationKind::DeviceCheck => Severity::DeviceError,
            NotificationKind::HardAlert => Severity::Critical,
            NotificationKind::NoSensorData => Severity::NoData,
        }
    }
}

/// User-facing notification raised by the monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Position in the monitor's notification stream, strictly increasing
    pub seq: u64,
    pub kind: NotificationKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        seq: u64,
        kind: NotificationKind,
        message: impl Into<String>,
        raised_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            kind,
            message: message.into(),
            raised_at,
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Messages pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    /// Connection acknowledgment
    Connected { client_id: String, user_id: String },
    /// Display state changed
    Snapshot(Snapshot),
    /// A notification was raised
    Notification(Notification),
    /// Answer to a history view request
    HistoryPage(HistoryPage),
    /// Configuration for the user's wearable
    DeviceConfig(DeviceConfigMessage),
    /// Error message
    Error { message: String },
    /// Heartbeat/pong response
    Pong,
}

/// Messages accepted from WebSocket clients
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    /// Heartbeat/ping
    Ping,
    /// Accept the pending activity-change suggestion
    Confirm,
    /// Reject the pending activity-change suggestion
    Reject,
    SelectProfile { profile: String },
    /// Replace the history filter; goes back to page 1
    SetHistoryFilter(HistoryFilter),
    SetPageSize { page_size: u32 },
    GotoPage { page: u32 },
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub connected_clients: usize,
}
