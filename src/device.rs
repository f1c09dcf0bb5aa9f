//! Device configuration publish
//!
//! Settings pushed from the dashboard to the wearable (clock, WiFi
//! credentials and the caregiver phone number). Published fire-and-forget on a per-user configuration
//! topic; connected device sockets for that user forward the message.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};
use validator::{Validate, ValidationError};

/// Buffered configuration messages per subscriber
const BUS_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WifiCredentials {
    #[validate(length(min = 1, max = 32, message = "SSID must be 1 to 32 characters"))]
    pub ssid: String,

    #[validate(length(min = 8, max = 63, message = "WiFi password must be 8 to 63 characters"))]
    pub password: String,
}

/// Settings accepted by the wearable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_not_empty"))]
pub struct DeviceSettings {
    /// Calendar date, `YYYY-MM-DD`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_date"))]
    pub date: Option<String>,

    /// Wall-clock time, `HH:MM` or `HH:MM:SS`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_time"))]
    pub time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub wifi: Option<WifiCredentials>,

    /// Caregiver number the device calls on escalation, 10 digits
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(custom(function = "validate_phone_number"))]
    pub phone_number: Option<String>,
}

fn validate_date(value: &str) -> Result<(), ValidationError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|_| ())
        .map_err(|_| ValidationError::new("date").with_message("Date must be YYYY-MM-DD".into()))
}

fn validate_time(value: &str) -> Result<(), ValidationError> {
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map(|_| ())
        .map_err(|_| ValidationError::new("time").with_message("Time must be HH:MM or HH:MM:SS".into()))
}

fn validate_phone_number(value: &str) -> Result<(), ValidationError> {
    if value.len() == 10 && value.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(ValidationError::new("phone_number")
            .with_message("Phone number must be exactly 10 digits".into()))
    }
}

fn validate_not_empty(settings: &DeviceSettings) -> Result<(), ValidationError> {
    if settings.date.is_none()
        && settings.time.is_none()
        && settings.wifi.is_none()
        && settings.phone_number.is_none()
    {
        return Err(ValidationError::new("empty")
            .with_message("At least one of date, time, wifi or phone_number is required".into()));
    }
    Ok(())
}

/// Message published on a device configuration topic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfigMessage {
    pub topic: String,
    pub user_id: String,
    pub settings: DeviceSettings,
    pub published_at: DateTime<Utc>,
}

pub fn config_topic(user_id: &str) -> String {
    format!("device/{}/config", user_id)
}

/// In-process publish/subscribe bus for device configuration
#[derive(Debug, Clone)]
pub struct ConfigBus {
    sender: broadcast::Sender<DeviceConfigMessage>,
}

impl ConfigBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publish without waiting for any acknowledgment. Returns the number
    /// of subscribers that saw the message.
    pub fn publish(&self, user_id: &str, settings: DeviceSettings) -> usize {
        let message = DeviceConfigMessage {
            topic: config_topic(user_id),
            user_id: user_id.to_string(),
            settings,
            published_at: Utc::now(),
        };

        match self.sender.send(message) {
            Ok(receivers) => {
                info!(user_id = %user_id, receivers, "Published device configuration");
                receivers
            }
            Err(_) => {
                debug!(user_id = %user_id, "Device configuration published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceConfigMessage> {
        self.sender.subscribe()
    }
}

impl Default for ConfigBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wifi(ssid: &str, password: &str) -> Option<WifiCredentials> {
        Some(WifiCredentials {
            ssid: ssid.to_string(),
            password: password.to_string(),
        })
    }

    #[test]
    fn test_valid_settings() {
        let settings = DeviceSettings {
            date: Some("2026-10-16".to_string()),
            time: Some("08:30".to_string()),
            wifi: wifi("ward-3", "correct horse"),
            phone_number: Some("0912345678".to_string()),
        };
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_date_and_time() {
        let settings = DeviceSettings {
            date: Some("16/10/2026".to_string()),
            time: Some("25:00".to_string()),
            wifi: None,
            phone_number: None,
        };
        let errors = settings.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("date"));
        assert!(fields.contains_key("time"));
    }

    #[test]
    fn test_short_wifi_password() {
        let settings = DeviceSettings {
            date: None,
            time: None,
            wifi: wifi("ward-3", "short"),
            phone_number: None,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_empty_settings_rejected() {
        let settings = DeviceSettings {
            date: None,
            time: None,
            wifi: None,
            phone_number: None,
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_phone_number_only_settings() {
        let settings: DeviceSettings =
            serde_json::from_str(r#"{"phone_number":"0912345678"}"#).unwrap();
        assert!(settings.validate().is_ok());

        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json, serde_json::json!({"phone_number": "0912345678"}));
    }

    #[test]
    fn test_invalid_phone_numbers() {
        for number in ["091234567", "09123456789", "09123-4567", "phone12345", "０９１２３４５６７８"] {
            let settings = DeviceSettings {
                date: None,
                time: None,
                wifi: None,
                phone_number: Some(number.to_string()),
            };
            let errors = settings.validate().unwrap_err();
            assert!(errors.field_errors().contains_key("phone_number"), "{}", number);
        }
    }

    #[test]
    fn test_publish_reaches_subscribers() {
        let bus = ConfigBus::new();
        let mut receiver = bus.subscribe();

        let settings = DeviceSettings {
            date: Some("2026-10-16".to_string()),
            time: None,
            wifi: None,
            phone_number: None,
        };
        assert_eq!(bus.publish("patient-7", settings.clone()), 1);

        let message = receiver.try_recv().unwrap();
        assert_eq!(message.topic, "device/patient-7/config");
        assert_eq!(message.settings, settings);
    }

    #[test]
    fn test_publish_without_subscribers_is_fire_and_forget() {
        let bus = ConfigBus::new();
        let settings = DeviceSettings {
            date: None,
            time: Some("07:00:00".to_string()),
            wifi: None,
            phone_number: None,
        };
        assert_eq!(bus.publish("nobody", settings), 0);
    }
}
