//! Input validation module
//!
//! Validation for API inputs that are not sensor messages: user ids,
//! device settings, history query parameters and pagination.

use std::collections::BTreeSet;
use tracing::{debug, warn};
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::device::DeviceSettings;
use crate::error::{AppError, AppResult};
use crate::models::Channel;

/// Pagination constraints for the history view
pub struct PageConstraints;

impl PageConstraints {
    pub const DEFAULT_LIMIT: u32 = 20;
    pub const MAX_LIMIT: u32 = 1000;
}

/// Longest accepted opaque user identifier
const MAX_USER_ID_LEN: usize = 128;

fn collect_messages(prefix: &str, errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errors) => {
                let msgs: Vec<String> = errors
                    .iter()
                    .map(|e| {
                        e.message
                            .as_ref()
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| e.code.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, msgs.join(", ")));
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_messages(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

/// Flatten validator errors into one client-safe message
pub fn describe_errors(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_messages("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

/// Validate device settings before publishing them
pub fn validate_device_settings(settings: &DeviceSettings) -> AppResult<()> {
    if let Err(validation_errors) = settings.validate() {
        let message = describe_errors(&validation_errors);
        warn!(errors = %message, "Device settings validation failed");
        return Err(AppError::ValidationError(message));
    }

    debug!("Device settings validation passed");
    Ok(())
}

/// Validate the opaque user identifier handed over by the identity layer
pub fn validate_user_id(user_id: &str) -> AppResult<()> {
    if user_id.is_empty() || user_id.len() > MAX_USER_ID_LEN {
        return Err(AppError::ValidationError(format!(
            "User id must be 1 to {} characters",
            MAX_USER_ID_LEN
        )));
    }

    if !user_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        || user_id.chars().all(|c| c == '.')
    {
        return Err(AppError::ValidationError(
            "User id may only contain letters, digits, '-', '_' and '.'".to_string(),
        ));
    }

    Ok(())
}

/// Parse a comma-separated channel list such as `bpm,spo2`
pub fn parse_channels(value: &str) -> AppResult<BTreeSet<Channel>> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| {
            Channel::parse(part).ok_or_else(|| {
                AppError::ValidationError(format!(
                    "Unknown channel '{}'. Valid channels: bpm, spo2, temperature",
                    part.trim()
                ))
            })
        })
        .collect()
}

/// Validate pagination parameters
pub fn validate_pagination(page: Option<u32>, limit: Option<u32>) -> AppResult<(u32, u32)> {
    let page = page.unwrap_or(1);
    let limit = limit.unwrap_or(PageConstraints::DEFAULT_LIMIT);

    if page == 0 {
        return Err(AppError::ValidationError(
            "Page number must be greater than 0".to_string(),
        ));
    }

    if limit == 0 || limit > PageConstraints::MAX_LIMIT {
        return Err(AppError::ValidationError(format!(
            "Limit must be between 1 and {}",
            PageConstraints::MAX_LIMIT
        )));
    }

    Ok((page, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::WifiCredentials;

    #[test]
    fn test_valid_device_settings() {
        let settings = DeviceSettings {
            date: Some("2026-01-31".to_string()),
            time: Some("12:00:00".to_string()),
            wifi: None,
            phone_number: None,
        };
        assert!(validate_device_settings(&settings).is_ok());
    }

    #[test]
    fn test_nested_wifi_errors_are_reported() {
        let settings = DeviceSettings {
            date: None,
            time: None,
            wifi: Some(WifiCredentials {
                ssid: String::new(),
                password: "12345678".to_string(),
            }),
            phone_number: None,
        };

        match validate_device_settings(&settings) {
            Err(AppError::ValidationError(msg)) => assert!(msg.contains("wifi.ssid")),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("patient-42").is_ok());
        assert!(validate_user_id("a1B2.c_d").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("..").is_err());
        assert!(validate_user_id("../etc").is_err());
        assert!(validate_user_id(&"x".repeat(200)).is_err());
    }

    #[test]
    fn test_parse_channels() {
        let channels = parse_channels("bpm, spo2").unwrap();
        assert_eq!(channels.len(), 2);
        assert!(channels.contains(&Channel::Bpm));
        assert!(parse_channels("").unwrap().is_empty());
        assert!(parse_channels("bpm,ir").is_err());
    }

    #[test]
    fn test_pagination_validation() {
        // Valid cases
        assert_eq!(validate_pagination(None, None).unwrap(), (1, 20));
        assert!(validate_pagination(Some(1), Some(50)).is_ok());

        // Invalid cases
        assert!(validate_pagination(Some(0), Some(50)).is_err());
        assert!(validate_pagination(Some(1), Some(0)).is_err());
        assert!(validate_pagination(Some(1), Some(2000)).is_err());
    }
}
