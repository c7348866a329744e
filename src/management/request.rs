//! Device-initiated management operations
//!
//! One variant per operation. Constructors validate their arguments and
//! stamp capture timestamps, so a `ManagementRequest` that exists is always
//! fit to go on the wire.

use super::error::ManagementError;
use super::topics;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use std::fmt;

/// Shortest registration lifetime the controller accepts, in seconds
pub const MIN_LIFETIME_SECS: u64 = 3600;

/// Which operation a pending request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Manage,
    Unmanage,
    UpdateLocation,
    AddErrorCode,
    ClearErrorCodes,
    AddLog,
    ClearLogs,
}

impl RequestKind {
    pub fn topic(self) -> &'static str {
        match self {
            RequestKind::Manage => topics::MANAGE_TOPIC,
            RequestKind::Unmanage => topics::UNMANAGE_TOPIC,
            RequestKind::UpdateLocation => topics::UPDATE_LOCATION_TOPIC,
            RequestKind::AddErrorCode => topics::ADD_ERROR_CODE_TOPIC,
            RequestKind::ClearErrorCodes => topics::CLEAR_ERROR_CODES_TOPIC,
            RequestKind::AddLog => topics::ADD_LOG_TOPIC,
            RequestKind::ClearLogs => topics::CLEAR_LOGS_TOPIC,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Manage => write!(f, "Manage"),
            RequestKind::Unmanage => write!(f, "Unmanage"),
            RequestKind::UpdateLocation => write!(f, "Update location"),
            RequestKind::AddErrorCode => write!(f, "Add error code"),
            RequestKind::ClearErrorCodes => write!(f, "Clear error codes"),
            RequestKind::AddLog => write!(f, "Add log"),
            RequestKind::ClearLogs => write!(f, "Clear logs"),
        }
    }
}

#[derive(Serialize, Clone, Debug, Default, PartialEq)]
pub struct ManageOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supports: Option<Supports>,
}

/// Action families the device announces it can handle
#[derive(Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Supports {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_actions: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_actions: Option<bool>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub longitude: f64,
    pub latitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(serialize_with = "iso_millis")]
    pub measured_date_time: DateTime<Utc>,
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorCode {
    pub error_code: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogSeverity {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl LogSeverity {
    pub fn from_level(level: u8) -> Result<Self, ManagementError> {
        match level {
            0 => Ok(LogSeverity::Info),
            1 => Ok(LogSeverity::Warning),
            2 => Ok(LogSeverity::Error),
            other => Err(ManagementError::invalid(format!(
                "severity can only equal 0, 1, or 2, got {}",
                other
            ))),
        }
    }
}

impl Serialize for LogSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub severity: LogSeverity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(serialize_with = "iso_millis")]
    pub timestamp: DateTime<Utc>,
}

/// Body of a device-initiated request. Unit variants carry no `d`.
#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ManagementRequest {
    Manage(ManageOptions),
    Unmanage,
    UpdateLocation(Location),
    AddErrorCode(ErrorCode),
    ClearErrorCodes,
    AddLog(LogEntry),
    ClearLogs,
}

impl ManagementRequest {
    pub fn manage(
        lifetime: Option<u64>,
        supports_device_actions: Option<bool>,
        supports_firmware_actions: Option<bool>,
    ) -> Result<Self, ManagementError> {
        if let Some(lifetime) = lifetime {
            if lifetime < MIN_LIFETIME_SECS {
                return Err(ManagementError::invalid(format!(
                    "lifetime cannot be less than {}",
                    MIN_LIFETIME_SECS
                )));
            }
        }

        let supports = if supports_device_actions.is_some() || supports_firmware_actions.is_some()
        {
            Some(Supports {
                device_actions: supports_device_actions,
                firmware_actions: supports_firmware_actions,
            })
        } else {
            None
        };

        Ok(ManagementRequest::Manage(ManageOptions { lifetime, supports }))
    }

    pub fn update_location(
        longitude: f64,
        latitude: f64,
        elevation: Option<f64>,
        accuracy: Option<f64>,
    ) -> Result<Self, ManagementError> {
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(ManagementError::invalid(
                "longitude cannot be less than -180 or greater than 180",
            ));
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(ManagementError::invalid(
                "latitude cannot be less than -90 or greater than 90",
            ));
        }
        if elevation.is_some_and(|e| !e.is_finite()) {
            return Err(ManagementError::invalid("elevation must be a finite number"));
        }
        if accuracy.is_some_and(|a| !a.is_finite()) {
            return Err(ManagementError::invalid("accuracy must be a finite number"));
        }

        Ok(ManagementRequest::UpdateLocation(Location {
            longitude,
            latitude,
            elevation,
            accuracy,
            measured_date_time: Utc::now(),
        }))
    }

    pub fn add_error_code(error_code: i64) -> Self {
        ManagementRequest::AddErrorCode(ErrorCode { error_code })
    }

    pub fn add_log(
        message: impl Into<String>,
        severity: u8,
        data: Option<String>,
    ) -> Result<Self, ManagementError> {
        let severity = LogSeverity::from_level(severity)?;

        Ok(ManagementRequest::AddLog(LogEntry {
            message: message.into(),
            severity,
            data,
            timestamp: Utc::now(),
        }))
    }

    pub fn kind(&self) -> RequestKind {
        match self {
            ManagementRequest::Manage(_) => RequestKind::Manage,
            ManagementRequest::Unmanage => RequestKind::Unmanage,
            ManagementRequest::UpdateLocation(_) => RequestKind::UpdateLocation,
            ManagementRequest::AddErrorCode(_) => RequestKind::AddErrorCode,
            ManagementRequest::ClearErrorCodes => RequestKind::ClearErrorCodes,
            ManagementRequest::AddLog(_) => RequestKind::AddLog,
            ManagementRequest::ClearLogs => RequestKind::ClearLogs,
        }
    }

    pub fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    pub(crate) fn has_body(&self) -> bool {
        !matches!(
            self,
            ManagementRequest::Unmanage
                | ManagementRequest::ClearErrorCodes
                | ManagementRequest::ClearLogs
        )
    }
}

// Matches the controller's ISO-8601 format: UTC with millisecond precision
fn iso_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
