//! Error types shared by all adapters.
//!
//! Every driver crate defines its own `thiserror` enum for protocol-level
//! failures (`AcquireError`, `AsiError`). This module holds the pieces that are
//! common to all of them:
//!
//! - **`DriverError`**: factory-level failures (bad config, failed build), tagged
//!   with the driver type and a [`DriverErrorKind`].
//! - **`PropertyError`**: failures of the string-valued property table.
//! - **`ScopeError`**: aggregate used at application boundaries.
//!
//! Adapters also expose stable numeric codes for their errors through
//! [`crate::capabilities::HasErrorText`]. The codes below are shared by every
//! adapter and follow the host convention.

use thiserror::Error;

/// Generic success code.
pub const DEVICE_OK: i32 = 0;
/// Generic failure code.
pub const DEVICE_ERR: i32 = 1;
/// Property name not known to the device.
pub const DEVICE_INVALID_PROPERTY: i32 = 2;
/// Property value rejected (not in the allowed set, wrong type).
pub const DEVICE_INVALID_PROPERTY_VALUE: i32 = 3;
/// Write attempted on a read-only property.
pub const DEVICE_PROPERTY_READ_ONLY: i32 = 9;
/// Channel index past the number of channels the camera currently has.
pub const DEVICE_NONEXISTENT_CHANNEL: i32 = 23;

// =============================================================================
// Driver Errors
// =============================================================================

/// What a driver was doing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    /// Opening or probing the device
    Initialization,
    /// Rejected or unparsable configuration
    Configuration,
    /// Transport failure
    Communication,
    /// Releasing the device
    Shutdown,
    /// Device reported a fault
    Hardware,
    /// No reply in time
    Timeout,
    /// Argument out of range
    InvalidParameter,
    /// Anything else
    Unknown,
}

impl std::fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DriverErrorKind::Initialization => "initialization",
            DriverErrorKind::Configuration => "configuration",
            DriverErrorKind::Communication => "communication",
            DriverErrorKind::Shutdown => "shutdown",
            DriverErrorKind::Hardware => "hardware",
            DriverErrorKind::Timeout => "timeout",
            DriverErrorKind::InvalidParameter => "invalid_parameter",
            DriverErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", label)
    }
}

/// Failure reported by a driver factory or driver.
#[derive(Error, Debug, Clone)]
#[error("Driver '{driver_type}' {kind} error: {message}")]
pub struct DriverError {
    /// Factory driver type, e.g. `asi_xy_stage`
    pub driver_type: String,
    /// Phase that failed
    pub kind: DriverErrorKind,
    /// Human-readable detail
    pub message: String,
}

impl DriverError {
    /// Error of `kind` from the `driver_type` driver.
    pub fn new(
        driver_type: impl Into<String>,
        kind: DriverErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            driver_type: driver_type.into(),
            kind,
            message: message.into(),
        }
    }
}

// =============================================================================
// Property Errors
// =============================================================================

/// Failure of a property table lookup or write.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PropertyError {
    /// No property with this name is registered.
    #[error("Unknown property '{0}'")]
    Unknown(String),

    /// The property exists but cannot be written from outside the driver.
    #[error("Property '{0}' is read-only")]
    ReadOnly(String),

    /// The value is not one of the property's allowed values.
    #[error("Invalid value '{value}' for property '{name}'")]
    InvalidValue {
        /// Property name
        name: String,
        /// Rejected value
        value: String,
    },

    /// The value does not parse as the property's declared kind.
    #[error("Cannot parse '{value}' as {kind} for property '{name}'")]
    Parse {
        /// Property name
        name: String,
        /// Rejected value
        value: String,
        /// Expected kind label
        kind: &'static str,
    },
}

impl PropertyError {
    /// Host error code for this failure.
    pub fn code(&self) -> i32 {
        match self {
            PropertyError::Unknown(_) => DEVICE_INVALID_PROPERTY,
            PropertyError::ReadOnly(_) => DEVICE_PROPERTY_READ_ONLY,
            PropertyError::InvalidValue { .. } | PropertyError::Parse { .. } => {
                DEVICE_INVALID_PROPERTY_VALUE
            }
        }
    }
}

// =============================================================================
// Aggregate
// =============================================================================

/// Convenience alias for results using the aggregate error type.
pub type ScopeResult<T> = std::result::Result<T, ScopeError>;

/// Top-level error used where errors from several drivers meet
/// (registry, CLI).
#[derive(Error, Debug)]
pub enum ScopeError {
    /// Configuration values failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Driver factory failure.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Property table failure.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Standard I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A device id was requested that the registry does not hold.
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    /// Failure surfaced from a capability call.
    #[error("Device error: {0}")]
    Device(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("asi_xy_stage", DriverErrorKind::Configuration, "missing port");
        assert_eq!(
            err.to_string(),
            "Driver 'asi_xy_stage' configuration error: missing port"
        );
    }

    #[test]
    fn test_property_error_codes() {
        assert_eq!(
            PropertyError::Unknown("Foo".into()).code(),
            DEVICE_INVALID_PROPERTY
        );
        assert_eq!(
            PropertyError::ReadOnly("Name".into()).code(),
            DEVICE_PROPERTY_READ_ONLY
        );
        let invalid = PropertyError::InvalidValue {
            name: "Mode".into(),
            value: "Triple".into(),
        };
        assert_eq!(invalid.code(), DEVICE_INVALID_PROPERTY_VALUE);
    }

    #[test]
    fn test_scope_error_from_property_error() {
        let err: ScopeError = PropertyError::Unknown("Foo".into()).into();
        assert!(matches!(err, ScopeError::Property(PropertyError::Unknown(_))));
    }
}
