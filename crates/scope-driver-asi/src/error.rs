//! ASI controller errors and their host error codes.

use scope_core::error::PropertyError;
use std::time::Duration;
use thiserror::Error;

/// Reply did not parse.
pub const ERR_UNRECOGNIZED_ANSWER: i32 = 10001;
/// Wheel did not confirm the selected wheel.
pub const ERR_FILTER_WHEEL_NOT_READY: i32 = 10002;
/// Wheel is still moving.
pub const ERR_FILTER_WHEEL_SPINNING: i32 = 10003;
/// Stage configured with fewer than two distinct axes.
pub const ERR_NOT_ENOUGH_AXES: i32 = 10004;
/// Card address outside the controller's range.
pub const ERR_TOO_LARGE_ADDRESSES: i32 = 10005;
/// CRISP autofocus not calibrated.
pub const ERR_CRISP_NOT_CALIBRATED: i32 = 10006;
/// CRISP autofocus not locked.
pub const ERR_CRISP_NOT_LOCKED: i32 = 10007;
/// No reply in time.
pub const ERR_TIMEOUT: i32 = 10008;
/// Wheel position out of range.
pub const ERR_INVALID_POSITION: i32 = 10009;
/// Serial transport failed.
pub const ERR_IO: i32 = 10010;
/// Device used before `initialize`.
pub const ERR_NOT_INITIALIZED: i32 = 10011;

/// Controller `:N-<n>` replies map to `ERR_ASICODE_OFFSET + n`.
pub const ERR_ASICODE_OFFSET: i32 = 10100;

/// Errors from ASI Tiger devices.
#[derive(Debug, Error)]
pub enum AsiError {
    /// Reply that is neither `:A` nor `:N`.
    #[error("unrecognized answer from controller: '{0}'")]
    UnrecognizedAnswer(String),

    /// The wheel answered for a different wheel number.
    #[error("filter wheel not ready")]
    FilterWheelNotReady,

    /// The wheel is moving.
    #[error("filter wheel is spinning")]
    FilterWheelSpinning,

    /// Axis letters are missing or equal.
    #[error("not enough axes: {0}")]
    NotEnoughAxes(String),

    /// Card address outside the controller's range.
    #[error("card address '{0}' out of range")]
    TooLargeAddresses(String),

    /// CRISP autofocus not calibrated.
    #[error("CRISP is not calibrated")]
    CrispNotCalibrated,

    /// CRISP autofocus not locked.
    #[error("CRISP is not locked")]
    CrispNotLocked,

    /// `:N-<code>` reply.
    #[error("controller error {code}: {}", describe(.code))]
    Controller {
        /// Controller error number, as sent (negative)
        code: i32,
    },

    /// No reply line before the deadline.
    #[error("no reply to '{command}' within {timeout:?}")]
    Timeout {
        /// Command that went unanswered
        command: String,
        /// Deadline that passed
        timeout: Duration,
    },

    /// Wheel position outside `0..count`.
    #[error("position {position} outside 0..{count}")]
    InvalidPosition {
        /// Requested position
        position: u32,
        /// Positions on the wheel
        count: u32,
    },

    /// Device used before `initialize`.
    #[error("device is not initialized")]
    NotInitialized,

    /// Property lookup or write failed.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Serial read or write failed.
    #[error("serial I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl AsiError {
    /// Host error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            AsiError::UnrecognizedAnswer(_) => ERR_UNRECOGNIZED_ANSWER,
            AsiError::FilterWheelNotReady => ERR_FILTER_WHEEL_NOT_READY,
            AsiError::FilterWheelSpinning => ERR_FILTER_WHEEL_SPINNING,
            AsiError::NotEnoughAxes(_) => ERR_NOT_ENOUGH_AXES,
            AsiError::TooLargeAddresses(_) => ERR_TOO_LARGE_ADDRESSES,
            AsiError::CrispNotCalibrated => ERR_CRISP_NOT_CALIBRATED,
            AsiError::CrispNotLocked => ERR_CRISP_NOT_LOCKED,
            AsiError::Controller { code } => ERR_ASICODE_OFFSET + code.abs(),
            AsiError::Timeout { .. } => ERR_TIMEOUT,
            AsiError::InvalidPosition { .. } => ERR_INVALID_POSITION,
            AsiError::NotInitialized => ERR_NOT_INITIALIZED,
            AsiError::Property(e) => e.code(),
            AsiError::Io(_) => ERR_IO,
        }
    }
}

/// Meaning of a `:N-<code>` reply.
pub fn controller_message(code: i32) -> &'static str {
    match code.abs() {
        1 => "unknown command",
        2 => "unrecognized axis parameter",
        3 => "missing parameters",
        4 => "parameter out of range",
        5 => "operation failed",
        6 => "undefined error",
        7 => "invalid card address",
        21 => "serial command halted by HALT",
        _ => "unknown controller error",
    }
}

fn describe(code: &i32) -> &'static str {
    controller_message(*code)
}

/// Message for one of this crate's error codes.
pub fn error_text(code: i32) -> Option<&'static str> {
    let text = match code {
        ERR_UNRECOGNIZED_ANSWER => "Unrecognized answer received from the controller",
        ERR_FILTER_WHEEL_NOT_READY => "Filter wheel doesn't appear to be connected",
        ERR_FILTER_WHEEL_SPINNING => "Filter wheel cannot move while spinning",
        ERR_NOT_ENOUGH_AXES => "Not enough axes for this device",
        ERR_TOO_LARGE_ADDRESSES => "Card address too large",
        ERR_CRISP_NOT_CALIBRATED => "CRISP is not calibrated",
        ERR_CRISP_NOT_LOCKED => "CRISP is not locked",
        ERR_TIMEOUT => "Timed out waiting for the controller",
        ERR_INVALID_POSITION => "Position out of range",
        ERR_IO => "Serial communication failed",
        ERR_NOT_INITIALIZED => "Device is not initialized",
        c if c > ERR_ASICODE_OFFSET && c < ERR_ASICODE_OFFSET + 100 => {
            controller_message(c - ERR_ASICODE_OFFSET)
        }
        _ => return None,
    };
    Some(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn controller_codes_are_offset() {
        let err = AsiError::Controller { code: -4 };
        assert_eq!(err.code(), 10104);
        assert_eq!(error_text(err.code()), Some("parameter out of range"));
        assert_eq!(err.to_string(), "controller error -4: parameter out of range");
    }

    #[test]
    fn every_named_error_has_text() {
        let errors = [
            AsiError::UnrecognizedAnswer("?".into()),
            AsiError::FilterWheelNotReady,
            AsiError::FilterWheelSpinning,
            AsiError::NotEnoughAxes("X".into()),
            AsiError::TooLargeAddresses("G".into()),
            AsiError::CrispNotCalibrated,
            AsiError::CrispNotLocked,
            AsiError::InvalidPosition {
                position: 9,
                count: 6,
            },
            AsiError::NotInitialized,
        ];
        for err in errors {
            assert!(error_text(err.code()).is_some(), "{err}");
        }
        assert_eq!(error_text(42), None);
    }
}
