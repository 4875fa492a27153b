//! Acquisition errors and their host error codes.

use crate::frame_source::SourceError;
use crate::record::RecordError;
use scope_core::error::{PropertyError, DEVICE_ERR, DEVICE_NONEXISTENT_CHANNEL};
use std::time::Duration;
use thiserror::Error;

/// Engine could not be opened.
pub const ERR_CPX_INIT: i32 = 10001;
/// Engine rejected the stream configuration.
pub const ERR_CPX_CONFIGURE_FAILED: i32 = 10002;
/// Engine refused to start.
pub const ERR_CPX_START_FAILED: i32 = 10003;
/// No frame arrived before the timeout.
pub const ERR_CPX_TIMEOUT: i32 = 10004;
/// Acquisition was cancelled by the host.
pub const ERR_CPX_CANCELLED: i32 = 10005;
/// Frame payload does not match the image buffer.
pub const ERR_CPX_PAYLOAD_SIZE: i32 = 10006;
/// Frame record header is inconsistent.
pub const ERR_CPX_MALFORMED_RECORD: i32 = 10007;
/// Engine failed to stop.
pub const ERR_CPX_STOP_FAILED: i32 = 10008;
/// Camera used before `initialize`.
pub const ERR_CPX_NOT_INITIALIZED: i32 = 10009;
/// Another acquisition holds the engine.
pub const ERR_CPX_BUSY: i32 = 10010;
/// No engine device matches a selection pattern.
pub const ERR_CPX_DEVICE_SELECTION: i32 = 10011;
/// Mapping or releasing a stream's read range failed.
pub const ERR_CPX_READ_FAILED: i32 = 10012;
/// Sequence task ended abnormally.
pub const ERR_CPX_SEQUENCE_ABORTED: i32 = 10013;

/// Errors from the dual-camera adapter.
#[derive(Debug, Clone, Error)]
pub enum AcquireError {
    /// The provider could not open an engine.
    #[error("acquisition engine failed to initialize: {0}")]
    EngineInit(#[source] SourceError),

    /// The camera has no engine.
    #[error("camera is not initialized")]
    NotInitialized,

    /// `configure` failed; nothing was started.
    #[error("engine configuration failed: {0}")]
    Configure(#[source] SourceError),

    /// `start` failed; no stop is issued.
    #[error("engine start failed: {0}")]
    Start(#[source] SourceError),

    /// `stop` failed after a successful collection.
    #[error("engine stop failed: {0}")]
    Stop(#[source] SourceError),

    /// A camera or storage selection pattern matched nothing.
    #[error("no {kind} matches '{pattern}': {source}")]
    DeviceSelection {
        /// Device kind being selected
        kind: crate::frame_source::DeviceKind,
        /// Pattern that failed
        pattern: String,
        /// Engine error
        #[source]
        source: SourceError,
    },

    /// `map_read` or `unmap_read` failed.
    #[error("reading stream {stream} failed: {source}")]
    Read {
        /// Stream index
        stream: usize,
        /// Engine error
        #[source]
        source: SourceError,
    },

    /// The stream stayed empty until the deadline.
    #[error("no frame on stream {stream} after {waited:?}")]
    Timeout {
        /// Stream index
        stream: usize,
        /// Time spent polling
        waited: Duration,
    },

    /// The wait was cancelled.
    #[error("acquisition on stream {stream} cancelled")]
    Cancelled {
        /// Stream being waited on
        stream: usize,
    },

    /// The first record's payload is not one image.
    #[error("stream {stream} delivered {actual} payload bytes, buffer expects {expected}")]
    PayloadSizeMismatch {
        /// Stream index
        stream: usize,
        /// Bytes the image buffer region holds
        expected: usize,
        /// Bytes the record carried
        actual: usize,
    },

    /// The mapped range does not start with a valid record.
    #[error("malformed frame record on stream {stream}: {reason}")]
    MalformedRecord {
        /// Stream index
        stream: usize,
        /// What is wrong with the record
        #[source]
        reason: RecordError,
    },

    /// Channel index beyond the current layout.
    #[error("channel {0} does not exist")]
    NonexistentChannel(u32),

    /// Property lookup or write failed.
    #[error(transparent)]
    Property(#[from] PropertyError),

    /// Another acquisition holds the engine.
    #[error("camera is busy")]
    Busy,

    /// The sequence task panicked or was aborted.
    #[error("sequence task aborted: {0}")]
    SequenceAborted(String),
}

impl AcquireError {
    /// Host error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            AcquireError::EngineInit(_) => ERR_CPX_INIT,
            AcquireError::NotInitialized => ERR_CPX_NOT_INITIALIZED,
            AcquireError::Configure(_) => ERR_CPX_CONFIGURE_FAILED,
            AcquireError::Start(_) => ERR_CPX_START_FAILED,
            AcquireError::Stop(_) => ERR_CPX_STOP_FAILED,
            AcquireError::DeviceSelection { .. } => ERR_CPX_DEVICE_SELECTION,
            AcquireError::Read { .. } => ERR_CPX_READ_FAILED,
            AcquireError::Timeout { .. } => ERR_CPX_TIMEOUT,
            AcquireError::Cancelled { .. } => ERR_CPX_CANCELLED,
            AcquireError::PayloadSizeMismatch { .. } => ERR_CPX_PAYLOAD_SIZE,
            AcquireError::MalformedRecord { .. } => ERR_CPX_MALFORMED_RECORD,
            AcquireError::NonexistentChannel(_) => DEVICE_NONEXISTENT_CHANNEL,
            AcquireError::Property(e) => e.code(),
            AcquireError::Busy => ERR_CPX_BUSY,
            AcquireError::SequenceAborted(_) => ERR_CPX_SEQUENCE_ABORTED,
        }
    }
}

/// Message for one of this adapter's error codes.
pub fn error_text(code: i32) -> Option<&'static str> {
    let text = match code {
        ERR_CPX_INIT => "Acquisition engine failed to initialize",
        ERR_CPX_CONFIGURE_FAILED => "Acquisition engine rejected the stream configuration",
        ERR_CPX_START_FAILED => "Acquisition engine failed to start",
        ERR_CPX_TIMEOUT => "Timed out waiting for a frame",
        ERR_CPX_CANCELLED => "Acquisition cancelled",
        ERR_CPX_PAYLOAD_SIZE => "Frame payload size does not match the image buffer",
        ERR_CPX_MALFORMED_RECORD => "Malformed frame record",
        ERR_CPX_STOP_FAILED => "Acquisition engine failed to stop",
        ERR_CPX_NOT_INITIALIZED => "Camera is not initialized",
        ERR_CPX_BUSY => "Camera is busy",
        ERR_CPX_DEVICE_SELECTION => "No engine device matches the configured pattern",
        ERR_CPX_READ_FAILED => "Reading frames from the engine failed",
        ERR_CPX_SEQUENCE_ABORTED => "Sequence acquisition task aborted",
        DEVICE_NONEXISTENT_CHANNEL => "Channel does not exist",
        DEVICE_ERR => "Unknown camera error",
        _ => return None,
    };
    Some(text)
}
