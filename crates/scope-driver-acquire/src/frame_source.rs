//! Frame Source Engine Interface
//!
//! The acquisition engine is an external collaborator that owns the cameras
//! and storage sinks. The adapter only ever talks to it through
//! [`FrameSource`]:
//!
//! - `configure` / `get_configuration`: per-stream settings ([`SourceProperties`])
//! - `start` / `stop`: begin and end frame generation on every configured stream
//! - `map_read` / `unmap_read`: non-blocking zero-copy access to the ready,
//!   unconsumed frame records of one stream, released by byte count
//! - `select_device`: resolve a camera or storage name pattern to an identifier
//! - `shutdown`: release the engine
//!
//! Engines report diagnostics through a [`Reporter`] handed to
//! [`FrameSourceProvider::open`]; the adapter routes them into `tracing`.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Number of video streams the adapter drives.
pub const STREAM_COUNT: usize = 2;

/// Engine status returned for any failed call.
pub const STATUS_ERROR: i32 = 1;

/// Non-OK status from an engine call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("frame source call '{call}' failed with status {status}")]
pub struct SourceError {
    /// Engine call that failed
    pub call: &'static str,
    /// Status code returned
    pub status: i32,
}

impl SourceError {
    /// Failure of `call` with a specific status.
    pub fn new(call: &'static str, status: i32) -> Self {
        Self { call, status }
    }

    /// Generic failure status for `call`.
    pub fn failed(call: &'static str) -> Self {
        Self::new(call, STATUS_ERROR)
    }
}

/// Result of an engine call.
pub type SourceResult<T> = std::result::Result<T, SourceError>;

// =============================================================================
// Stream configuration
// =============================================================================

/// Pixel sample type of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleType {
    /// 8-bit unsigned
    #[default]
    U8,
    /// 16-bit unsigned, little-endian
    U16,
}

impl SampleType {
    /// Bytes per pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 => 2,
        }
    }

    /// Sample type for a pixel depth in bytes (2 → U16, anything else → U8).
    pub fn from_bytes_per_pixel(bytes: u32) -> Self {
        if bytes == 2 {
            SampleType::U16
        } else {
            SampleType::U8
        }
    }

    /// Code used in the frame header.
    pub fn wire_code(&self) -> u8 {
        match self {
            SampleType::U8 => 0,
            SampleType::U16 => 1,
        }
    }

    /// Sample type for a header code, `None` when unknown.
    pub fn from_wire_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(SampleType::U8),
            1 => Some(SampleType::U16),
            _ => None,
        }
    }
}

/// Kind of device in the engine's device registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Image source
    Camera,
    /// Frame sink
    Storage,
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Camera => write!(f, "camera"),
            DeviceKind::Storage => write!(f, "storage"),
        }
    }
}

/// Engine handle for a selected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentifier {
    /// Registry the device belongs to
    pub kind: DeviceKind,
    /// Position in the engine's device list
    pub index: u32,
    /// Device name the pattern matched
    pub name: String,
}

/// Settings of one camera + storage pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamDescriptor {
    /// Selected camera, required to configure
    pub camera: Option<DeviceIdentifier>,
    /// Selected storage
    pub storage: Option<DeviceIdentifier>,
    /// Pixel encoding
    pub sample_type: SampleType,
    /// Binning factor
    pub binning: u8,
    /// Frame shape `(width, height)` in pixels.
    pub shape: (u32, u32),
    /// Frames to produce before the stream idles; 0 means unlimited.
    pub max_frame_count: u64,
    /// Exposure in microseconds
    pub exposure_time_us: f32,
    /// Line readout interval in microseconds
    pub line_interval_us: f32,
}

impl Default for StreamDescriptor {
    fn default() -> Self {
        Self {
            camera: None,
            storage: None,
            sample_type: SampleType::U8,
            binning: 1,
            shape: (0, 0),
            max_frame_count: 0,
            exposure_time_us: 0.0,
            line_interval_us: 0.0,
        }
    }
}

/// Full engine configuration: one descriptor per stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SourceProperties {
    /// Descriptor per stream
    pub video: [StreamDescriptor; STREAM_COUNT],
}

// =============================================================================
// Engine traits
// =============================================================================

/// Acquisition engine driving two video streams.
///
/// Methods take `&mut self`: a single owner (the camera adapter) serializes
/// every call. `map_read` never blocks; an empty slice means no frame is
/// ready yet.
#[async_trait]
pub trait FrameSource: Send {
    /// Current configuration.
    async fn get_configuration(&mut self) -> SourceResult<SourceProperties>;

    /// Apply a configuration; refused while running.
    async fn configure(&mut self, properties: &SourceProperties) -> SourceResult<()>;

    /// Begin producing frames on every configured stream.
    async fn start(&mut self) -> SourceResult<()>;

    /// Stop producing frames. Stopping a stopped engine succeeds.
    async fn stop(&mut self) -> SourceResult<()>;

    /// Contiguous run of zero or more ready frame records for `stream`.
    async fn map_read(&mut self, stream: usize) -> SourceResult<&[u8]>;

    /// Release `consumed` bytes from the front of `stream`'s mapped range.
    async fn unmap_read(&mut self, stream: usize, consumed: usize) -> SourceResult<()>;

    /// First device of `kind` whose name matches the `pattern` regex.
    async fn select_device(
        &mut self,
        kind: DeviceKind,
        pattern: &str,
    ) -> SourceResult<DeviceIdentifier>;

    /// Release the engine; later calls fail.
    async fn shutdown(&mut self) -> SourceResult<()>;
}

/// Opens engine instances.
///
/// The reporter passed to `open` is the engine's only way back to the adapter
/// that owns it.
pub trait FrameSourceProvider: Send + Sync {
    /// Open a new engine.
    fn open(&self, reporter: Reporter) -> SourceResult<Box<dyn FrameSource>>;
}

// =============================================================================
// Reporter
// =============================================================================

/// Diagnostic message emitted by an engine.
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    /// Error rather than informational
    pub is_error: bool,
    /// Engine source file
    pub file: &'a str,
    /// Engine source line
    pub line: u32,
    /// Engine function
    pub function: &'a str,
    /// Message text
    pub message: &'a str,
}

/// Callback the engine uses to report diagnostics.
pub type Reporter = Arc<dyn Fn(&Report<'_>) + Send + Sync>;

/// Reporter forwarding engine messages as `tracing` events tagged with the
/// owning device's label.
pub fn tracing_reporter(device: impl Into<String>) -> Reporter {
    let device: String = device.into();
    Arc::new(move |report: &Report<'_>| {
        if report.is_error {
            tracing::error!(
                target: "scope_driver_acquire::engine",
                device = %device,
                file = report.file,
                line = report.line,
                function = report.function,
                "{}",
                report.message
            );
        } else {
            tracing::debug!(
                target: "scope_driver_acquire::engine",
                device = %device,
                file = report.file,
                line = report.line,
                function = report.function,
                "{}",
                report.message
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_type_codes() {
        assert_eq!(SampleType::from_bytes_per_pixel(2), SampleType::U16);
        assert_eq!(SampleType::from_bytes_per_pixel(1), SampleType::U8);
        assert_eq!(SampleType::from_wire_code(SampleType::U16.wire_code()), Some(SampleType::U16));
        assert_eq!(SampleType::from_wire_code(9), None);
    }

    #[test]
    fn source_error_display() {
        let err = SourceError::failed("configure");
        assert_eq!(err.to_string(), "frame source call 'configure' failed with status 1");
    }

    #[test]
    fn reporter_accepts_both_levels() {
        let reporter = tracing_reporter("cam");
        for is_error in [true, false] {
            reporter(&Report {
                is_error,
                file: file!(),
                line: line!(),
                function: "reporter_accepts_both_levels",
                message: "hello",
            });
        }
    }
}
