//! Image buffers and acquisition layout.
//!
//! The host reads pixels from one or two fixed-size buffers. Their number and
//! shape follow the [`AcquisitionMode`]:
//!
//! - `Split`: two `W × H` buffers, one per stream
//! - `Combined`: one `W × 2H` buffer; stream 0 fills the first half and
//!   stream 1 starts at the single-frame byte size
//!
//! Every [`ImageBufferSet::apply_mode`] reallocates all buffers, so pixel
//! data from before a mode switch is never visible afterwards.

use scope_core::data::ImageGeometry;
use scope_core::error::PropertyError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Shared, immutable view of one buffer's pixels.
///
/// A view outlives later acquisitions: the next write into the buffer
/// copies the pixels first when a view is still held.
pub type ImageView = Arc<Vec<u8>>;

/// Property value selecting [`AcquisitionMode::Split`].
pub const MODE_MULTI_CHANNEL: &str = "Multi-Channel";
/// Property value selecting [`AcquisitionMode::Combined`].
pub const MODE_SINGLE: &str = "Single";

/// Layout of the two streams in the host's image buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionMode {
    /// Two independent images.
    #[default]
    Split,
    /// One image with stream 1 stitched below stream 0.
    Combined,
}

impl AcquisitionMode {
    /// Property value for this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMode::Split => MODE_MULTI_CHANNEL,
            AcquisitionMode::Combined => MODE_SINGLE,
        }
    }
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionMode {
    type Err = PropertyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            MODE_MULTI_CHANNEL => Ok(AcquisitionMode::Split),
            MODE_SINGLE => Ok(AcquisitionMode::Combined),
            other => Err(PropertyError::InvalidValue {
                name: "Mode".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Pixel storage with fixed geometry.
///
/// `pixels.len() == width * height * bytes_per_pixel` always holds.
/// Storage is copy-on-write so handing out an [`ImageView`] never blocks a
/// later acquisition.
#[derive(Debug, Clone, Default)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    bytes_per_pixel: u32,
    pixels: ImageView,
}

impl ImageBuffer {
    /// Zeroed buffer of the given geometry.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let mut buffer = Self::default();
        buffer.resize(width, height, bytes_per_pixel);
        buffer
    }

    /// Reallocate for a new geometry. Contents are zeroed.
    pub fn resize(&mut self, width: u32, height: u32, bytes_per_pixel: u32) {
        self.width = width;
        self.height = height;
        self.bytes_per_pixel = bytes_per_pixel;
        self.pixels = Arc::new(vec![0u8; self.geometry().byte_len()]);
    }

    /// Current geometry.
    pub fn geometry(&self) -> ImageGeometry {
        ImageGeometry::new(self.width, self.height, self.bytes_per_pixel)
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel depth in bytes.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }

    /// Length of the pixel storage.
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Current pixels.
    pub fn pixels(&self) -> &[u8] {
        self.pixels.as_slice()
    }

    /// Writable pixels, copied away from any outstanding view first.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        Arc::make_mut(&mut self.pixels).as_mut_slice()
    }

    /// View of the current pixels.
    pub fn view(&self) -> ImageView {
        Arc::clone(&self.pixels)
    }
}

/// Where a stream's payload lands in the buffer set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    /// Index into the buffer set
    pub buffer: usize,
    /// Byte offset inside that buffer
    pub offset: usize,
    /// Bytes of one frame
    pub len: usize,
}

/// The host-visible image buffers, indexed by channel.
#[derive(Debug, Clone)]
pub struct ImageBufferSet {
    mode: AcquisitionMode,
    frame: ImageGeometry,
    buffers: Vec<ImageBuffer>,
}

impl ImageBufferSet {
    /// Buffer set for per-stream frames of `frame` geometry, laid out per `mode`.
    pub fn new(frame: ImageGeometry, mode: AcquisitionMode) -> Self {
        let mut set = Self {
            mode,
            frame,
            buffers: Vec::new(),
        };
        set.apply_mode(mode);
        set
    }

    /// Set without any buffers (before initialize, after shutdown).
    pub fn empty() -> Self {
        Self {
            mode: AcquisitionMode::Split,
            frame: ImageGeometry::default(),
            buffers: Vec::new(),
        }
    }

    /// Discard every buffer and reallocate for `mode`.
    pub fn apply_mode(&mut self, mode: AcquisitionMode) {
        let ImageGeometry {
            width,
            height,
            bytes_per_pixel,
        } = self.frame;

        self.mode = mode;
        self.buffers.clear();
        match mode {
            AcquisitionMode::Split => {
                self.buffers.push(ImageBuffer::new(width, height, bytes_per_pixel));
                self.buffers.push(ImageBuffer::new(width, height, bytes_per_pixel));
            }
            AcquisitionMode::Combined => {
                self.buffers
                    .push(ImageBuffer::new(width, height * 2, bytes_per_pixel));
            }
        }
        tracing::debug!(
            mode = %mode,
            buffers = self.buffers.len(),
            width,
            height,
            bytes_per_pixel,
            "image buffers reallocated"
        );
    }

    /// Drop all buffers.
    pub fn clear(&mut self) {
        self.buffers.clear();
    }

    /// Current layout.
    pub fn mode(&self) -> AcquisitionMode {
        self.mode
    }

    /// Geometry of one stream's frame.
    pub fn frame_geometry(&self) -> ImageGeometry {
        self.frame
    }

    /// Byte length of one stream's frame.
    pub fn single_frame_bytes(&self) -> usize {
        self.frame.byte_len()
    }

    /// Number of buffers.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    /// Whether no buffers are allocated.
    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    /// Buffer `index`.
    pub fn buffer(&self, index: usize) -> Option<&ImageBuffer> {
        self.buffers.get(index)
    }

    /// Writable buffer `index`.
    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut ImageBuffer> {
        self.buffers.get_mut(index)
    }

    /// Geometry of buffer 0, zero when there are no buffers.
    pub fn primary_geometry(&self) -> ImageGeometry {
        self.buffers
            .first()
            .map(ImageBuffer::geometry)
            .unwrap_or_default()
    }

    /// Target region for `stream`'s payload under the current mode.
    pub fn destination(&self, stream: usize) -> Option<Destination> {
        let len = self.single_frame_bytes();
        let (buffer, offset) = match (self.mode, stream) {
            (AcquisitionMode::Split, 0 | 1) => (stream, 0),
            (AcquisitionMode::Combined, 0) => (0, 0),
            (AcquisitionMode::Combined, 1) => (0, len),
            _ => return None,
        };
        self.buffers.get(buffer)?;
        Some(Destination {
            buffer,
            offset,
            len,
        })
    }

    /// Copy a payload into `stream`'s region.
    ///
    /// Returns false when the set has no region of that exact size.
    pub fn store(&mut self, stream: usize, payload: &[u8]) -> bool {
        let Some(dest) = self.destination(stream) else {
            return false;
        };
        if payload.len() != dest.len {
            return false;
        }
        match self.buffers.get_mut(dest.buffer) {
            Some(buffer) => {
                buffer.pixels_mut()[dest.offset..dest.offset + dest.len].copy_from_slice(payload);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_combined_geometry() {
        for (w, h, bpp) in [(640, 480, 1), (16, 8, 2), (1, 1, 1), (3, 5, 2)] {
            let frame = ImageGeometry::new(w, h, bpp);
            let mut set = ImageBufferSet::new(frame, AcquisitionMode::Split);
            assert_eq!(set.len(), 2);
            for i in 0..2 {
                let buf = set.buffer(i).unwrap();
                assert_eq!(buf.byte_len(), (w * h * bpp) as usize);
                assert_eq!((buf.width(), buf.height()), (w, h));
            }

            set.apply_mode(AcquisitionMode::Combined);
            assert_eq!(set.len(), 1);
            let buf = set.buffer(0).unwrap();
            assert_eq!((buf.width(), buf.height()), (w, 2 * h));
            assert_eq!(buf.byte_len(), (w * 2 * h * bpp) as usize);
        }
    }

    #[test]
    fn reapplying_mode_clears_contents() {
        let mut set = ImageBufferSet::new(ImageGeometry::new(4, 2, 1), AcquisitionMode::Split);
        assert!(set.store(1, &[7; 8]));
        assert!(set.buffer(1).unwrap().pixels().iter().all(|&p| p == 7));

        set.apply_mode(AcquisitionMode::Split);
        assert_eq!(set.len(), 2);
        assert_eq!(set.buffer(1).unwrap().byte_len(), 8);
        assert!(set.buffer(1).unwrap().pixels().iter().all(|&p| p == 0));
    }

    #[test]
    fn combined_second_stream_starts_at_single_frame_size() {
        let set = ImageBufferSet::new(ImageGeometry::new(640, 480, 2), AcquisitionMode::Combined);
        let dest = set.destination(1).unwrap();
        assert_eq!(dest.buffer, 0);
        assert_eq!(dest.offset, 640 * 480 * 2);
        assert_eq!(dest.len, 640 * 480 * 2);
        assert!(set.destination(2).is_none());
    }

    #[test]
    fn store_rejects_wrong_size() {
        let mut set = ImageBufferSet::new(ImageGeometry::new(2, 2, 1), AcquisitionMode::Combined);
        assert!(!set.store(0, &[1; 3]));
        assert!(set.store(1, &[5; 4]));
        assert_eq!(set.buffer(0).unwrap().pixels(), &[0, 0, 0, 0, 5, 5, 5, 5]);
    }

    #[test]
    fn views_keep_their_pixels_across_writes() {
        let mut set = ImageBufferSet::new(ImageGeometry::new(2, 2, 1), AcquisitionMode::Split);
        assert!(set.store(0, &[1; 4]));
        let before = set.buffer(0).unwrap().view();

        assert!(set.store(0, &[2; 4]));
        assert_eq!(before.as_slice(), &[1; 4]);
        assert_eq!(set.buffer(0).unwrap().pixels(), &[2; 4]);
    }

    #[test]
    fn mode_strings() {
        assert_eq!("Single".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::Combined);
        assert_eq!(AcquisitionMode::Split.to_string(), "Multi-Channel");
        assert!("Stitched".parse::<AcquisitionMode>().is_err());
    }

    #[test]
    fn empty_set_has_zero_geometry() {
        let set = ImageBufferSet::empty();
        assert!(set.is_empty());
        assert_eq!(set.primary_geometry().byte_len(), 0);
        assert!(set.destination(0).is_none());
    }
}
