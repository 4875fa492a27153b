//! Image frames and geometry.

/// Represents a single image frame.
///
/// # Storage
/// Data is stored as a raw byte vector (`Vec<u8>`).
/// - 8-bit images: 1 byte per pixel.
/// - 16-bit images: 2 bytes per pixel, Little Endian.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Engine-assigned frame number (0 when unknown)
    pub frame_id: u64,

    /// Width in pixels
    pub width: u32,

    /// Height in pixels
    pub height: u32,

    /// Bits per pixel (8 or 16)
    pub bit_depth: u32,

    /// Raw pixel data
    pub data: Vec<u8>,
}

impl Frame {
    /// Create a new frame from 16-bit pixel data.
    pub fn from_u16(width: u32, height: u32, pixels: &[u16]) -> Self {
        let mut data = Vec::with_capacity(pixels.len() * 2);
        for pixel in pixels {
            data.extend_from_slice(&pixel.to_le_bytes());
        }

        Self {
            frame_id: 0,
            width,
            height,
            bit_depth: 16,
            data,
        }
    }

    /// Create a new frame from 8-bit pixel data.
    pub fn from_u8(width: u32, height: u32, data: Vec<u8>) -> Self {
        Self {
            frame_id: 0,
            width,
            height,
            bit_depth: 8,
            data,
        }
    }

    /// Create a frame from raw byte data with explicit bit depth.
    ///
    /// The caller must ensure the buffer length matches the expected size for the bit depth.
    pub fn from_bytes(width: u32, height: u32, bit_depth: u32, data: Vec<u8>) -> Self {
        Self {
            frame_id: 0,
            width,
            height,
            bit_depth,
            data,
        }
    }

    /// Tag the frame with its engine frame id.
    pub fn with_frame_id(mut self, frame_id: u64) -> Self {
        self.frame_id = frame_id;
        self
    }

    /// Bytes per pixel, rounded up from the bit depth.
    pub fn bytes_per_pixel(&self) -> usize {
        self.bit_depth.div_ceil(8) as usize
    }

    /// Get pixel value at (x, y) as u32 (handling bit depth conversion).
    pub fn get(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.width || y >= self.height {
            return None;
        }

        let idx = (y as usize) * (self.width as usize) + x as usize;

        match self.bit_depth {
            8 => self.data.get(idx).map(|&v| v as u32),
            16 => {
                let start = idx * 2;
                self.data
                    .get(start..start + 2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as u32)
            }
            _ => None,
        }
    }

    /// Calculate mean pixel value.
    pub fn mean(&self) -> f64 {
        match self.bit_depth {
            8 => {
                if self.data.is_empty() {
                    return 0.0;
                }
                let sum: u64 = self.data.iter().map(|&v| v as u64).sum();
                sum as f64 / self.data.len() as f64
            }
            16 => {
                let count = self.data.len() / 2;
                if count == 0 {
                    return 0.0;
                }
                let sum: u64 = self
                    .data
                    .chunks_exact(2)
                    .map(|b| u16::from_le_bytes([b[0], b[1]]) as u64)
                    .sum();
                sum as f64 / count as f64
            }
            _ => 0.0,
        }
    }
}

/// Geometry of a camera's current output image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImageGeometry {
    /// Pixels per row
    pub width: u32,
    /// Rows
    pub height: u32,
    /// Bytes per pixel
    pub bytes_per_pixel: u32,
}

impl ImageGeometry {
    /// Geometry of a `width × height` image.
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        Self {
            width,
            height,
            bytes_per_pixel,
        }
    }

    /// Total byte length of one image.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.bytes_per_pixel as usize
    }

    /// Bits per pixel.
    pub fn bit_depth(&self) -> u32 {
        self.bytes_per_pixel * 8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_u16_frame() {
        let frame = Frame::from_u16(2, 1, &[100, 300]);
        assert_eq!(frame.get(1, 0), Some(300));
        assert!((frame.mean() - 200.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mean_of_u8_frame() {
        let frame = Frame::from_u8(2, 2, vec![0, 2, 4, 6]).with_frame_id(7);
        assert_eq!(frame.frame_id, 7);
        assert_eq!(frame.get(2, 0), None);
        assert!((frame.mean() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn geometry_byte_len() {
        let g = ImageGeometry::new(640, 480, 1);
        assert_eq!(g.byte_len(), 640 * 480);
        assert_eq!(g.bit_depth(), 8);
    }
}
