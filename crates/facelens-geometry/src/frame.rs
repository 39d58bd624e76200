//! Raw sensor frames.

use image::RgbaImage;
use std::time::Instant;
use thiserror::Error;

const RGBA_BYTES_PER_PIXEL: usize = 4;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid RGBA buffer length: expected at least {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("row stride {stride} is shorter than a {width}-pixel row")]
    InvalidStride { stride: usize, width: u32 },
}

/// A sensor frame as delivered by the camera, before rotation.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: RgbaImage,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            image,
            timestamp: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Copy an RGBA_8888 plane whose rows may be padded to `row_stride` bytes.
    pub fn from_rgba_plane(
        plane: &[u8],
        width: u32,
        height: u32,
        row_stride: usize,
    ) -> Result<Self, FrameError> {
        Ok(Self::new(rgba_plane_to_image(plane, width, height, row_stride)?))
    }
}

/// Strip row padding from an RGBA_8888 plane.
pub fn rgba_plane_to_image(
    plane: &[u8],
    width: u32,
    height: u32,
    row_stride: usize,
) -> Result<RgbaImage, FrameError> {
    let row_bytes = (width as usize)
        .checked_mul(RGBA_BYTES_PER_PIXEL)
        .ok_or(FrameError::InvalidStride {
            stride: row_stride,
            width,
        })?;
    if row_stride < row_bytes {
        return Err(FrameError::InvalidStride {
            stride: row_stride,
            width,
        });
    }

    // The last row need not carry its padding.
    let expected = match height as usize {
        0 => Some(0),
        h => (h - 1)
            .checked_mul(row_stride)
            .and_then(|n| n.checked_add(row_bytes)),
    };
    let expected = match expected {
        Some(expected) if plane.len() >= expected => expected,
        // An overflowing size can never fit in memory.
        expected => {
            return Err(FrameError::InvalidLength {
                expected: expected.unwrap_or(usize::MAX),
                actual: plane.len(),
            })
        }
    };

    // Bounded by `expected`, which fits in `plane`.
    let packed = row_bytes.saturating_mul(height as usize);
    let mut pixels = Vec::with_capacity(packed);
    for row in 0..height as usize {
        let bytes = row
            .checked_mul(row_stride)
            .and_then(|start| plane.get(start..start.checked_add(row_bytes)?));
        let Some(bytes) = bytes else {
            return Err(FrameError::InvalidLength {
                expected,
                actual: plane.len(),
            });
        };
        pixels.extend_from_slice(bytes);
    }

    RgbaImage::from_raw(width, height, pixels).ok_or(FrameError::InvalidLength {
        expected: packed,
        actual: plane.len(),
    })
}
