use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::RecordingError;

/// Pixel layout of raw frames handed over by the host renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    Bgra,
    Rgba,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    /// Name understood by the encoder's rawvideo demuxer.
    pub fn encoder_name(self) -> &'static str {
        match self {
            Self::Bgra => "bgra",
            Self::Rgba => "rgba",
        }
    }
}

/// One raw rendered frame.
///
/// Ephemeral: produced by the frame source, consumed by the encoder bridge,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSample {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time relative to the host's clock origin.
    pub timestamp: Duration,
}

impl FrameSample {
    /// Creates a validated frame.
    ///
    /// Fails with `InvalidFrame` when the buffer length does not match
    /// `width * height * bytes_per_pixel`.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        timestamp: Duration,
    ) -> Result<Self, RecordingError> {
        if width == 0 || height == 0 {
            return Err(RecordingError::InvalidFrame(format!(
                "frame dimensions must be positive, got {}x{}",
                width, height
            )));
        }
        let expected = Self::expected_len(width, height, format);
        if pixels.len() != expected {
            return Err(RecordingError::InvalidFrame(format!(
                "expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                pixels.len()
            )));
        }
        Ok(Self {
            pixels,
            width,
            height,
            format,
            timestamp,
        })
    }

    pub fn expected_len(width: u32, height: u32, format: PixelFormat) -> usize {
        width as usize * height as usize * format.bytes_per_pixel()
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Pads odd dimensions up to the next even value with opaque black.
    ///
    /// yuv420p chroma subsampling rejects odd widths and heights.
    pub fn pad_to_even(self) -> Self {
        let padded_width = self.width + self.width % 2;
        let padded_height = self.height + self.height % 2;
        if padded_width == self.width && padded_height == self.height {
            return self;
        }

        let bpp = self.format.bytes_per_pixel();
        let src_stride = self.width as usize * bpp;
        let dst_stride = padded_width as usize * bpp;
        let mut pixels = Vec::with_capacity(dst_stride * padded_height as usize);

        let black = [0u8, 0, 0, 255];
        for row in self.pixels.chunks_exact(src_stride) {
            pixels.extend_from_slice(row);
            for _ in self.width..padded_width {
                pixels.extend_from_slice(&black);
            }
        }
        for _ in self.height..padded_height {
            for _ in 0..padded_width {
                pixels.extend_from_slice(&black);
            }
        }

        Self {
            pixels,
            width: padded_width,
            height: padded_height,
            format: self.format,
            timestamp: self.timestamp,
        }
    }
}
