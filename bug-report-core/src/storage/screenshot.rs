use std::path::Path;

use image::codecs::jpeg::JpegEncoder;

use crate::models::error::BundleError;
use crate::models::frame::{FrameSample, PixelFormat};
use crate::storage::atomic_file::write_file_sync;

/// Screenshot inside a bundle directory.
pub const SCREENSHOT_FILE: &str = "screenshot.jpg";

const JPEG_QUALITY: u8 = 90;

/// Encodes `frame` as a JPEG, dropping the alpha channel.
pub fn encode_jpeg(frame: &FrameSample) -> Result<Vec<u8>, BundleError> {
    let rgb = to_rgb(frame);
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode(&rgb, frame.width, frame.height, image::ColorType::Rgb8.into())
        .map_err(|e| BundleError::StorageError(format!("jpeg encoding failed: {}", e)))?;
    Ok(jpeg)
}

/// Writes the JPEG of `frame` to `path` and returns its size.
pub fn write_jpeg(frame: &FrameSample, path: &Path) -> Result<u64, BundleError> {
    let jpeg = encode_jpeg(frame)?;
    write_file_sync(path, &jpeg)
        .map_err(|e| BundleError::StorageError(format!("failed to write screenshot: {}", e)))?;
    Ok(jpeg.len() as u64)
}

fn to_rgb(frame: &FrameSample) -> Vec<u8> {
    frame
        .pixels
        .chunks_exact(frame.format.bytes_per_pixel())
        .flat_map(|px| match frame.format {
            PixelFormat::Bgra => [px[2], px[1], px[0]],
            PixelFormat::Rgba => [px[0], px[1], px[2]],
        })
        .collect()
}
