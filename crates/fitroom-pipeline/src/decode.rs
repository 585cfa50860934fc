//! Image decoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces the two
//! raster shapes the pipeline works with: 3-channel RGB canvases for
//! person and garment images, and single-channel masks.

use image::DynamicImage;

use crate::types::{FitroomError, GrayImage, RgbImage};

/// Decode raw image bytes without converting the color type.
///
/// # Errors
///
/// Returns [`FitroomError::EmptyInput`] if `bytes` is empty.
/// Returns [`FitroomError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, FitroomError> {
    if bytes.is_empty() {
        return Err(FitroomError::EmptyInput);
    }

    Ok(image::load_from_memory(bytes)?)
}

/// Decode raw image bytes into a 3-channel RGB canvas.
///
/// Alpha, if present, is dropped.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, FitroomError> {
    Ok(decode(bytes)?.to_rgb8())
}

/// Decode a drawn mask layer into a single luma channel.
///
/// Uses the standard luminance weights, so any painted stroke on a black
/// background ends up non-zero.
///
/// # Errors
///
/// See [`decode`].
pub fn decode_mask(bytes: &[u8]) -> Result<GrayImage, FitroomError> {
    Ok(decode(bytes)?.to_luma8())
}
