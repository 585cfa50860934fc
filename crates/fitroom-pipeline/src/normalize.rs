//! Input normalization to the canonical canvas.
//!
//! Every image that reaches an inference engine must match the
//! canonical `(width, height)` of the call exactly. Two strategies get
//! there from arbitrary aspect ratios:
//!
//! - [`resize_and_crop`] covers the canvas and center-crops the excess.
//!   Used for the person image and a user-drawn mask, which must share
//!   the same geometry.
//! - [`resize_and_pad`] fits the image inside the canvas and letterboxes
//!   the rest with white. Used for the garment, where losing content at
//!   the edges would lose part of the product.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Pixel, Rgb};

use crate::types::{CanonicalSize, FitroomError, GrayImage, RgbImage};

/// Resampling filter for person and garment canvases.
pub const CANVAS_FILTER: FilterType = FilterType::Lanczos3;

/// Resampling filter for masks. Nearest-neighbor keeps binarized values
/// in {0, 255}.
pub const MASK_FILTER: FilterType = FilterType::Nearest;

/// Letterbox fill for [`resize_and_pad`].
pub const PAD_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Scale-and-crop `image` to exactly `size`.
///
/// The largest centered region with the target aspect ratio is cut out
/// first, then resampled to `size`, so the output dimensions never
/// depend on rounding in the scale factor.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if `image` has a zero-length axis.
pub fn resize_and_crop<P>(
    image: &ImageBuffer<P, Vec<P::Subpixel>>,
    size: CanonicalSize,
    filter: FilterType,
) -> Result<ImageBuffer<P, Vec<P::Subpixel>>, FitroomError>
where
    P: Pixel + 'static,
    P::Subpixel: 'static,
{
    let (w, h) = non_empty(image.dimensions())?;
    let (tw, th) = (u64::from(size.width), u64::from(size.height));

    // Compare w/h against tw/th without floating point.
    let (crop_w, crop_h) = if u64::from(w) * th < tw * u64::from(h) {
        (w, narrow(u64::from(w) * th / tw, h))
    } else {
        (narrow(u64::from(h) * tw / th, w), h)
    };
    let (crop_w, crop_h) = (crop_w.max(1), crop_h.max(1));

    let cropped =
        imageops::crop_imm(image, (w - crop_w) / 2, (h - crop_h) / 2, crop_w, crop_h).to_image();
    if size.matches(&cropped) {
        return Ok(cropped);
    }
    Ok(imageops::resize(&cropped, size.width, size.height, filter))
}

/// Scale `image` to fit inside `size` and pad it to exactly `size`.
///
/// The scaled image is centered on a white canvas. No source content is
/// lost.
///
/// # Errors
///
/// Returns [`FitroomError::Input`] if `image` has a zero-length axis.
pub fn resize_and_pad(
    image: &RgbImage,
    size: CanonicalSize,
    filter: FilterType,
) -> Result<RgbImage, FitroomError> {
    let (w, h) = non_empty(image.dimensions())?;
    let (tw, th) = (size.width, size.height);

    let (new_w, new_h) = if u64::from(w) * u64::from(th) < u64::from(tw) * u64::from(h) {
        (narrow(u64::from(w) * u64::from(th) / u64::from(h), tw), th)
    } else {
        (tw, narrow(u64::from(h) * u64::from(tw) / u64::from(w), th))
    };
    let (new_w, new_h) = (new_w.max(1), new_h.max(1));

    let resized = if (new_w, new_h) == (w, h) {
        image.clone()
    } else {
        imageops::resize(image, new_w, new_h, filter)
    };

    let mut canvas = RgbImage::from_pixel(tw, th, PAD_COLOR);
    imageops::replace(
        &mut canvas,
        &resized,
        i64::from((tw - new_w) / 2),
        i64::from((th - new_h) / 2),
    );
    Ok(canvas)
}

/// Normalizes the raw inputs of one submission to a canonical size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputNormalizer {
    size: CanonicalSize,
}

impl InputNormalizer {
    /// Create a normalizer targeting `size`.
    #[must_use]
    pub const fn new(size: CanonicalSize) -> Self {
        Self { size }
    }

    /// The canonical size every output matches.
    #[must_use]
    pub const fn size(&self) -> CanonicalSize {
        self.size
    }

    /// Scale and center-crop the person image.
    ///
    /// # Errors
    ///
    /// See [`resize_and_crop`].
    pub fn person(&self, image: &RgbImage) -> Result<RgbImage, FitroomError> {
        resize_and_crop(image, self.size, CANVAS_FILTER)
    }

    /// Scale and letterbox the garment image.
    ///
    /// # Errors
    ///
    /// See [`resize_and_pad`].
    pub fn garment(&self, image: &RgbImage) -> Result<RgbImage, FitroomError> {
        resize_and_pad(image, self.size, CANVAS_FILTER)
    }

    /// Crop a mask with the person geometry, keeping values unblended.
    ///
    /// # Errors
    ///
    /// See [`resize_and_crop`].
    pub fn mask(&self, mask: &GrayImage) -> Result<GrayImage, FitroomError> {
        resize_and_crop(mask, self.size, MASK_FILTER)
    }
}

fn non_empty((w, h): (u32, u32)) -> Result<(u32, u32), FitroomError> {
    if w == 0 || h == 0 {
        return Err(FitroomError::Input(format!(
            "source image has no pixels ({w}x{h})"
        )));
    }
    Ok((w, h))
}

/// Narrow a value already bounded by `limit` back to `u32`.
fn narrow(value: u64, limit: u32) -> u32 {
    u32::try_from(value).map_or(limit, |v| v.min(limit))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn size(w: u32, h: u32) -> CanonicalSize {
        CanonicalSize::try_new(w, h).unwrap()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn gradient(w: u32, h: u32) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
    }

    #[test]
    fn crop_output_is_exactly_canonical_for_many_aspects() {
        let target = size(768, 1024);
        for (w, h) in [(600, 800), (1920, 1080), (100, 1000), (767, 1025), (1, 1)] {
            let out = resize_and_crop(&gradient(w, h), target, CANVAS_FILTER).unwrap();
            assert_eq!(out.dimensions(), (768, 1024), "source {w}x{h}");
        }
    }

    #[test]
    fn pad_output_is_exactly_canonical_for_many_aspects() {
        let target = size(768, 1024);
        for (w, h) in [(400, 600), (1920, 1080), (1000, 100), (3, 7), (1, 1)] {
            let out = resize_and_pad(&gradient(w, h), target, CANVAS_FILTER).unwrap();
            assert_eq!(out.dimensions(), (768, 1024), "source {w}x{h}");
        }
    }

    #[test]
    fn crop_takes_the_center() {
        // 6x2 source into a 2x2 target: the middle two columns survive.
        let src = RgbImage::from_fn(6, 2, |x, _| {
            if (2..4).contains(&x) {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let out = resize_and_crop(&src, size(2, 2), FilterType::Nearest).unwrap();
        for pixel in out.pixels() {
            assert_eq!(pixel.0, [255, 0, 0]);
        }
    }

    #[test]
    fn pad_letterboxes_with_white() {
        // A wide black garment in a square canvas leaves white bands
        // above and below.
        let src = RgbImage::from_pixel(4, 2, Rgb([0, 0, 0]));
        let out = resize_and_pad(&src, size(4, 4), FilterType::Nearest).unwrap();
        assert_eq!(out.get_pixel(0, 0).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 3).0, [255, 255, 255]);
        assert_eq!(out.get_pixel(0, 1).0, [0, 0, 0]);
        assert_eq!(out.get_pixel(3, 2).0, [0, 0, 0]);
    }

    #[test]
    fn pad_keeps_all_content_visible() {
        // Black pixels at all four corners must still appear somewhere.
        let src = RgbImage::from_fn(10, 30, |x, y| {
            if (x == 0 || x == 9) && (y == 0 || y == 29) {
                Rgb([0, 0, 0])
            } else {
                Rgb([200, 200, 200])
            }
        });
        let out = resize_and_pad(&src, size(10, 30), FilterType::Nearest).unwrap();
        assert_eq!(out, src);
    }

    #[test]
    fn mask_crop_keeps_binary_values() {
        let mask = GrayImage::from_fn(300, 500, |x, _| {
            if x < 150 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        });
        let out = InputNormalizer::new(size(64, 96)).mask(&mask).unwrap();
        assert_eq!(out.dimensions(), (64, 96));
        assert!(out.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn zero_area_source_is_input_error() {
        let empty = RgbImage::new(0, 5);
        assert!(matches!(
            resize_and_crop(&empty, size(4, 4), CANVAS_FILTER),
            Err(FitroomError::Input(_))
        ));
        assert!(matches!(
            resize_and_pad(&empty, size(4, 4), CANVAS_FILTER),
            Err(FitroomError::Input(_))
        ));
    }

    #[test]
    fn scenario_person_and_garment_reach_canonical_size() {
        let normalizer = InputNormalizer::new(size(768, 1024));
        let person = normalizer.person(&gradient(600, 800)).unwrap();
        let garment = normalizer.garment(&gradient(400, 600)).unwrap();
        assert_eq!(person.dimensions(), (768, 1024));
        assert_eq!(garment.dimensions(), (768, 1024));
    }
}
