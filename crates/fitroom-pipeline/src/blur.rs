//! Gaussian blur for mask edge softening.
//!
//! Wraps [`imageproc::filter::gaussian_blur_f32`]. A hard {0, 255} mask
//! produces visible seams where the try-on result meets the untouched
//! person pixels; blurring the mask feathers that boundary.

use image::GrayImage;

/// Blur radius applied to every resolved mask.
///
/// Interpreted as the Gaussian standard deviation, matching how common
/// image libraries define a blur "radius".
pub const MASK_BLUR_RADIUS: f32 = 9.0;

/// Apply Gaussian blur to a grayscale image.
///
/// Non-positive sigma values return the image unchanged, since
/// `imageproc`'s underlying function panics on `sigma <= 0.0`.
#[must_use = "returns the blurred image"]
pub fn gaussian_blur(image: &GrayImage, sigma: f32) -> GrayImage {
    if sigma <= 0.0 {
        return image.clone();
    }

    imageproc::filter::gaussian_blur_f32(image, sigma)
}

/// Feather a binarized mask with the fixed [`MASK_BLUR_RADIUS`].
#[must_use = "returns the softened mask"]
pub fn soften_mask(mask: &GrayImage) -> GrayImage {
    gaussian_blur(mask, MASK_BLUR_RADIUS)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A mask with a hard vertical boundary at x=20.
    fn hard_mask() -> GrayImage {
        GrayImage::from_fn(40, 40, |x, _y| {
            if x < 20 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn zero_sigma_returns_identical_image() {
        let img = hard_mask();
        assert_eq!(gaussian_blur(&img, 0.0), img);
    }

    #[test]
    fn negative_sigma_returns_identical_image() {
        let img = hard_mask();
        assert_eq!(gaussian_blur(&img, -1.0), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = soften_mask(&img);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn softened_mask_has_intermediate_values_at_boundary() {
        let softened = soften_mask(&hard_mask());
        let left = softened.get_pixel(19, 20).0[0];
        let right = softened.get_pixel(20, 20).0[0];
        assert!(left > 0, "expected feathering left of edge, got {left}");
        assert!(right < 255, "expected feathering right of edge, got {right}");
    }

    #[test]
    fn uniform_mask_unchanged_by_blur() {
        let img = GrayImage::from_fn(10, 10, |_, _| image::Luma([255]));
        for pixel in soften_mask(&img).pixels() {
            let diff = i16::from(pixel.0[0]) - 255;
            assert!(diff.abs() <= 1, "expected ~255, got {}", pixel.0[0]);
        }
    }
}
