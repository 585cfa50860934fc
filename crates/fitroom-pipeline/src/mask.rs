//! Mask resolution: decide which mask drives the try-on.
//!
//! A user-drawn mask wins only when it actually contains a drawing, i.e.
//! more than one distinct pixel value. A blank or single-valued layer
//! (what the editor hands over when nothing was painted) falls back to
//! the auto-segmentation engine. The chosen mask is binarized, brought
//! to the canonical size, and feathered with a fixed-radius blur.

use std::sync::Arc;

use image::Luma;
use serde::{Deserialize, Serialize};

use crate::blur;
use crate::engine::Segmenter;
use crate::normalize::InputNormalizer;
use crate::types::{CanonicalSize, FitroomError, GarmentKind, GrayImage, RgbImage, Stage};

/// Which source produced the resolved mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskSource {
    /// The user's drawing.
    User,
    /// The auto-segmentation engine.
    Auto,
}

/// A canonical-size mask and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedMask {
    /// The mask. Hard {0, 255} from [`MaskResolver::acquire`], feathered
    /// from [`MaskResolver::resolve`].
    pub mask: GrayImage,
    /// The source that won.
    pub source: MaskSource,
}

/// Count distinct pixel values, stopping early once two are found.
#[must_use]
pub fn has_multiple_values(mask: &GrayImage) -> bool {
    let mut pixels = mask.pixels();
    let Some(first) = pixels.next() else {
        return false;
    };
    pixels.any(|p| p != first)
}

/// Number of distinct pixel values in `mask`.
#[must_use]
pub fn distinct_values(mask: &GrayImage) -> usize {
    let mut seen = [false; 256];
    for p in mask.pixels() {
        seen[usize::from(p.0[0])] = true;
    }
    seen.iter().filter(|&&s| s).count()
}

/// Threshold a mask so every non-zero value becomes 255.
#[must_use = "returns the binarized mask"]
pub fn binarize(mask: &GrayImage) -> GrayImage {
    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y).0[0] > 0 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Resolves the authoritative mask for a submission.
pub struct MaskResolver {
    segmenter: Arc<dyn Segmenter>,
    normalizer: InputNormalizer,
}

impl MaskResolver {
    /// Create a resolver that falls back to `segmenter`.
    #[must_use]
    pub fn new(segmenter: Arc<dyn Segmenter>, size: CanonicalSize) -> Self {
        Self {
            segmenter,
            normalizer: InputNormalizer::new(size),
        }
    }

    /// Pick the mask source and return a hard, canonical-size mask.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Input`] if `person` is not canonical size
    /// or the user mask has no pixels. Returns
    /// [`FitroomError::Inference`] if the segmenter fails.
    pub fn acquire(
        &self,
        user_mask: Option<&GrayImage>,
        person: &RgbImage,
        garment: GarmentKind,
    ) -> Result<ResolvedMask, FitroomError> {
        let size = self.normalizer.size();
        size.ensure("person image", person)?;

        if let Some(drawn) = user_mask.filter(|m| has_multiple_values(m)) {
            let mask = self.normalizer.mask(&binarize(drawn))?;
            tracing::debug!(
                width = drawn.width(),
                height = drawn.height(),
                "using user-drawn mask"
            );
            return Ok(ResolvedMask {
                mask,
                source: MaskSource::User,
            });
        }

        tracing::debug!(%garment, "no usable user mask, running auto-segmentation");
        let auto = self
            .segmenter
            .segment(person, garment)
            .map_err(|e| FitroomError::inference(Stage::Segmentation, e))?;
        let mask = if size.matches(&auto) {
            auto
        } else {
            tracing::warn!(
                got_width = auto.width(),
                got_height = auto.height(),
                expected = %size,
                "segmenter returned off-size mask, cropping to canonical size"
            );
            self.normalizer.mask(&auto)?
        };
        Ok(ResolvedMask {
            mask,
            source: MaskSource::Auto,
        })
    }

    /// Acquire the mask and feather it for blending.
    ///
    /// # Errors
    ///
    /// See [`acquire`](Self::acquire).
    #[tracing::instrument(skip_all, fields(%garment, user_mask = user_mask.is_some()))]
    pub fn resolve(
        &self,
        user_mask: Option<&GrayImage>,
        person: &RgbImage,
        garment: GarmentKind,
    ) -> Result<ResolvedMask, FitroomError> {
        let hard = self.acquire(user_mask, person, garment)?;
        Ok(ResolvedMask {
            mask: blur::soften_mask(&hard.mask),
            source: hard.source,
        })
    }
}
