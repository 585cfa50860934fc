//! Try-on synthesis.
//!
//! Validates the numeric parameters, derives the generator from the
//! seed, and hands canonical-size inputs to the [`TryOnEngine`].

use std::ops::RangeInclusive;
use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::engine::{EngineError, TryOnEngine, TryOnRequest};
use crate::types::{CanonicalSize, FitroomError, GrayImage, RgbImage, Stage};

/// Accepted inference-step counts.
pub const STEPS_RANGE: RangeInclusive<u32> = 10..=100;

/// Accepted classifier-free guidance scales.
pub const GUIDANCE_RANGE: RangeInclusive<f32> = 0.0..=7.5;

/// Seed value that requests a non-deterministic run.
pub const NON_DETERMINISTIC_SEED: i64 = -1;

/// Validated try-on parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TryOnParams {
    steps: u32,
    guidance: f32,
    seed: i64,
}

impl TryOnParams {
    /// Validate and bundle the parameters.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Input`] if `steps` is outside
    /// [`STEPS_RANGE`], `guidance` is outside [`GUIDANCE_RANGE`] (or NaN),
    /// or `seed` is below [`NON_DETERMINISTIC_SEED`].
    pub fn try_new(steps: u32, guidance: f32, seed: i64) -> Result<Self, FitroomError> {
        if !STEPS_RANGE.contains(&steps) {
            return Err(FitroomError::Input(format!(
                "inference steps must be in {}..={}, got {steps}",
                STEPS_RANGE.start(),
                STEPS_RANGE.end()
            )));
        }
        if !GUIDANCE_RANGE.contains(&guidance) {
            return Err(FitroomError::Input(format!(
                "guidance scale must be in {}..={}, got {guidance}",
                GUIDANCE_RANGE.start(),
                GUIDANCE_RANGE.end()
            )));
        }
        if seed < NON_DETERMINISTIC_SEED {
            return Err(FitroomError::Input(format!(
                "seed must be {NON_DETERMINISTIC_SEED} or non-negative, got {seed}"
            )));
        }
        Ok(Self {
            steps,
            guidance,
            seed,
        })
    }

    /// Number of inference steps.
    #[must_use]
    pub const fn steps(&self) -> u32 {
        self.steps
    }

    /// Guidance scale.
    #[must_use]
    pub const fn guidance(&self) -> f32 {
        self.guidance
    }

    /// Seed, or [`NON_DETERMINISTIC_SEED`].
    #[must_use]
    pub const fn seed(&self) -> i64 {
        self.seed
    }
}

/// Build the generator for `seed`, seeded exactly once.
///
/// Returns `None` for [`NON_DETERMINISTIC_SEED`].
#[must_use]
pub fn generator_for(seed: i64) -> Option<StdRng> {
    (seed != NON_DETERMINISTIC_SEED).then(|| StdRng::seed_from_u64(seed.cast_unsigned()))
}

/// Runs the try-on engine on normalized inputs.
pub struct TryOnSynthesizer {
    engine: Arc<dyn TryOnEngine>,
    size: CanonicalSize,
}

impl TryOnSynthesizer {
    /// Create a synthesizer for canvases of `size`.
    #[must_use]
    pub fn new(engine: Arc<dyn TryOnEngine>, size: CanonicalSize) -> Self {
        Self { engine, size }
    }

    /// Synthesize the try-on result.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Input`] if any input is not canonical size.
    /// Returns [`FitroomError::Inference`] if the engine fails, returns no
    /// image, or returns an image of the wrong size.
    #[tracing::instrument(
        skip_all,
        fields(steps = params.steps, guidance = params.guidance, seed = params.seed)
    )]
    pub fn synthesize(
        &self,
        person: &RgbImage,
        garment: &RgbImage,
        mask: &GrayImage,
        params: &TryOnParams,
    ) -> Result<RgbImage, FitroomError> {
        self.size.ensure("person image", person)?;
        self.size.ensure("garment image", garment)?;
        self.size.ensure("mask", mask)?;

        let request = TryOnRequest {
            person,
            garment,
            mask,
            steps: params.steps,
            guidance: params.guidance,
        };
        let mut generator = generator_for(params.seed);
        let images = self
            .engine
            .run(&request, generator.as_mut())
            .map_err(|e| FitroomError::inference(Stage::TryOn, e))?;

        let count = images.len();
        let Some(result) = images.into_iter().next() else {
            return Err(FitroomError::inference(
                Stage::TryOn,
                EngineError::Failed("engine returned no images".into()),
            ));
        };
        if !self.size.matches(&result) {
            let (w, h) = result.dimensions();
            return Err(FitroomError::inference(
                Stage::TryOn,
                EngineError::Failed(format!(
                    "engine returned a {w}x{h} image, expected {}",
                    self.size
                )),
            ));
        }
        if count > 1 {
            tracing::debug!(count, "engine returned extra images, keeping the first");
        }
        Ok(result)
    }
}
