//! Studio configuration.
//!
//! Every field has a default, so a partial JSON document (or `{}`)
//! deserializes into a usable configuration. Call
//! [`StudioConfig::validate`] after loading; deserialization alone does
//! not range-check anything.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::engine::TryOnLoadOptions;
use crate::tryon::{GUIDANCE_RANGE, STEPS_RANGE, TryOnParams};
use crate::types::{CanonicalSize, DisplayMode, FitroomError, Precision};

/// Configuration of the try-on studio and the person generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    /// Base inpainting model identifier.
    pub base_model: String,

    /// Try-on checkpoint identifier.
    pub resume_path: String,

    /// Root directory for submission artifacts.
    pub output_dir: PathBuf,

    /// Canonical canvas width.
    pub width: u32,

    /// Canonical canvas height.
    pub height: u32,

    /// Blend the try-on result back onto the original person.
    pub repaint: bool,

    /// Allow TF32 matmuls on the accelerator.
    pub allow_tf32: bool,

    /// Weight precision for the try-on engine.
    pub mixed_precision: Precision,

    /// Person-generation settings.
    pub generation: GenerationSettings,

    /// Defaults offered for a new submission.
    pub submission: SubmissionDefaults,
}

impl StudioConfig {
    /// Default base inpainting model.
    pub const DEFAULT_BASE_MODEL: &str = "booksforcharlie/stable-diffusion-inpainting";
    /// Default try-on checkpoint.
    pub const DEFAULT_RESUME_PATH: &str = "zhengchong/CatVTON";
    /// Default artifact root.
    pub const DEFAULT_OUTPUT_DIR: &str = "resource/demo/output";
    /// Default canvas width.
    pub const DEFAULT_WIDTH: u32 = 768;
    /// Default canvas height.
    pub const DEFAULT_HEIGHT: u32 = 1024;

    /// The canonical canvas size.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if either axis is zero.
    pub fn canonical_size(&self) -> Result<CanonicalSize, FitroomError> {
        CanonicalSize::try_new(self.width, self.height).map_err(|_| {
            FitroomError::InvalidConfig(format!(
                "canvas size must be non-zero, got {}x{}",
                self.width, self.height
            ))
        })
    }

    /// Load options for the segmentation and try-on models.
    #[must_use]
    pub fn try_on_options(&self) -> TryOnLoadOptions {
        TryOnLoadOptions {
            base_model: self.base_model.clone(),
            checkpoint: self.resume_path.clone(),
            precision: self.mixed_precision,
            allow_tf32: self.allow_tf32,
        }
    }

    /// Check every field for consistency.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), FitroomError> {
        self.canonical_size()?;
        if self.output_dir.as_os_str().is_empty() {
            return Err(FitroomError::InvalidConfig("output_dir must not be empty".into()));
        }
        self.generation.validate()?;
        self.submission.validate()
    }
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            base_model: Self::DEFAULT_BASE_MODEL.to_owned(),
            resume_path: Self::DEFAULT_RESUME_PATH.to_owned(),
            output_dir: PathBuf::from(Self::DEFAULT_OUTPUT_DIR),
            width: Self::DEFAULT_WIDTH,
            height: Self::DEFAULT_HEIGHT,
            repaint: false,
            allow_tf32: true,
            mixed_precision: Precision::default(),
            generation: GenerationSettings::default(),
            submission: SubmissionDefaults::default(),
        }
    }
}

/// Settings of the two-phase person generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    /// Full image-generation checkpoint.
    pub checkpoint: String,

    /// Quantized checkpoint the encoder and denoiser weights come from.
    pub quantized_checkpoint: String,

    /// Directory generated person images are written to.
    pub generated_dir: PathBuf,

    /// Denoising steps.
    pub steps: u32,

    /// Guidance scale.
    pub guidance: f32,

    /// Output width.
    pub width: u32,

    /// Output height.
    pub height: u32,

    /// Maximum prompt length in tokens.
    pub max_sequence_length: usize,

    /// Encoder weight precision.
    pub encoder_precision: Precision,

    /// Denoiser weight precision.
    pub denoiser_precision: Precision,
}

impl GenerationSettings {
    /// Default image-generation checkpoint.
    pub const DEFAULT_CHECKPOINT: &str = "black-forest-labs/FLUX.1-dev";
    /// Default quantized checkpoint.
    pub const DEFAULT_QUANTIZED_CHECKPOINT: &str = "sayakpaul/flux.1-dev-nf4-pkg";
    /// Default output directory for generated people.
    pub const DEFAULT_GENERATED_DIR: &str = "generated_images";
    /// Default denoising steps.
    pub const DEFAULT_STEPS: u32 = 50;
    /// Default guidance scale.
    pub const DEFAULT_GUIDANCE: f32 = 5.5;
    /// Default output edge length.
    pub const DEFAULT_SIZE: u32 = 1024;
    /// Default maximum prompt length.
    pub const DEFAULT_MAX_SEQUENCE_LENGTH: usize = 256;

    /// Check the settings.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] for zero steps, a negative
    /// or non-finite guidance, a zero-area output, a zero sequence
    /// length, or a full-precision encoder.
    pub fn validate(&self) -> Result<(), FitroomError> {
        if self.steps == 0 {
            return Err(FitroomError::InvalidConfig("generation.steps must be positive".into()));
        }
        if !self.guidance.is_finite() || self.guidance < 0.0 {
            return Err(FitroomError::InvalidConfig(format!(
                "generation.guidance must be finite and non-negative, got {}",
                self.guidance
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(FitroomError::InvalidConfig(format!(
                "generation size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.max_sequence_length == 0 {
            return Err(FitroomError::InvalidConfig(
                "generation.max_sequence_length must be positive".into(),
            ));
        }
        if !self.encoder_precision.is_reduced() {
            return Err(FitroomError::InvalidConfig(format!(
                "generation.encoder_precision must be fp16 or bf16, got {}",
                self.encoder_precision
            )));
        }
        Ok(())
    }
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            checkpoint: Self::DEFAULT_CHECKPOINT.to_owned(),
            quantized_checkpoint: Self::DEFAULT_QUANTIZED_CHECKPOINT.to_owned(),
            generated_dir: PathBuf::from(Self::DEFAULT_GENERATED_DIR),
            steps: Self::DEFAULT_STEPS,
            guidance: Self::DEFAULT_GUIDANCE,
            width: Self::DEFAULT_SIZE,
            height: Self::DEFAULT_SIZE,
            max_sequence_length: Self::DEFAULT_MAX_SEQUENCE_LENGTH,
            encoder_precision: Precision::Fp16,
            denoiser_precision: Precision::Bf16,
        }
    }
}

/// Initial values offered for a new submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubmissionDefaults {
    /// Inference steps.
    pub steps: u32,
    /// Guidance scale.
    pub guidance: f32,
    /// Seed; `-1` for non-deterministic.
    pub seed: i64,
    /// Display mode.
    pub display: DisplayMode,
}

impl SubmissionDefaults {
    /// Check the defaults against the try-on parameter ranges.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if any value is out of range.
    pub fn validate(&self) -> Result<(), FitroomError> {
        self.params().map(|_| ()).map_err(|e| {
            FitroomError::InvalidConfig(format!(
                "submission defaults out of range (steps {}..={}, guidance {}..={}): {e}",
                STEPS_RANGE.start(),
                STEPS_RANGE.end(),
                GUIDANCE_RANGE.start(),
                GUIDANCE_RANGE.end()
            ))
        })
    }

    /// The defaults as validated try-on parameters.
    ///
    /// # Errors
    ///
    /// See [`TryOnParams::try_new`].
    pub fn params(&self) -> Result<TryOnParams, FitroomError> {
        TryOnParams::try_new(self.steps, self.guidance, self.seed)
    }
}

impl Default for SubmissionDefaults {
    fn default() -> Self {
        Self {
            steps: 50,
            guidance: 2.5,
            seed: 42,
            display: DisplayMode::default(),
        }
    }
}
