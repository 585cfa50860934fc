//! Shared types for the fitroom try-on pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::caption::CaptionError;
use crate::engine::EngineError;
use crate::sink::PersistError;

/// Re-export `RgbImage` so downstream crates can pass canvases around
/// without depending on `image` directly.
pub use image::RgbImage;

/// Re-export `GrayImage` for masks.
pub use image::GrayImage;

/// Fixed `(width, height)` every pipeline-facing image is normalized to
/// for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CanonicalSize {
    /// Create a canonical size, rejecting zero-area canvases.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Input`] if either axis is zero.
    pub fn try_new(width: u32, height: u32) -> Result<Self, FitroomError> {
        if width == 0 || height == 0 {
            return Err(FitroomError::Input(format!(
                "canonical size must be non-zero, got {width}x{height}"
            )));
        }
        Ok(Self { width, height })
    }

    /// Whether `image` has exactly this size.
    #[must_use]
    pub fn matches<I: image::GenericImageView>(self, image: &I) -> bool {
        image.dimensions() == (self.width, self.height)
    }

    /// Fail with [`FitroomError::Input`] unless `image` has exactly this size.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Input`] naming `what` on mismatch.
    pub fn ensure<I: image::GenericImageView>(self, what: &str, image: &I) -> Result<(), FitroomError> {
        if self.matches(image) {
            return Ok(());
        }
        let (w, h) = image.dimensions();
        let expected = self;
        Err(FitroomError::Input(format!(
            "{what} is {w}x{h}, expected {expected}"
        )))
    }
}

impl fmt::Display for CanonicalSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Garment region classification.
///
/// Steers the garment description prompt and the auto-segmentation
/// fallback when no usable user mask is drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GarmentKind {
    /// Tops, shirts, jackets.
    #[default]
    Upper,
    /// Trousers, skirts, shorts.
    Lower,
    /// Dresses, jumpsuits, full outfits.
    Overall,
}

impl GarmentKind {
    /// The lowercase identifier used by the UI and by segmenters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upper => "upper",
            Self::Lower => "lower",
            Self::Overall => "overall",
        }
    }
}

impl fmt::Display for GarmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GarmentKind {
    type Err = FitroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upper" => Ok(Self::Upper),
            "lower" => Ok(Self::Lower),
            "overall" => Ok(Self::Overall),
            other => Err(FitroomError::Input(format!("unknown garment type '{other}'"))),
        }
    }
}

/// How the submission result is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayMode {
    /// Only the try-on result.
    #[serde(rename = "result only")]
    ResultOnly,
    /// Person and garment stacked beside the result.
    #[serde(rename = "input & result")]
    InputResult,
    /// Person, masked person and garment stacked beside the result.
    #[default]
    #[serde(rename = "input & mask & result")]
    InputMaskResult,
}

impl DisplayMode {
    /// The label shown in the UI.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::ResultOnly => "result only",
            Self::InputResult => "input & result",
            Self::InputMaskResult => "input & mask & result",
        }
    }
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for DisplayMode {
    type Err = FitroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "result only" => Ok(Self::ResultOnly),
            "input & result" => Ok(Self::InputResult),
            "input & mask & result" => Ok(Self::InputMaskResult),
            other => Err(FitroomError::Input(format!("unknown display mode '{other}'"))),
        }
    }
}

/// Numeric precision used when loading model weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// Full precision (fp32).
    No,
    /// Half precision.
    Fp16,
    /// Brain float 16.
    #[default]
    Bf16,
}

impl Precision {
    /// Whether weights are stored below fp32.
    #[must_use]
    pub const fn is_reduced(self) -> bool {
        !matches!(self, Self::No)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::No => "no",
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
        })
    }
}

impl FromStr for Precision {
    type Err = FitroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "no" => Ok(Self::No),
            "fp16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            other => Err(FitroomError::InvalidConfig(format!(
                "precision must be one of no, fp16, bf16; got '{other}'"
            ))),
        }
    }
}

/// A stage that talks to an inference engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    /// Auto-segmentation fallback for the mask.
    Segmentation,
    /// Try-on synthesis.
    TryOn,
    /// Prompt encoding (generation phase one).
    Encode,
    /// Denoising (generation phase two).
    Denoise,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Segmentation => "segmentation",
            Self::TryOn => "try-on",
            Self::Encode => "encode",
            Self::Denoise => "denoise",
        })
    }
}

/// Coarse classification of a [`FitroomError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreadable image or out-of-range parameter.
    Input,
    /// A model could not be placed on the device.
    Resource,
    /// An inference engine failed.
    Inference,
    /// The vision-language collaborator failed.
    Collaborator,
    /// Writing an artifact failed.
    Persist,
    /// Configuration rejected.
    Config,
    /// The caller cancelled at a safe point.
    Cancelled,
}

/// Errors surfaced by the try-on pipeline and the staged orchestrator.
///
/// Caption-only call sites degrade to text instead of returning
/// [`FitroomError::Caption`] (see [`crate::caption`]).
#[derive(Debug, thiserror::Error)]
pub enum FitroomError {
    /// Failed to decode an input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// Malformed input or out-of-range numeric parameter.
    #[error("invalid input: {0}")]
    Input(String),

    /// Model acquisition failed; no prior handle is left half-released.
    #[error("device resource unavailable: {0}")]
    Resource(String),

    /// An inference engine failed during `stage`.
    #[error("{stage} inference failed: {source}")]
    Inference {
        /// The stage whose engine failed.
        stage: Stage,
        /// The engine's error.
        #[source]
        source: EngineError,
    },

    /// A garment description needed as prompt input could not be produced.
    #[error("garment description failed: {0}")]
    Caption(#[from] CaptionError),

    /// Writing an artifact failed.
    #[error("failed to persist artifact: {0}")]
    Persist(#[from] PersistError),

    /// Configuration is invalid.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cancellation observed at a safe point of the named stage.
    #[error("cancelled at {0} stage boundary")]
    Cancelled(Stage),
}

impl FitroomError {
    /// Wrap an engine error raised during `stage`.
    #[must_use]
    pub const fn inference(stage: Stage, source: EngineError) -> Self {
        Self::Inference { stage, source }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ImageDecode(_) | Self::EmptyInput | Self::Input(_) => ErrorKind::Input,
            Self::Resource(_) => ErrorKind::Resource,
            Self::Inference { .. } => ErrorKind::Inference,
            Self::Caption(_) => ErrorKind::Collaborator,
            Self::Persist(_) => ErrorKind::Persist,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn canonical_size_rejects_zero() {
        assert!(matches!(
            CanonicalSize::try_new(0, 10),
            Err(FitroomError::Input(_))
        ));
        assert!(matches!(
            CanonicalSize::try_new(10, 0),
            Err(FitroomError::Input(_))
        ));
        assert_eq!(
            CanonicalSize::try_new(768, 1024).unwrap(),
            CanonicalSize {
                width: 768,
                height: 1024
            }
        );
    }

    #[test]
    fn canonical_size_ensure_reports_mismatch() {
        let size = CanonicalSize::try_new(4, 6).unwrap();
        let ok = RgbImage::new(4, 6);
        let bad = GrayImage::new(6, 4);
        assert!(size.ensure("person", &ok).is_ok());
        let err = size.ensure("mask", &bad).unwrap_err();
        assert_eq!(err.to_string(), "invalid input: mask is 6x4, expected 4x6");
    }

    #[test]
    fn garment_kind_parses_ui_strings() {
        assert_eq!("upper".parse::<GarmentKind>().unwrap(), GarmentKind::Upper);
        assert_eq!("lower".parse::<GarmentKind>().unwrap(), GarmentKind::Lower);
        assert_eq!(
            "overall".parse::<GarmentKind>().unwrap(),
            GarmentKind::Overall
        );
        assert!(matches!(
            "shoes".parse::<GarmentKind>(),
            Err(FitroomError::Input(_))
        ));
    }

    #[test]
    fn display_mode_parses_ui_labels() {
        for mode in [
            DisplayMode::ResultOnly,
            DisplayMode::InputResult,
            DisplayMode::InputMaskResult,
        ] {
            assert_eq!(mode.label().parse::<DisplayMode>().unwrap(), mode);
        }
        assert!("side by side".parse::<DisplayMode>().is_err());
    }

    #[test]
    fn display_mode_serializes_as_label() {
        let json = serde_json::to_string(&DisplayMode::InputResult).unwrap();
        assert_eq!(json, "\"input & result\"");
    }

    #[test]
    fn precision_parses_and_rejects() {
        assert_eq!("no".parse::<Precision>().unwrap(), Precision::No);
        assert_eq!("fp16".parse::<Precision>().unwrap(), Precision::Fp16);
        assert_eq!("bf16".parse::<Precision>().unwrap(), Precision::Bf16);
        assert!(matches!(
            "int8".parse::<Precision>(),
            Err(FitroomError::InvalidConfig(_))
        ));
        assert!(!Precision::No.is_reduced());
        assert!(Precision::Fp16.is_reduced());
    }

    #[test]
    fn error_kinds() {
        assert_eq!(FitroomError::EmptyInput.kind(), ErrorKind::Input);
        assert_eq!(
            FitroomError::Resource("full".into()).kind(),
            ErrorKind::Resource
        );
        assert_eq!(
            FitroomError::inference(Stage::Denoise, EngineError::Failed("nan".into())).kind(),
            ErrorKind::Inference
        );
        assert_eq!(
            FitroomError::from(CaptionError::EmptyResponse).kind(),
            ErrorKind::Collaborator
        );
        assert_eq!(
            FitroomError::Cancelled(Stage::Encode).kind(),
            ErrorKind::Cancelled
        );
    }

    #[test]
    fn inference_error_display_names_stage() {
        let err = FitroomError::inference(Stage::TryOn, EngineError::Failed("boom".into()));
        assert_eq!(err.to_string(), "try-on inference failed: boom");
    }
}
