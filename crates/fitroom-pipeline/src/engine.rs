//! Inference engine seams.
//!
//! The segmentation, try-on and image-generation engines are opaque
//! black boxes. They are injected as trait objects so hosts plug in real
//! accelerators and tests plug in fakes. No engine is a process-wide
//! singleton; whoever constructs a [`Studio`](crate::Studio) or a
//! [`StagedOrchestrator`](crate::StagedOrchestrator) decides which
//! instance it talks to.

use std::sync::Arc;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::types::{GarmentKind, GrayImage, Precision, RgbImage};

/// Failure reported by an inference engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The device could not hold the requested allocation.
    #[error("out of device memory ({requested_bytes} bytes requested)")]
    OutOfMemory {
        /// Bytes the engine tried to allocate.
        requested_bytes: u64,
    },

    /// The step callback asked the engine to stop.
    #[error("interrupted after step {step}")]
    Interrupted {
        /// Last completed step (1-based).
        step: u32,
    },

    /// Any other engine failure.
    #[error("{0}")]
    Failed(String),
}

/// Produces a garment-region mask for a person image.
pub trait Segmenter: Send + Sync {
    /// Segment `person` for the given garment region.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if segmentation fails.
    fn segment(&self, person: &RgbImage, garment: GarmentKind) -> Result<GrayImage, EngineError>;
}

/// Everything the try-on engine needs for one run.
#[derive(Debug, Clone, Copy)]
pub struct TryOnRequest<'a> {
    /// Normalized person canvas.
    pub person: &'a RgbImage,
    /// Normalized garment canvas.
    pub garment: &'a RgbImage,
    /// Resolved, blurred mask.
    pub mask: &'a GrayImage,
    /// Number of denoising steps.
    pub steps: u32,
    /// Classifier-free guidance scale.
    pub guidance: f32,
}

/// Options for loading the segmentation and try-on models.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TryOnLoadOptions {
    /// Base inpainting model.
    pub base_model: String,
    /// Try-on checkpoint applied on top of the base model.
    pub checkpoint: String,
    /// Weight precision.
    pub precision: Precision,
    /// Whether TF32 matmuls are allowed.
    pub allow_tf32: bool,
}

/// The engines a [`Studio`](crate::Studio) runs submissions on.
pub struct TryOnModels {
    /// Auto-segmentation fallback for the mask.
    pub segmenter: Arc<dyn Segmenter>,
    /// Try-on inference.
    pub engine: Arc<dyn TryOnEngine>,
}

impl std::fmt::Debug for TryOnModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TryOnModels").finish_non_exhaustive()
    }
}

/// Mask-guided try-on inference.
pub trait TryOnEngine: Send + Sync {
    /// Run try-on. `generator` is `Some` only for deterministic runs and
    /// is the sole source of randomness the engine may use in that case.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if inference fails.
    fn run(
        &self,
        request: &TryOnRequest<'_>,
        generator: Option<&mut StdRng>,
    ) -> Result<Vec<RgbImage>, EngineError>;
}

/// Sub-model groups of the image-generation pipeline.
///
/// Each group is resident on the device in its own memory epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelGroup {
    /// Text encoders and tokenizers.
    TextEncoder,
    /// Transformer and VAE, without text components.
    Denoiser,
}

impl std::fmt::Display for ModelGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::TextEncoder => "text-encoder",
            Self::Denoiser => "denoiser",
        })
    }
}

/// How an engine places a sub-model's internal components on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    /// Every component stays resident for the life of the handle.
    Resident,
    /// Components move onto the device only while they execute.
    OnDemand,
}

/// Options passed to an engine when loading a sub-model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOptions {
    /// Full image-generation checkpoint (scheduler, VAE, tokenizers).
    pub checkpoint: String,
    /// Quantized checkpoint holding the group's heavy weights.
    pub quantized_checkpoint: String,
    /// Weight precision.
    pub precision: Precision,
    /// Whether TF32 matmuls are allowed.
    pub allow_tf32: bool,
    /// Component placement strategy.
    pub placement: Placement,
}

/// Intermediate artifacts handed from ENCODE to DENOISE.
///
/// The buffers are owned, so the embeddings carry no reference to the
/// encoder that produced them and stay valid after it is released.
#[derive(Debug, Clone, PartialEq)]
pub struct StageEmbeddings {
    /// Per-token prompt embedding, row-major `[tokens, dim]`.
    pub prompt: Vec<f32>,
    /// Pooled prompt embedding.
    pub pooled: Vec<f32>,
    /// Token ids of the encoded prompt.
    pub token_ids: Vec<u32>,
}

impl StageEmbeddings {
    /// Whether any of the three embeddings is empty.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.prompt.is_empty() || self.pooled.is_empty() || self.token_ids.is_empty()
    }
}

/// Parameters of one denoising run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DenoiseParams {
    /// Number of denoising steps.
    pub steps: u32,
    /// Guidance scale.
    pub guidance: f32,
    /// Output width.
    pub width: u32,
    /// Output height.
    pub height: u32,
}

/// Decision returned from the per-step callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepControl {
    /// Run the next step.
    Continue,
    /// Stop after the step that just completed.
    Stop,
}

/// Encoder sub-model loaded on the device.
pub trait PromptEncoder: Send {
    /// Encode `prompt` into stage embeddings.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if encoding fails.
    fn encode(
        &mut self,
        prompt: &str,
        max_sequence_length: usize,
    ) -> Result<StageEmbeddings, EngineError>;
}

/// Denoiser sub-model loaded on the device.
pub trait Denoiser: Send {
    /// Run the denoising loop. `on_step` is called after every completed
    /// step with its 1-based index; returning [`StepControl::Stop`] makes
    /// the engine return [`EngineError::Interrupted`].
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if denoising fails or is interrupted.
    fn denoise(
        &mut self,
        embeddings: &StageEmbeddings,
        params: &DenoiseParams,
        on_step: &mut dyn FnMut(u32) -> StepControl,
    ) -> Result<RgbImage, EngineError>;
}

/// Text-to-image engine split into separately loadable groups.
pub trait ImageGenEngine: Send + Sync {
    /// Device bytes `group` occupies once loaded.
    fn footprint(&self, group: ModelGroup) -> u64;

    /// Load the text encoders.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if loading fails.
    fn load_encoder(&self, options: LoadOptions) -> Result<Box<dyn PromptEncoder>, EngineError>;

    /// Load the transformer/VAE pipeline without text components.
    ///
    /// # Errors
    ///
    /// Returns an [`EngineError`] if loading fails.
    fn load_denoiser(&self, options: LoadOptions) -> Result<Box<dyn Denoiser>, EngineError>;
}
