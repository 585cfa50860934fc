//! fitroom-pipeline: virtual try-on and campaign generation core (sans-IO).
//!
//! Two flows share one accelerator:
//!
//! - **Try-on** ([`Studio::submit`]): decode -> normalize -> resolve mask
//!   -> synthesize -> compose -> caption -> persist.
//! - **Person generation** ([`StagedOrchestrator`]): compose prompt ->
//!   ENCODE -> release encoder -> DENOISE -> release denoiser -> persist.
//!
//! Inference engines, the vision-language service and artifact storage
//! are injected through the traits in [`engine`], [`caption`] and
//! [`sink`]. This crate has **no I/O dependencies**; the filesystem
//! store lives in `fitroom-io`.

pub mod blur;
pub mod budget;
pub mod caption;
pub mod compositor;
pub mod config;
pub mod decode;
pub mod diagnostics;
pub mod engine;
pub mod mask;
pub mod normalize;
pub mod orchestrator;
pub mod sink;
pub mod studio;
pub mod tryon;
pub mod types;

pub use budget::{BudgetSnapshot, DeviceAllocator, DeviceBudget, HostAllocator, ModelHandle, Released};
pub use caption::{CaptionError, CaptionInput, CaptionService, VisionLanguage};
pub use compositor::Panels;
pub use config::{GenerationSettings, StudioConfig, SubmissionDefaults};
pub use diagnostics::{GenerationTimings, SubmissionTimings};
pub use engine::{
    DenoiseParams, Denoiser, EngineError, ImageGenEngine, LoadOptions, ModelGroup, Placement,
    PromptEncoder, Segmenter, StageEmbeddings, StepControl, TryOnEngine, TryOnLoadOptions,
    TryOnModels, TryOnRequest,
};
pub use mask::{MaskResolver, MaskSource, ResolvedMask};
pub use normalize::InputNormalizer;
pub use orchestrator::{
    CancelFlag, Composed, Denoised, Encoded, GeneratedPerson, PersonImageRef, StagedOrchestrator,
    compose_prompt,
};
pub use sink::{ArtifactSink, PersistError, ResultArtifact};
pub use studio::{Studio, Submission, SubmissionOutcome};
pub use tryon::{TryOnParams, TryOnSynthesizer};
pub use types::{
    CanonicalSize, DisplayMode, ErrorKind, FitroomError, GarmentKind, GrayImage, Precision,
    RgbImage, Stage,
};
