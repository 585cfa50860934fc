//! Two-phase person generation under a device budget.
//!
//! The text encoders and the denoiser do not fit on the device together,
//! so generation runs as a chain of consuming stages, each of which can
//! only be reached from the previous one:
//!
//! ```text
//! Composed --encode()--> Encoded --denoise()--> Denoised --persist()--> GeneratedPerson
//! ```
//!
//! [`Composed::encode`] loads the encoder, computes the embeddings and
//! releases the encoder before it returns. [`Encoded`] can only be built
//! from a [`Released`] receipt, so there is no way to reach
//! [`Encoded::denoise`] while the encoder is still resident.
//!
//! The stages borrow the [`StagedOrchestrator`] and hold its
//! single-flight gate, so at most one generation touches the device at a
//! time. Concurrent callers block in [`StagedOrchestrator::begin`].
//!
//! ```rust,no_run
//! # use fitroom_pipeline::{CancelFlag, FitroomError, StagedOrchestrator};
//! # fn run(orchestrator: &StagedOrchestrator) -> Result<(), FitroomError> {
//! let person = orchestrator
//!     .begin("a tall woman", "a red linen shirt", CancelFlag::new())
//!     .encode()?
//!     .denoise()?
//!     .persist()?;
//! println!("{}", person.person.path().display());
//! # Ok(())
//! # }
//! ```
//!
//! A failed stage drops everything it carried. In particular a DENOISE
//! failure discards the embeddings; the caller restarts from
//! [`StagedOrchestrator::begin`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::budget::{DeviceBudget, Released};
use crate::caption::CaptionService;
use crate::config::{GenerationSettings, StudioConfig};
use crate::diagnostics::{GenerationTimings, timed};
use crate::engine::{
    DenoiseParams, EngineError, ImageGenEngine, LoadOptions, ModelGroup, Placement,
    StageEmbeddings, StepControl,
};
use crate::sink::ArtifactSink;
use crate::types::{FitroomError, GarmentKind, RgbImage, Stage};

/// Build the generation prompt.
#[must_use]
pub fn compose_prompt(description: &str, garment_description: &str) -> String {
    format!(
        "{} wearing {}, full image",
        description.trim(),
        garment_description.trim()
    )
}

/// Cooperative cancellation shared between a caller and a running
/// generation.
///
/// Observed before ENCODE, between ENCODE and DENOISE, and after each
/// completed denoising step.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// A flag that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Opaque reference to a persisted person image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonImageRef(PathBuf);

impl PersonImageRef {
    /// Where the image was written.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Consume the reference and return the path.
    #[must_use]
    pub fn into_path(self) -> PathBuf {
        self.0
    }
}

impl fmt::Display for PersonImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.display(), f)
    }
}

/// Result of a full generation.
#[derive(Debug, Clone)]
pub struct GeneratedPerson {
    /// The persisted image.
    pub person: PersonImageRef,
    /// Stage timings and device usage.
    pub timings: GenerationTimings,
}

/// Serializes person generation over one device budget.
pub struct StagedOrchestrator {
    engine: Arc<dyn ImageGenEngine>,
    budget: Arc<DeviceBudget>,
    sink: Arc<dyn ArtifactSink>,
    settings: GenerationSettings,
    allow_tf32: bool,
    gate: Mutex<()>,
}

impl StagedOrchestrator {
    /// Create an orchestrator.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if `settings` do not
    /// validate.
    pub fn new(
        engine: Arc<dyn ImageGenEngine>,
        budget: Arc<DeviceBudget>,
        sink: Arc<dyn ArtifactSink>,
        settings: GenerationSettings,
    ) -> Result<Self, FitroomError> {
        settings.validate()?;
        Ok(Self {
            engine,
            budget,
            sink,
            settings,
            allow_tf32: true,
            gate: Mutex::new(()),
        })
    }

    /// Create an orchestrator from the `generation` section and the
    /// accelerator flags of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if the generation settings
    /// do not validate.
    pub fn from_config(
        config: &StudioConfig,
        engine: Arc<dyn ImageGenEngine>,
        budget: Arc<DeviceBudget>,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, FitroomError> {
        Ok(Self::new(engine, budget, sink, config.generation.clone())?.with_tf32(config.allow_tf32))
    }

    /// Set whether engines may use TF32 matmuls.
    #[must_use]
    pub const fn with_tf32(mut self, allow: bool) -> Self {
        self.allow_tf32 = allow;
        self
    }

    /// The generation settings.
    #[must_use]
    pub const fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    /// The device budget shared with other users of the device.
    #[must_use]
    pub const fn budget(&self) -> &Arc<DeviceBudget> {
        &self.budget
    }

    /// Wait for the device and compose the prompt.
    ///
    /// Blocks while another generation is in flight.
    pub fn begin(
        &self,
        description: &str,
        garment_description: &str,
        cancel: CancelFlag,
    ) -> Composed<'_> {
        let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
        let prompt = compose_prompt(description, garment_description);
        tracing::info!(%prompt, "person generation started");
        Composed {
            run: Run {
                orchestrator: self,
                cancel,
                _gate: gate,
            },
            prompt,
        }
    }

    /// Run all stages for a text description of the person and the
    /// garment.
    ///
    /// # Errors
    ///
    /// Returns the first stage error; see [`Composed::encode`],
    /// [`Encoded::denoise`] and [`Denoised::persist`].
    #[tracing::instrument(skip_all)]
    pub fn generate_person(
        &self,
        description: &str,
        garment_description: &str,
        cancel: &CancelFlag,
    ) -> Result<GeneratedPerson, FitroomError> {
        self.begin(description, garment_description, cancel.clone())
            .encode()?
            .denoise()?
            .persist()
    }

    /// Describe `garment` with `captions`, then generate a person
    /// wearing it.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Caption`] if the description fails, before
    /// any model is loaded. Otherwise as [`generate_person`](Self::generate_person).
    pub fn generate_for_garment(
        &self,
        captions: &CaptionService,
        description: &str,
        garment: &RgbImage,
        kind: GarmentKind,
        cancel: &CancelFlag,
    ) -> Result<GeneratedPerson, FitroomError> {
        let garment_description = captions.describe_garment(garment, kind)?;
        self.generate_person(description, &garment_description, cancel)
    }

    fn load_options(&self, group: ModelGroup) -> LoadOptions {
        let (precision, placement) = match group {
            ModelGroup::TextEncoder => (self.settings.encoder_precision, Placement::Resident),
            ModelGroup::Denoiser => (self.settings.denoiser_precision, Placement::OnDemand),
        };
        LoadOptions {
            checkpoint: self.settings.checkpoint.clone(),
            quantized_checkpoint: self.settings.quantized_checkpoint.clone(),
            precision,
            allow_tf32: self.allow_tf32,
            placement,
        }
    }
}

struct Run<'a> {
    orchestrator: &'a StagedOrchestrator,
    cancel: CancelFlag,
    _gate: MutexGuard<'a, ()>,
}

impl Run<'_> {
    fn check_cancel(&self, stage: Stage) -> Result<(), FitroomError> {
        if self.cancel.is_cancelled() {
            tracing::info!(%stage, "generation cancelled");
            return Err(FitroomError::Cancelled(stage));
        }
        Ok(())
    }
}

// ───────────────────────── Stage 0: Composed ─────────────────────────

/// Prompt composed, nothing loaded yet.
#[must_use = "generation stages are consumed by advancing, call .encode() to continue"]
pub struct Composed<'a> {
    run: Run<'a>,
    prompt: String,
}

impl<'a> Composed<'a> {
    /// The composed prompt.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Load the encoder, encode the prompt and release the encoder.
    ///
    /// The encoder is released before this returns, on success and on
    /// failure.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Cancelled`] if cancellation was already
    /// requested, [`FitroomError::Resource`] if the encoder cannot be
    /// placed, or [`FitroomError::Inference`] if encoding fails.
    #[tracing::instrument(skip_all, name = "encode")]
    pub fn encode(self) -> Result<Encoded<'a>, FitroomError> {
        self.run.check_cancel(Stage::Encode)?;
        let orchestrator = self.run.orchestrator;
        let engine = &orchestrator.engine;
        let options = orchestrator.load_options(ModelGroup::TextEncoder);
        let max_len = orchestrator.settings.max_sequence_length;

        let (outcome, elapsed) = timed(|| {
            let mut encoder = orchestrator.budget.acquire(
                ModelGroup::TextEncoder,
                engine.footprint(ModelGroup::TextEncoder),
                || engine.load_encoder(options),
            )?;
            let encoded = encoder.model_mut().encode(&self.prompt, max_len);
            let released = encoder.release();
            Ok::<_, FitroomError>((encoded, released))
        });
        let (encoded, released) = outcome?;

        let embeddings = encoded.map_err(|e| FitroomError::inference(Stage::Encode, e))?;
        if embeddings.is_incomplete() {
            return Err(FitroomError::inference(
                Stage::Encode,
                EngineError::Failed("encoder returned incomplete embeddings".into()),
            ));
        }
        tracing::debug!(
            tokens = embeddings.token_ids.len(),
            epoch = released.epoch(),
            "prompt encoded, encoder released"
        );

        Ok(Encoded {
            run: self.run,
            embeddings,
            released,
            encode: elapsed,
        })
    }
}

// ───────────────────────── Stage 1: Encoded ──────────────────────────

/// Embeddings computed; the encoder is off the device.
#[must_use = "generation stages are consumed by advancing, call .denoise() to continue"]
pub struct Encoded<'a> {
    run: Run<'a>,
    embeddings: StageEmbeddings,
    released: Released,
    encode: Duration,
}

impl<'a> Encoded<'a> {
    /// The stage embeddings.
    #[must_use]
    pub const fn embeddings(&self) -> &StageEmbeddings {
        &self.embeddings
    }

    /// Receipt of the encoder release.
    pub const fn encoder_release(&self) -> Released {
        self.released
    }

    /// Load the denoiser, run it and release it.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Cancelled`] if cancellation was requested
    /// before or during denoising, [`FitroomError::Resource`] if the
    /// denoiser cannot be placed, or [`FitroomError::Inference`] if
    /// denoising fails or yields an image of the wrong size. The
    /// embeddings are discarded in every error case.
    #[tracing::instrument(skip_all, name = "denoise")]
    pub fn denoise(self) -> Result<Denoised<'a>, FitroomError> {
        self.run.check_cancel(Stage::Denoise)?;
        let orchestrator = self.run.orchestrator;
        let engine = &orchestrator.engine;
        let settings = &orchestrator.settings;
        let options = orchestrator.load_options(ModelGroup::Denoiser);
        let params = DenoiseParams {
            steps: settings.steps,
            guidance: settings.guidance,
            width: settings.width,
            height: settings.height,
        };
        let cancel = &self.run.cancel;
        let embeddings = self.embeddings;

        let mut completed = 0;
        let (outcome, elapsed) = timed(|| {
            let mut denoiser = orchestrator.budget.acquire(
                ModelGroup::Denoiser,
                engine.footprint(ModelGroup::Denoiser),
                || engine.load_denoiser(options),
            )?;
            let result = denoiser
                .model_mut()
                .denoise(&embeddings, &params, &mut |step: u32| {
                    completed = step;
                    if cancel.is_cancelled() {
                        StepControl::Stop
                    } else {
                        StepControl::Continue
                    }
                });
            let released = denoiser.release();
            Ok::<_, FitroomError>((result, released))
        });
        drop(embeddings);

        let (result, released) = outcome?;
        tracing::debug!(epoch = released.epoch(), steps = completed, "denoiser released");
        let image = match result {
            Ok(image) => image,
            Err(EngineError::Interrupted { step }) if cancel.is_cancelled() => {
                tracing::info!(step, "denoising cancelled");
                return Err(FitroomError::Cancelled(Stage::Denoise));
            }
            Err(e) => return Err(FitroomError::inference(Stage::Denoise, e)),
        };
        if image.dimensions() != (params.width, params.height) {
            let (w, h) = image.dimensions();
            return Err(FitroomError::inference(
                Stage::Denoise,
                EngineError::Failed(format!(
                    "denoiser returned a {w}x{h} image, expected {}x{}",
                    params.width, params.height
                )),
            ));
        }

        Ok(Denoised {
            run: self.run,
            image,
            released,
            steps_completed: completed,
            encode: self.encode,
            denoise: elapsed,
        })
    }
}

// ───────────────────────── Stage 2: Denoised ─────────────────────────

/// Image generated; both model groups are off the device.
#[must_use = "generation stages are consumed by advancing, call .persist() to continue"]
pub struct Denoised<'a> {
    run: Run<'a>,
    image: RgbImage,
    released: Released,
    steps_completed: u32,
    encode: Duration,
    denoise: Duration,
}

impl Denoised<'_> {
    /// The generated image.
    #[must_use]
    pub const fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Receipt of the denoiser release.
    pub const fn denoiser_release(&self) -> Released {
        self.released
    }

    /// Write the image and release the device gate.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::Persist`] if the sink fails.
    pub fn persist(self) -> Result<GeneratedPerson, FitroomError> {
        let orchestrator = self.run.orchestrator;
        let (path, persist) = timed(|| orchestrator.sink.persist_generated(&self.image));
        let path = path?;
        tracing::info!(path = %path.display(), "person image saved");
        Ok(GeneratedPerson {
            person: PersonImageRef(path),
            timings: GenerationTimings {
                encode: self.encode,
                denoise: self.denoise,
                persist,
                steps_completed: self.steps_completed,
                budget: orchestrator.budget.snapshot(),
            },
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn prompt_composition() {
        assert_eq!(
            compose_prompt("a tall woman", "a red linen shirt"),
            "a tall woman wearing a red linen shirt, full image"
        );
        assert_eq!(
            compose_prompt("  a man ", " jeans\n"),
            "a man wearing jeans, full image"
        );
    }

    #[test]
    fn cancel_flag_is_shared() {
        let flag = CancelFlag::new();
        let clone = flag.clone();
        assert!(!flag.is_cancelled());
        clone.cancel();
        assert!(flag.is_cancelled());
    }

    #[test]
    fn person_ref_displays_path() {
        let r = PersonImageRef(PathBuf::from("generated_images/generated_x.png"));
        assert_eq!(r.to_string(), "generated_images/generated_x.png");
        assert_eq!(r.into_path(), PathBuf::from("generated_images/generated_x.png"));
    }
}
