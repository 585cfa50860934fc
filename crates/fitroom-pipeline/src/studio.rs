//! The try-on submission flow.
//!
//! One [`Studio::submit`] call runs, in order:
//!
//! 1. decode and normalize the person, garment and optional mask layer
//! 2. resolve the mask (user drawing or auto-segmentation, then blur)
//! 3. synthesize the try-on result
//! 4. optionally repaint the result onto the original person
//! 5. compose the preview and the four-panel artifact
//! 6. generate campaign captions (never fails; degrades to text)
//! 7. persist the artifact and captions
//!
//! Input and mask errors abort before any inference runs. An inference
//! failure aborts before anything is persisted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::caption::CaptionService;
use crate::compositor::{self, Panels};
use crate::config::{StudioConfig, SubmissionDefaults};
use crate::decode;
use crate::diagnostics::{SubmissionTimings, timed};
use crate::engine::{EngineError, Segmenter, TryOnEngine, TryOnLoadOptions, TryOnModels};
use crate::mask::{MaskResolver, MaskSource};
use crate::normalize::InputNormalizer;
use crate::sink::{ArtifactSink, ResultArtifact};
use crate::tryon::{TryOnParams, TryOnSynthesizer};
use crate::types::{CanonicalSize, DisplayMode, FitroomError, GarmentKind, GrayImage, RgbImage};

/// Raw inputs of one submission.
#[derive(Debug, Clone, Copy)]
pub struct Submission<'a> {
    /// Encoded person image.
    pub person: &'a [u8],
    /// Encoded mask layer drawn over the person, if any.
    pub mask_layer: Option<&'a [u8]>,
    /// Encoded garment image.
    pub garment: &'a [u8],
    /// Garment region.
    pub garment_kind: GarmentKind,
    /// Try-on parameters.
    pub params: TryOnParams,
    /// Preview layout.
    pub display: DisplayMode,
    /// Free-text campaign context for the captions.
    pub campaign_context: &'a str,
}

/// Everything a submission produces.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    /// The preview in the requested display mode.
    pub preview: RgbImage,
    /// Campaign captions, or the degraded error text.
    pub captions: String,
    /// Where the four-panel artifact was written.
    pub artifact: PathBuf,
    /// Which mask drove the try-on.
    pub mask_source: MaskSource,
    /// Stage timings.
    pub timings: SubmissionTimings,
}

/// Runs try-on submissions against injected engines.
pub struct Studio {
    normalizer: InputNormalizer,
    masks: MaskResolver,
    synthesizer: TryOnSynthesizer,
    captions: CaptionService,
    sink: Arc<dyn ArtifactSink>,
    repaint: bool,
    defaults: SubmissionDefaults,
}

impl Studio {
    /// Build a studio from `config` and its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if `config` does not
    /// validate.
    pub fn new(
        config: &StudioConfig,
        segmenter: Arc<dyn Segmenter>,
        engine: Arc<dyn TryOnEngine>,
        captions: CaptionService,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, FitroomError> {
        config.validate()?;
        let size = config.canonical_size()?;
        tracing::info!(%size, repaint = config.repaint, "studio ready");
        Ok(Self {
            normalizer: InputNormalizer::new(size),
            masks: MaskResolver::new(segmenter, size),
            synthesizer: TryOnSynthesizer::new(engine, size),
            captions,
            sink,
            repaint: config.repaint,
            defaults: config.submission,
        })
    }

    /// Validate `config`, load the try-on models with the options it
    /// names, and build a studio around them.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::InvalidConfig`] if `config` does not
    /// validate (nothing is loaded then), or [`FitroomError::Resource`]
    /// if `load` fails.
    pub fn from_config<F>(
        config: &StudioConfig,
        load: F,
        captions: CaptionService,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self, FitroomError>
    where
        F: FnOnce(&TryOnLoadOptions) -> Result<TryOnModels, EngineError>,
    {
        config.validate()?;
        let options = config.try_on_options();
        tracing::info!(
            base_model = %options.base_model,
            checkpoint = %options.checkpoint,
            precision = %options.precision,
            allow_tf32 = options.allow_tf32,
            "loading try-on models"
        );
        let models = load(&options).map_err(|e| {
            FitroomError::Resource(format!("loading try-on models failed: {e}"))
        })?;
        Self::new(config, models.segmenter, models.engine, captions, sink)
    }

    /// The canonical canvas size.
    #[must_use]
    pub const fn size(&self) -> CanonicalSize {
        self.normalizer.size()
    }

    /// Initial values for a new submission.
    #[must_use]
    pub const fn defaults(&self) -> &SubmissionDefaults {
        &self.defaults
    }

    /// The caption service, for ad-hoc captions of a finished result.
    #[must_use]
    pub const fn captions(&self) -> &CaptionService {
        &self.captions
    }

    /// Run one submission end to end.
    ///
    /// # Errors
    ///
    /// Returns [`FitroomError::ImageDecode`], [`FitroomError::EmptyInput`]
    /// or [`FitroomError::Input`] for unusable inputs,
    /// [`FitroomError::Inference`] if segmentation or try-on fails, and
    /// [`FitroomError::Persist`] if the artifact cannot be written.
    /// Caption failures never fail a submission.
    #[tracing::instrument(
        skip_all,
        fields(garment = %submission.garment_kind, display = %submission.display)
    )]
    pub fn submit(&self, submission: &Submission<'_>) -> Result<SubmissionOutcome, FitroomError> {
        let start = Instant::now();
        let mut timings = SubmissionTimings::default();

        let (prepared, elapsed) = timed(|| self.prepare(submission));
        timings.prepare = elapsed;
        let (person, garment, user_mask) = prepared?;

        let (resolved, elapsed) = timed(|| {
            self.masks
                .resolve(user_mask.as_ref(), &person, submission.garment_kind)
        });
        timings.mask = elapsed;
        let resolved = resolved?;

        let (result, elapsed) = timed(|| {
            self.synthesizer
                .synthesize(&person, &garment, &resolved.mask, &submission.params)
        });
        timings.try_on = elapsed;
        let result = result?;

        let (composed, elapsed) = timed(|| {
            let result = if self.repaint {
                compositor::repaint(&person, &result, &resolved.mask)?
            } else {
                result
            };
            let masked = compositor::mask_overlay(&person, &resolved.mask)?;
            let panels = Panels {
                person: &person,
                masked: &masked,
                garment: &garment,
                result: &result,
            };
            let preview = compositor::compose(submission.display, &panels)?;
            let artifact = compositor::artifact_grid(&panels)?;
            Ok::<_, FitroomError>((preview, artifact))
        });
        timings.compose = elapsed;
        let (preview, artifact) = composed?;

        let (captions, elapsed) = timed(|| {
            self.captions.captions_for_submission(
                &garment,
                submission.garment_kind,
                submission.campaign_context,
            )
        });
        timings.captions = elapsed;

        let (path, elapsed) = timed(|| {
            self.sink.persist_result(&ResultArtifact {
                composite: &artifact,
                captions: &captions,
            })
        });
        timings.persist = elapsed;
        let artifact_path = path?;

        timings.total = start.elapsed();
        tracing::info!(
            path = %artifact_path.display(),
            mask = ?resolved.source,
            total_secs = timings.total.as_secs_f64(),
            "submission complete"
        );

        Ok(SubmissionOutcome {
            preview,
            captions,
            artifact: artifact_path,
            mask_source: resolved.source,
            timings,
        })
    }

    fn prepare(
        &self,
        submission: &Submission<'_>,
    ) -> Result<(RgbImage, RgbImage, Option<GrayImage>), FitroomError> {
        let person = self.normalizer.person(&decode::decode_rgb(submission.person)?)?;
        let garment = self
            .normalizer
            .garment(&decode::decode_rgb(submission.garment)?)?;
        let mask = submission
            .mask_layer
            .map(decode::decode_mask)
            .transpose()?;
        Ok((person, garment, mask))
    }
}
