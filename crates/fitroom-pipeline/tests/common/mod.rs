//! In-memory fakes for the engine, captioning, allocator and sink seams.

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use fitroom_pipeline::{
    ArtifactSink, CancelFlag, CaptionError, CaptionInput, DenoiseParams, Denoiser,
    DeviceAllocator, EngineError, GarmentKind, GrayImage, ImageGenEngine, LoadOptions, ModelGroup,
    PersistError, Placement, PromptEncoder, ResultArtifact, RgbImage, Segmenter, StageEmbeddings,
    StepControl, TryOnEngine, TryOnRequest, VisionLanguage,
};
use image::{Luma, Rgb};
use rand::Rng;
use rand::rngs::StdRng;

/// Encode an RGB image as PNG bytes.
pub fn png(img: &RgbImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::Rgb8,
    )
    .unwrap();
    buf
}

/// Encode a grayscale image as PNG bytes.
pub fn gray_png(img: &GrayImage) -> Vec<u8> {
    let mut buf = Vec::new();
    let encoder = image::codecs::png::PngEncoder::new(&mut buf);
    image::ImageEncoder::write_image(
        encoder,
        img.as_raw(),
        img.width(),
        img.height(),
        image::ExtendedColorType::L8,
    )
    .unwrap();
    buf
}

/// A solid-color RGB image.
pub fn solid(w: u32, h: u32, rgb: [u8; 3]) -> RgbImage {
    RgbImage::from_pixel(w, h, Rgb(rgb))
}

/// Ordered log of what the fakes did.
#[derive(Debug, Default)]
pub struct Events(Mutex<Vec<String>>);

impl Events {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.snapshot().iter().position(|e| e == event)
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.snapshot().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

// ───────────────────────── try-on side ─────────────────────────

/// Marks the lower half of the person as garment region.
#[derive(Default)]
pub struct LowerHalfSegmenter {
    pub calls: AtomicUsize,
}

impl Segmenter for LowerHalfSegmenter {
    fn segment(&self, person: &RgbImage, _: GarmentKind) -> Result<GrayImage, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (w, h) = person.dimensions();
        Ok(GrayImage::from_fn(w, h, |_, y| {
            if y >= h / 2 { Luma([255]) } else { Luma([0]) }
        }))
    }
}

/// Fills the result with a color drawn from the generator (or grey
/// without one) and records the sizes it was handed.
#[derive(Default)]
pub struct PaintingTryOn {
    pub calls: AtomicUsize,
    pub seen_sizes: Mutex<Vec<(u32, u32)>>,
    pub fail: bool,
}

impl TryOnEngine for PaintingTryOn {
    fn run(
        &self,
        request: &TryOnRequest<'_>,
        generator: Option<&mut StdRng>,
    ) -> Result<Vec<RgbImage>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut sizes = self.seen_sizes.lock().unwrap();
        sizes.push(request.person.dimensions());
        sizes.push(request.garment.dimensions());
        sizes.push(request.mask.dimensions());
        if self.fail {
            return Err(EngineError::Failed("scheduler diverged".into()));
        }
        let color = generator.map_or([128, 128, 128], |rng| rng.random::<[u8; 3]>());
        let (w, h) = request.person.dimensions();
        Ok(vec![RgbImage::from_pixel(w, h, Rgb(color))])
    }
}

/// Answers every request with the next scripted reply, repeating the
/// last one.
pub struct ScriptedCaptions {
    replies: Mutex<Vec<Result<String, CaptionError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedCaptions {
    pub fn new(replies: Vec<Result<String, CaptionError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn ok(text: &str) -> Arc<Self> {
        Self::new(vec![Ok(text.to_owned())])
    }
}

impl VisionLanguage for ScriptedCaptions {
    fn complete(&self, _: &str, _: CaptionInput<'_>) -> Result<String, CaptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.remove(0)
        } else {
            replies[0].clone()
        }
    }
}

/// Keeps everything it is asked to persist.
#[derive(Default)]
pub struct MemorySink {
    pub results: Mutex<Vec<(RgbImage, String)>>,
    pub generated: Mutex<Vec<RgbImage>>,
    pub fail: bool,
}

impl MemorySink {
    fn check(&self, path: &str) -> Result<(), PersistError> {
        if self.fail {
            return Err(PersistError::Io {
                path: PathBuf::from(path),
                source: std::io::Error::other("disk full"),
            });
        }
        Ok(())
    }
}

impl ArtifactSink for MemorySink {
    fn persist_result(&self, artifact: &ResultArtifact<'_>) -> Result<PathBuf, PersistError> {
        self.check("out")?;
        let mut results = self.results.lock().unwrap();
        results.push((artifact.composite.clone(), artifact.captions.to_owned()));
        Ok(PathBuf::from(format!("out/{}.png", results.len())))
    }

    fn persist_generated(&self, image: &RgbImage) -> Result<PathBuf, PersistError> {
        self.check("generated")?;
        let mut generated = self.generated.lock().unwrap();
        generated.push(image.clone());
        Ok(PathBuf::from(format!(
            "generated/generated_{}.png",
            generated.len()
        )))
    }
}

// ───────────────────────── generation side ─────────────────────────

/// Allocator that logs every reclamation.
pub struct LoggingAllocator {
    pub events: Arc<Events>,
}

impl DeviceAllocator for LoggingAllocator {
    fn collect(&self) {
        self.events.push("collect");
    }

    fn reset_cache(&self) {
        self.events.push("reset");
    }
}

/// Tracks how many fake models are alive at once.
#[derive(Debug, Default)]
pub struct Liveness {
    live: AtomicUsize,
    pub max_live: AtomicUsize,
}

impl Liveness {
    fn enter(&self) {
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }
}

struct Alive {
    name: &'static str,
    events: Arc<Events>,
    liveness: Arc<Liveness>,
}

impl Alive {
    fn new(name: &'static str, events: &Arc<Events>, liveness: &Arc<Liveness>) -> Self {
        liveness.enter();
        events.push(format!("load {name}"));
        Self {
            name,
            events: Arc::clone(events),
            liveness: Arc::clone(liveness),
        }
    }
}

impl Drop for Alive {
    fn drop(&mut self) {
        self.liveness.leave();
        self.events.push(format!("drop {}", self.name));
    }
}

/// Two-group image generator whose models log their lifecycle.
pub struct FakeImageGen {
    pub events: Arc<Events>,
    pub liveness: Arc<Liveness>,
    pub encoder_bytes: u64,
    pub denoiser_bytes: u64,
    pub fail_encode: AtomicBool,
    pub fail_denoise: AtomicBool,
    /// Cancel this flag once the given step completes.
    pub cancel_at: Mutex<Option<(u32, CancelFlag)>>,
    pub options: Mutex<Vec<LoadOptions>>,
}

impl FakeImageGen {
    pub fn new(events: Arc<Events>) -> Self {
        Self {
            events,
            liveness: Arc::new(Liveness::default()),
            encoder_bytes: 60,
            denoiser_bytes: 90,
            fail_encode: AtomicBool::new(false),
            fail_denoise: AtomicBool::new(false),
            cancel_at: Mutex::new(None),
            options: Mutex::new(Vec::new()),
        }
    }
}

struct FakeEncoder {
    _alive: Alive,
    fail: bool,
    events: Arc<Events>,
}

impl PromptEncoder for FakeEncoder {
    fn encode(
        &mut self,
        prompt: &str,
        max_sequence_length: usize,
    ) -> Result<StageEmbeddings, EngineError> {
        self.events.push(format!("encode: {prompt}"));
        if self.fail {
            return Err(EngineError::Failed("tokenizer missing".into()));
        }
        let token_ids: Vec<u32> = prompt
            .bytes()
            .take(max_sequence_length)
            .map(u32::from)
            .collect();
        Ok(StageEmbeddings {
            prompt: token_ids.iter().map(|&t| t as f32 / 255.0).collect(),
            pooled: vec![token_ids.len() as f32],
            token_ids,
        })
    }
}

struct FakeDenoiser {
    _alive: Alive,
    fail: bool,
    cancel_at: Option<(u32, CancelFlag)>,
    events: Arc<Events>,
}

impl Denoiser for FakeDenoiser {
    fn denoise(
        &mut self,
        embeddings: &StageEmbeddings,
        params: &DenoiseParams,
        on_step: &mut dyn FnMut(u32) -> StepControl,
    ) -> Result<RgbImage, EngineError> {
        for step in 1..=params.steps {
            if self.fail && step == params.steps {
                return Err(EngineError::Failed("nan in latents".into()));
            }
            self.events.push(format!("step {step}"));
            if let Some((at, flag)) = &self.cancel_at {
                if *at == step {
                    flag.cancel();
                }
            }
            if on_step(step) == StepControl::Stop {
                return Err(EngineError::Interrupted { step });
            }
        }
        let shade = (embeddings.token_ids.len() % 256) as u8;
        Ok(RgbImage::from_pixel(
            params.width,
            params.height,
            Rgb([shade, shade, shade]),
        ))
    }
}

impl ImageGenEngine for FakeImageGen {
    fn footprint(&self, group: ModelGroup) -> u64 {
        match group {
            ModelGroup::TextEncoder => self.encoder_bytes,
            ModelGroup::Denoiser => self.denoiser_bytes,
        }
    }

    fn load_encoder(&self, options: LoadOptions) -> Result<Box<dyn PromptEncoder>, EngineError> {
        assert_eq!(options.placement, Placement::Resident);
        self.options.lock().unwrap().push(options);
        Ok(Box::new(FakeEncoder {
            _alive: Alive::new("encoder", &self.events, &self.liveness),
            fail: self.fail_encode.load(Ordering::SeqCst),
            events: Arc::clone(&self.events),
        }))
    }

    fn load_denoiser(&self, options: LoadOptions) -> Result<Box<dyn Denoiser>, EngineError> {
        assert_eq!(options.placement, Placement::OnDemand);
        self.options.lock().unwrap().push(options);
        Ok(Box::new(FakeDenoiser {
            _alive: Alive::new("denoiser", &self.events, &self.liveness),
            fail: self.fail_denoise.load(Ordering::SeqCst),
            cancel_at: self.cancel_at.lock().unwrap().clone(),
            events: Arc::clone(&self.events),
        }))
    }
}
