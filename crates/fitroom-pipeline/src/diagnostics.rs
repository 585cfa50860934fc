//! Per-stage wall-clock timings.
//!
//! Every submission and every person generation records how long each
//! stage took. Durations serialize as fractional seconds (`f64`), since
//! `std::time::Duration` does not implement serde traits.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::budget::BudgetSnapshot;

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Run `f` and return its output with the elapsed time.
pub fn timed<T>(f: impl FnOnce() -> T) -> (T, Duration) {
    let start = Instant::now();
    let out = f();
    (out, start.elapsed())
}

/// Timings of one try-on submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionTimings {
    /// Decoding and normalizing both inputs.
    #[serde(with = "duration_serde")]
    pub prepare: Duration,
    /// Mask resolution, including any auto-segmentation.
    #[serde(with = "duration_serde")]
    pub mask: Duration,
    /// Try-on inference.
    #[serde(with = "duration_serde")]
    pub try_on: Duration,
    /// Overlay, optional repaint and both composites.
    #[serde(with = "duration_serde")]
    pub compose: Duration,
    /// Garment description and campaign captions.
    #[serde(with = "duration_serde")]
    pub captions: Duration,
    /// Writing the artifact.
    #[serde(with = "duration_serde")]
    pub persist: Duration,
    /// The whole submission.
    #[serde(with = "duration_serde")]
    pub total: Duration,
}

/// Timings and device usage of one person generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTimings {
    /// Encoder load, prompt encoding and encoder release.
    #[serde(with = "duration_serde")]
    pub encode: Duration,
    /// Denoiser load, denoising and denoiser release.
    #[serde(with = "duration_serde")]
    pub denoise: Duration,
    /// Writing the generated image.
    #[serde(with = "duration_serde")]
    pub persist: Duration,
    /// Denoising steps actually completed.
    pub steps_completed: u32,
    /// Device budget after the run.
    pub budget: BudgetSnapshot,
}
