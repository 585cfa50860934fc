//! Artifact persistence seam.
//!
//! The pipeline never touches the filesystem. Finished artifacts are
//! handed to an [`ArtifactSink`]; `fitroom-io` provides the filesystem
//! implementation with date-partitioned paths.

use std::path::PathBuf;

use crate::types::RgbImage;

/// Errors raised while persisting an artifact.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Creating a directory or writing a file failed.
    #[error("i/o error at {path}: {source}")]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Encoding the image failed.
    #[error("failed to encode image: {0}")]
    Encode(#[from] image::ImageError),
}

/// A finished try-on submission ready to persist.
#[derive(Debug, Clone, Copy)]
pub struct ResultArtifact<'a> {
    /// The saved composite (person, masked person, garment, result).
    pub composite: &'a RgbImage,
    /// Caption text, possibly a degraded error string.
    pub captions: &'a str,
}

/// Destination for persisted artifacts.
pub trait ArtifactSink: Send + Sync {
    /// Persist a submission result and return the image path.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if writing fails.
    fn persist_result(&self, artifact: &ResultArtifact<'_>) -> Result<PathBuf, PersistError>;

    /// Persist a generated person image and return its path.
    ///
    /// # Errors
    ///
    /// Returns a [`PersistError`] if writing fails.
    fn persist_generated(&self, image: &RgbImage) -> Result<PathBuf, PersistError>;
}
