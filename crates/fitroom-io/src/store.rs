//! Filesystem artifact store with date-partitioned paths.
//!
//! Layout:
//!
//! ```text
//! <output_root>/YYYYMMDD/HHMMSS.png     four-panel submission artifact
//! <output_root>/YYYYMMDD/HHMMSS.txt     its captions
//! <generated_dir>/generated_YYYYMMDD_HHMMSS.png
//! ```
//!
//! Directories are created on demand. Both files of a submission are
//! written under temporary names and renamed into place, so a failed
//! persist leaves neither behind. Paths have one-second resolution; a
//! second submission within the same second replaces the first. A
//! generated image never replaces another: a colliding name gets a
//! `_1`, `_2`, ... suffix.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use fitroom_pipeline::{ArtifactSink, PersistError, ResultArtifact, RgbImage, StudioConfig};
use image::ImageEncoder;

/// Source of the timestamps artifacts are filed under.
pub trait Clock: Send + Sync {
    /// The current local time.
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock local time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Writes artifacts below two root directories.
#[derive(Clone)]
pub struct ArtifactStore {
    output_root: PathBuf,
    generated_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactStore")
            .field("output_root", &self.output_root)
            .field("generated_dir", &self.generated_dir)
            .finish_non_exhaustive()
    }
}

impl ArtifactStore {
    /// Create a store using the system clock.
    #[must_use]
    pub fn new(output_root: impl Into<PathBuf>, generated_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_root: output_root.into(),
            generated_dir: generated_dir.into(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Create a store for the directories named in `config`.
    #[must_use]
    pub fn from_config(config: &StudioConfig) -> Self {
        Self::new(&config.output_dir, &config.generation.generated_dir)
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Root of the submission artifacts.
    #[must_use]
    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Directory of generated person images.
    #[must_use]
    pub fn generated_dir(&self) -> &Path {
        &self.generated_dir
    }

    /// Image path of a submission filed at `at`.
    #[must_use]
    pub fn result_path(&self, at: NaiveDateTime) -> PathBuf {
        self.output_root
            .join(at.format("%Y%m%d").to_string())
            .join(format!("{}.png", at.format("%H%M%S")))
    }

    /// Path of a person image generated at `at`.
    #[must_use]
    pub fn generated_path(&self, at: NaiveDateTime) -> PathBuf {
        self.generated_dir
            .join(format!("generated_{}.png", at.format("%Y%m%d_%H%M%S")))
    }
}

impl ArtifactSink for ArtifactStore {
    fn persist_result(&self, artifact: &ResultArtifact<'_>) -> Result<PathBuf, PersistError> {
        let path = self.result_path(self.clock.now());
        let captions = path.with_extension("txt");
        let png = encode_png(artifact.composite)?;
        create_parent(&path)?;
        if path.exists() {
            tracing::warn!(path = %path.display(), "replacing artifact from the same second");
        }

        let image = Staged::write(&path, &png)?;
        let text = Staged::write(&captions, artifact.captions.as_bytes())?;
        text.commit()?;
        if let Err(e) = image.commit() {
            let _ = fs::remove_file(&captions);
            return Err(e);
        }
        tracing::info!(path = %path.display(), "submission artifact written");
        Ok(path)
    }

    fn persist_generated(&self, image: &RgbImage) -> Result<PathBuf, PersistError> {
        let base = self.generated_path(self.clock.now());
        let png = encode_png(image)?;
        create_parent(&base)?;

        let mut suffix = 0_u32;
        loop {
            let path = if suffix == 0 {
                base.clone()
            } else {
                numbered(&base, suffix)
            };
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(source) = file.write_all(&png) {
                        drop(file);
                        let _ = fs::remove_file(&path);
                        return Err(PersistError::Io { path, source });
                    }
                    tracing::info!(path = %path.display(), "generated image written");
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => suffix += 1,
                Err(source) => return Err(PersistError::Io { path, source }),
            }
        }
    }
}

/// `dir/stem.ext` -> `dir/stem_{n}.ext`.
fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path.file_stem().map_or_else(String::new, |s| s.to_string_lossy().into_owned());
    let name = match path.extension() {
        Some(ext) => format!("{stem}_{n}.{}", ext.to_string_lossy()),
        None => format!("{stem}_{n}"),
    };
    path.with_file_name(name)
}

fn create_parent(path: &Path) -> Result<(), PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| PersistError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

fn encode_png(image: &RgbImage) -> Result<Vec<u8>, PersistError> {
    let mut bytes = Vec::new();
    image::codecs::png::PngEncoder::new(&mut bytes).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}

/// A file written under a temporary name next to its target.
///
/// Dropping it without [`commit`](Self::commit) deletes the temporary.
struct Staged {
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl Staged {
    fn write(target: &Path, bytes: &[u8]) -> Result<Self, PersistError> {
        let mut extension = target.extension().unwrap_or_default().to_os_string();
        extension.push(".partial");
        let staged = Self {
            temp: target.with_extension(extension),
            target: target.to_path_buf(),
            committed: false,
        };
        fs::write(&staged.temp, bytes).map_err(|source| PersistError::Io {
            path: staged.temp.clone(),
            source,
        })?;
        Ok(staged)
    }

    fn commit(mut self) -> Result<(), PersistError> {
        fs::rename(&self.temp, &self.target).map_err(|source| PersistError::Io {
            path: self.target.clone(),
            source,
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for Staged {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp);
        }
    }
}
