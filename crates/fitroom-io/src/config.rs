//! Loading [`StudioConfig`] from JSON files.

use std::fs;
use std::path::{Path, PathBuf};

use fitroom_pipeline::{FitroomError, StudioConfig};

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON for a [`StudioConfig`].
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// The config path.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// The configuration parsed but failed validation.
    #[error(transparent)]
    Invalid(#[from] FitroomError),
}

/// Parse and validate a configuration document.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed JSON (reported against
/// `origin`) and [`ConfigError::Invalid`] if validation fails.
pub fn parse_config(json: &str, origin: &Path) -> Result<StudioConfig, ConfigError> {
    let config: StudioConfig =
        serde_json::from_str(json).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Read, parse and validate the configuration at `path`.
///
/// # Errors
///
/// See [`parse_config`]; additionally [`ConfigError::Io`] if the file
/// cannot be read.
pub fn load_config(path: &Path) -> Result<StudioConfig, ConfigError> {
    let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&json, path)?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

/// Load `path` if given, otherwise use the defaults.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_or_default(path: Option<&Path>) -> Result<StudioConfig, ConfigError> {
    path.map_or_else(|| Ok(StudioConfig::default()), load_config)
}
