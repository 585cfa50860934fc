//! fitroom-io: filesystem persistence and configuration loading.
//!
//! Provides [`ArtifactStore`], the filesystem implementation of
//! [`fitroom_pipeline::ArtifactSink`], and helpers that read a
//! [`fitroom_pipeline::StudioConfig`] from JSON.

pub mod config;
pub mod store;

pub use config::{ConfigError, load_config, load_config_or_default, parse_config};
pub use store::{ArtifactStore, Clock, FixedClock, SystemClock};
