//! Weather Mixer
//!
//! Merges the observations every source reported for a forecast tick into
//! one blended record per timestamp. Each metric is reduced by its kind:
//! extremes keep the lowest or highest value, accumulations are averaged
//! and condition codes go to the most frequent one.

mod config;
mod mixer;
mod reducer;

pub use config::MixerConfig;
pub use mixer::{mix_observations, MixReport, Mixer};
pub use reducer::{reduce, Reducer};

use storage::StorageError;
use thiserror::Error;

/// Mixer errors
#[derive(Debug, Error)]
pub enum MixerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, MixerError>;
