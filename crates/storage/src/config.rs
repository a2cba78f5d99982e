//! Storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the store files
    pub data_dir: PathBuf,

    /// Units that may wait in the executor queue before submitters block
    pub queue_capacity: usize,

    /// Days of raw observations kept
    pub observation_retention_days: u32,

    /// Days of mixed records kept
    pub mixer_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            queue_capacity: 1024,
            observation_retention_days: 30,
            mixer_retention_days: 365,
        }
    }
}
