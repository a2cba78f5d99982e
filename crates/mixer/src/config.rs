//! Mixer configuration

use serde::{Deserialize, Serialize};

/// Mixer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MixerConfig {
    /// Store how many sources contributed to each blended value
    pub use_counters: bool,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self { use_counters: true }
    }
}
