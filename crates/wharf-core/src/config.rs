//! Engine configuration.

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

/// Largest chunk an operation hands a worker in one data exchange; bigger
/// payloads are sliced and the remainder buffered.
pub const MAX_CHUNK_SIZE: usize = 14 * 1024 * 1024;

/// Tuning knobs for the operation engine.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct EngineConfig {
    /// Visits to the same URL before a redirect chain counts as cyclic.
    #[builder(default = "5")]
    #[serde(default = "default_redirect_limit")]
    pub redirect_limit: usize,

    /// Upper bound on one data chunk, in bytes.
    #[builder(default = "MAX_CHUNK_SIZE")]
    #[serde(default = "default_chunk_size")]
    pub max_chunk_size: usize,

    /// Progress channel buffer size.
    #[builder(default = "100")]
    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,

    /// How many idle directory items the listing cache keeps around.
    #[builder(default = "10")]
    #[serde(default = "default_cache_bound")]
    pub lister_cache_bound: usize,

    /// Include hidden entries in listings the listing cache drives.
    #[builder(default = "false")]
    #[serde(default)]
    pub list_hidden: bool,
}

fn default_redirect_limit() -> usize {
    5
}

fn default_chunk_size() -> usize {
    MAX_CHUNK_SIZE
}

fn default_progress_buffer() -> usize {
    100
}

fn default_cache_bound() -> usize {
    10
}

impl EngineConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(size) = self.max_chunk_size {
            if size == 0 {
                return Err("max_chunk_size must be positive".to_string());
            }
        }
        if let Some(buf) = self.progress_buffer {
            if buf == 0 {
                return Err("progress_buffer must be positive".to_string());
            }
        }
        Ok(())
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            redirect_limit: 5,
            max_chunk_size: MAX_CHUNK_SIZE,
            progress_buffer: 100,
            lister_cache_bound: 10,
            list_hidden: false,
        }
    }
}
