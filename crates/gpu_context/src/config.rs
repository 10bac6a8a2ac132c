use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::error::Result;

/// Context settings. Every field has a default, so an empty TOML document is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub application_name: String,
    /// Enables `VK_LAYER_KHRONOS_validation`.
    pub validation: bool,
    /// Upper bound for host waits on frame fences, in milliseconds.
    pub fence_timeout_ms: u64,
    /// Rebuild the swap chain and retry once when acquisition reports it out of date.
    pub rebuild_on_out_of_date: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            application_name: "gpu_context".to_string(),
            validation: cfg!(debug_assertions),
            fence_timeout_ms: 5_000,
            rebuild_on_out_of_date: false,
        }
    }
}

impl ContextConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;

        Self::from_toml_str(&source)
    }

    #[inline(always)]
    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    /// The fence timeout as Vulkan expects it, saturated to `u64::MAX`.
    pub fn fence_timeout_ns(&self) -> u64 {
        u64::try_from(self.fence_timeout().as_nanos()).unwrap_or(u64::MAX)
    }
}
