//! Engine configuration.
//!
//! One immutable struct threaded through construction; there is no ambient
//! global state. Defaults match the shipping renderer's tuning.

use serde::{Deserialize, Serialize};

/// Feature flags and limits for the shading engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Concurrent texture decode slots (further requests queue FIFO).
    pub decode_slots: usize,
    /// Texture-apply callbacks run per rendering tick.
    pub applies_per_tick: usize,
    /// NodeGraph unwrap hop budget when walking a shading network.
    pub network_hop_budget: usize,
    /// Node budget for the last-resort shader search under a material.
    pub shader_search_budget: usize,
    /// Decode on a background worker thread when possible.
    pub background_decode: bool,
    /// Emit diagnostic lines for recoverable failures.
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decode_slots: 4,
            applies_per_tick: 6,
            network_hop_budget: 8,
            shader_search_budget: 256,
            background_decode: true,
            verbose: false,
        }
    }
}

impl EngineConfig {
    /// Config used by tests: single-threaded, quiet.
    pub fn deterministic() -> Self {
        Self {
            background_decode: false,
            verbose: false,
            ..Self::default()
        }
    }

    /// Parse from JSON; absent fields keep their defaults.
    pub fn from_json_str(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "decode_slots": 2 }"#).unwrap();
        assert_eq!(config.decode_slots, 2);
        assert_eq!(config.applies_per_tick, 6);
        assert!(config.background_decode);
    }
}
