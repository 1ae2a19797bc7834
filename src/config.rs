//! Engine-wide configuration.
//!
//! Mirrors the recognized options in spec §6. Nothing here is persisted by
//! the core itself; the host loads/saves it however it likes and hands the
//! crate a plain struct.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// All tunables the core recognizes, with their documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker pool size. Defaults to `hw_concurrency - 1`, floored at 1.
    pub thread_count: usize,
    pub active_radius: f32,
    pub background_radius: f32,
    pub tier_update_interval: u32,
    pub culling_buffer: f32,
    pub cache_eviction_interval: u32,
    pub max_paths_per_frame: u32,
    pub path_cache_ttl_sec: f32,
    pub allow_diagonal: bool,
    pub max_path_iterations: u32,
    pub trigger_cooldown_sec: f32,
    pub min_entities_for_background_threading: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let hw = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            thread_count: hw.saturating_sub(1).max(1),
            active_radius: 1500.0,
            background_radius: 10_000.0,
            tier_update_interval: 60,
            culling_buffer: 2_000.0,
            cache_eviction_interval: 120,
            max_paths_per_frame: 5,
            path_cache_ttl_sec: 5.0,
            allow_diagonal: true,
            max_path_iterations: 20_000,
            trigger_cooldown_sec: 0.0,
            min_entities_for_background_threading: 500,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.thread_count == 0 {
            return Err(ConfigError::ZeroThreads);
        }
        if self.active_radius > self.background_radius {
            return Err(ConfigError::RadiusOrdering {
                active: self.active_radius,
                background: self.background_radius,
            });
        }
        Ok(())
    }
}

/// Fluent builder for tests and embedders that only want to override a few
/// fields.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: EngineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn thread_count(mut self, n: usize) -> Self {
        self.config.thread_count = n;
        self
    }

    pub fn active_radius(mut self, r: f32) -> Self {
        self.config.active_radius = r;
        self
    }

    pub fn background_radius(mut self, r: f32) -> Self {
        self.config.background_radius = r;
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
