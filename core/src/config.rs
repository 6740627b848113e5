//! Runtime tunables, loadable from TOML.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

/// Default collector pause, in percent: wait for the heap to double.
pub const DEFAULT_GC_PAUSE: u32 = 200;
/// Default collector speed relative to allocation, in percent.
pub const DEFAULT_GC_STEP_MUL: u32 = 200;
/// Default stack size limit, in slots.
pub const DEFAULT_MAX_STACK: usize = 1_000_000;
/// Default limit on nested native calls.
pub const DEFAULT_MAX_NATIVE_CALLS: u32 = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Percentage of live memory to reach before a new cycle starts.
    pub gc_pause: u32,
    /// Collector work per allocated kilobyte, in percent.
    pub gc_step_mul: u32,
    /// Maximum stack slots per thread.
    pub max_stack: usize,
    /// Maximum nesting of native calls and coroutine resumes.
    pub max_native_calls: u32,
    /// Byte limit enforced by the default allocator (`None` = unbounded).
    pub memory_limit: Option<usize>,
    /// Fixed string-hash seed, for reproducible runs.
    pub seed: Option<u32>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            gc_pause: DEFAULT_GC_PAUSE,
            gc_step_mul: DEFAULT_GC_STEP_MUL,
            max_stack: DEFAULT_MAX_STACK,
            max_native_calls: DEFAULT_MAX_NATIVE_CALLS,
            memory_limit: None,
            seed: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: RuntimeConfig = toml::from_str(text).context("failed to parse runtime config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.gc_step_mul > 0, "gc_step_mul must be positive");
        ensure!(self.max_stack >= 1_000, "max_stack must be at least 1000 slots");
        ensure!(self.max_native_calls >= 10, "max_native_calls must be at least 10");
        Ok(())
    }
}
