// config.rs — Optimizer configuration
//
// One value per optimizer instance: the debug toggle and its sink, the
// caller's unsafe-mode flag and the sliding-window iteration cap. Loadable
// from JSON; unknown keys are rejected and missing keys take defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Iteration cap of the sliding-window optimizer when none is configured.
pub const DEFAULT_MAX_LINEAR_ITERATIONS: usize = 10;

/// Where debug decision lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebugSink {
    /// Forward each line as a `tracing` debug event.
    #[default]
    Tracing,
    /// Collect lines into the report's `debug_log`.
    Buffer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugConfig {
    pub enabled: bool,
    pub sink: DebugSink,
}

impl DebugConfig {
    pub fn buffered() -> Self {
        DebugConfig {
            enabled: true,
            sink: DebugSink::Buffer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FusionConfig {
    pub debug: DebugConfig,
    /// Permits `force_fuse` to bypass the safety rules.
    pub allow_unsafe: bool,
    pub max_linear_iterations: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        FusionConfig {
            debug: DebugConfig::default(),
            allow_unsafe: false,
            max_linear_iterations: DEFAULT_MAX_LINEAR_ITERATIONS,
        }
    }
}

impl FusionConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn with_debug(mut self, debug: DebugConfig) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_allow_unsafe(mut self, allow: bool) -> Self {
        self.allow_unsafe = allow;
        self
    }

    pub fn with_max_linear_iterations(mut self, cap: usize) -> Self {
        self.max_linear_iterations = cap;
        self
    }
}
