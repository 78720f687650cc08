//! Runtime configuration for a store.

use log::warn;

/// Default ceiling for graph walks (impact closure, ancestor chains).
pub const DEFAULT_MAX_TRAVERSAL_DEPTH: usize = 100;

/// Environment variable overriding the traversal ceiling.
pub const MAX_DEPTH_ENV_VAR: &str = "TANGLE_MAX_DEPTH";

/// Environment variable naming the acting agent.
pub const AGENT_ENV_VAR: &str = "TANGLE_AGENT_ID";

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Graph walks stop expanding past this many hops. Guards against
    /// cyclic data that slipped in from outside the engine.
    pub max_traversal_depth: usize,
}

impl Config {
    /// Create config with default settings.
    pub fn new() -> Self {
        Self {
            max_traversal_depth: DEFAULT_MAX_TRAVERSAL_DEPTH,
        }
    }

    /// Defaults, overridden by `TANGLE_MAX_DEPTH` when it parses.
    pub fn from_env() -> Self {
        let mut config = Self::new();
        if let Ok(raw) = std::env::var(MAX_DEPTH_ENV_VAR) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth > 0 => config.max_traversal_depth = depth,
                _ => warn!("Ignoring invalid {}={:?}", MAX_DEPTH_ENV_VAR, raw),
            }
        }
        config
    }

    pub fn with_max_traversal_depth(mut self, depth: usize) -> Self {
        self.max_traversal_depth = depth.max(1);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
