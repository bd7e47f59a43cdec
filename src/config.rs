//! Engine and per-model configuration.

use std::num::NonZeroUsize;
use std::time::Duration;

/// Per-model tuning, fixed at registration.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelOptions {
    /// How long changelog entries stay available for delta sync.
    /// Default: 5 minutes
    pub retention: Duration,

    /// Quiet window for coalescing bursts (zero = deliver immediately).
    pub debounce: Duration,

    /// How long a collection query result may be reused (zero = no cache).
    pub query_cache_ttl: Duration,

    /// Hard cap on changelog length, applied after time-based pruning.
    /// Default: 10000
    pub changelog_capacity: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(5 * 60),
            debounce: Duration::ZERO,
            query_cache_ttl: Duration::ZERO,
            changelog_capacity: 10_000,
        }
    }
}

impl ModelOptions {
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn with_query_cache_ttl(mut self, ttl: Duration) -> Self {
        self.query_cache_ttl = ttl;
        self
    }

    pub fn with_changelog_capacity(mut self, capacity: usize) -> Self {
        self.changelog_capacity = capacity;
        self
    }
}

/// Engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Options used by `register_model` when none are given.
    pub default_options: ModelOptions,

    /// Max cached collection results across all subscriptions.
    /// Default: 4096
    pub query_cache_capacity: NonZeroUsize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_options: ModelOptions::default(),
            query_cache_capacity: NonZeroUsize::new(4096).unwrap_or(NonZeroUsize::MIN),
        }
    }
}
