use detour_core::StatusCode;
use std::time::Duration;
use typed_builder::TypedBuilder;

/// Configuration for a [`RedirectionEngine`][crate::RedirectionEngine].
#[derive(Debug, Clone, TypedBuilder)]
pub struct EngineConfig {
    /// Status code used when a redirection is added without one.
    #[builder(default)]
    pub default_status_code: StatusCode,
    /// How often a cascade is re-planned after losing a write race before
    /// the add fails with a concurrent modification error.
    #[builder(default = 3)]
    pub max_conflict_retries: usize,
    /// How long the host list used for host matching is reused. Writes made
    /// through the engine take effect immediately; writes by other processes
    /// sharing the storage are picked up after at most this long.
    #[builder(default = Duration::from_secs(5))]
    pub host_cache_ttl: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
