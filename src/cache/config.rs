//! Cache engine configuration.
//!
//! Controls combination lifetime and race-retry behaviour via `zcache.toml`.

use std::num::NonZeroU64;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_MAX_CACHE_SECONDS: u64 = 60 * 5;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_KEY_PREFIX: &str = "ZCACHE";

/// Cache configuration from `zcache.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Hard ceiling on the lifetime of any combination entry, in seconds.
    pub max_cache_seconds: u64,
    /// Re-reads allowed after an empty combined result.
    pub max_retries: u32,
    /// Leading tag of every combination key.
    pub key_prefix: String,
    /// Default isolation for queries that do not choose explicitly.
    pub thread_local: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_seconds: DEFAULT_MAX_CACHE_SECONDS,
            max_retries: DEFAULT_MAX_RETRIES,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            thread_local: false,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            max_cache_seconds: settings.max_cache_seconds.get(),
            max_retries: settings.max_retries,
            key_prefix: settings.key_prefix.clone(),
            thread_local: settings.thread_local,
        }
    }
}

impl CacheConfig {
    /// Returns the lifetime cap as NonZeroU64, clamping to 1 if zero.
    pub fn max_cache_seconds_non_zero(&self) -> NonZeroU64 {
        NonZeroU64::new(self.max_cache_seconds).unwrap_or(NonZeroU64::MIN)
    }

    /// The caller's ttl bounded by the lifetime cap.
    pub fn capped_ttl(&self, ttl: u64) -> u64 {
        ttl.min(self.max_cache_seconds_non_zero().get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert_eq!(config.max_cache_seconds, 300);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.key_prefix, "ZCACHE");
        assert!(!config.thread_local);
    }

    #[test]
    fn ttl_is_capped() {
        let config = CacheConfig {
            max_cache_seconds: 60,
            ..Default::default()
        };
        assert_eq!(config.capped_ttl(5), 5);
        assert_eq!(config.capped_ttl(3600), 60);
    }

    #[test]
    fn non_zero_clamps_to_min() {
        let config = CacheConfig {
            max_cache_seconds: 0,
            ..Default::default()
        };
        assert_eq!(config.max_cache_seconds_non_zero().get(), 1);
        assert_eq!(config.capped_ttl(10), 1);
    }
}
