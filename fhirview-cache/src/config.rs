//! Speed-layer cache configuration.

use std::time::Duration;

/// Default connection URL for a local cache.
pub const DEFAULT_CACHE_URL: &str = "redis://localhost:6379/0";

/// Configuration for the recent-writes cache.
///
/// Per-kind TTLs reflect how quickly each kind goes stale: observations
/// change more frequently than demographics or conditions.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Connection URL.
    pub url: String,
    /// TTL for kinds without a specific entry.
    pub default_ttl_hours: u64,
    /// TTL for `Patient` entries.
    pub patient_ttl_hours: u64,
    /// TTL for `Condition` entries.
    pub condition_ttl_hours: u64,
    /// TTL for `Observation` entries.
    pub observation_ttl_hours: u64,
    /// Keys fetched per SCAN round-trip.
    pub scan_batch_size: usize,
    /// Hard cap on entries returned by a scan.
    pub max_scan_results: usize,
    /// Per-command timeout.
    pub command_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CACHE_URL.to_string(),
            default_ttl_hours: 24,
            patient_ttl_hours: 24,
            condition_ttl_hours: 24,
            observation_ttl_hours: 12,
            scan_batch_size: 100,
            max_scan_results: 10_000,
            command_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Build a config from the environment, falling back to defaults.
    ///
    /// Recognized variables: `REDIS_URL`, `SPEED_LAYER_DEFAULT_TTL_HOURS`,
    /// `SPEED_LAYER_OBSERVATION_TTL_HOURS`, `SPEED_LAYER_SCAN_BATCH`,
    /// `SPEED_LAYER_MAX_RESULTS`, `SPEED_LAYER_TIMEOUT_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("REDIS_URL") {
            config.url = url;
        }
        if let Some(hours) = env_u64("SPEED_LAYER_DEFAULT_TTL_HOURS") {
            config.default_ttl_hours = hours;
            config.patient_ttl_hours = hours;
            config.condition_ttl_hours = hours;
        }
        if let Some(hours) = env_u64("SPEED_LAYER_OBSERVATION_TTL_HOURS") {
            config.observation_ttl_hours = hours;
        }
        if let Some(batch) = env_u64("SPEED_LAYER_SCAN_BATCH") {
            config.scan_batch_size = batch as usize;
        }
        if let Some(max) = env_u64("SPEED_LAYER_MAX_RESULTS") {
            config.max_scan_results = max as usize;
        }
        if let Some(secs) = env_u64("SPEED_LAYER_TIMEOUT_SECS") {
            config.command_timeout = Duration::from_secs(secs);
        }

        config
    }

    /// TTL in hours for entries of the given document kind.
    pub fn ttl_hours_for(&self, kind: &str) -> u64 {
        match kind {
            "Patient" => self.patient_ttl_hours,
            "Condition" => self.condition_ttl_hours,
            "Observation" => self.observation_ttl_hours,
            _ => self.default_ttl_hours,
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.ttl_hours_for("Patient"), 24);
        assert_eq!(config.ttl_hours_for("Condition"), 24);
        assert_eq!(config.ttl_hours_for("Observation"), 12);
        assert_eq!(config.ttl_hours_for("MedicationRequest"), 24);
        assert_eq!(config.scan_batch_size, 100);
        assert_eq!(config.command_timeout, Duration::from_secs(5));
    }
}
