//! Process-wide engine configuration.
//!
//! Populated from the environment once at startup; never mutated after.

use std::time::Duration;

use serde::Serialize;

use fhirview_query::{EngineError, EngineResult};
use fhirview_store::DEFAULT_STORE_URL;

/// Which runner serves queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerKind {
    /// Materialized views when available, relational fallback, speed layer
    /// merge. The production default.
    #[default]
    Hybrid,
    /// Materialized views only.
    Materialized,
    /// Generated relational queries only.
    Postgres,
    /// Recent-writes cache only.
    InMemory,
}

impl RunnerKind {
    /// Parse the `VIEWDEF_RUNNER` value.
    pub fn parse(value: &str) -> EngineResult<Self> {
        match value.to_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "materialized" => Ok(Self::Materialized),
            "postgres" => Ok(Self::Postgres),
            "in_memory" => Ok(Self::InMemory),
            other => Err(EngineError::invalid_input(format!(
                "unknown runner kind '{other}'"
            ))),
        }
    }

    /// Lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Materialized => "materialized",
            Self::Postgres => "postgres",
            Self::InMemory => "in_memory",
        }
    }
}

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Runner selection.
    pub runner: RunnerKind,
    /// Whether the relational runner caches results.
    pub query_cache_enabled: bool,
    /// Result-cache TTL.
    pub query_cache_ttl: Duration,
    /// Whether the recent-writes layer is consulted.
    pub speed_layer_enabled: bool,
    /// Document-store connection URL.
    pub store_url: String,
    /// Recent-writes cache connection URL.
    pub cache_url: String,
    /// Directory holding view definitions.
    pub view_defs_dir: String,
    /// Skip the integrity validator at startup.
    pub skip_validation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::Hybrid,
            query_cache_enabled: true,
            query_cache_ttl: Duration::from_secs(300),
            speed_layer_enabled: true,
            store_url: DEFAULT_STORE_URL.to_string(),
            cache_url: fhirview_cache::DEFAULT_CACHE_URL.to_string(),
            view_defs_dir: "./view_definitions".to_string(),
            skip_validation: false,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment.
    ///
    /// Recognized variables: `VIEWDEF_RUNNER`, `ENABLE_QUERY_CACHE`,
    /// `CACHE_TTL_SECONDS`, `USE_SPEED_LAYER`, `FHIR_DB_URL`, `REDIS_URL`,
    /// `VIEWDEF_DIR`, `SKIP_VALIDATION`.
    pub fn from_env() -> EngineResult<Self> {
        let mut config = Self::default();

        if let Ok(runner) = std::env::var("VIEWDEF_RUNNER") {
            config.runner = RunnerKind::parse(&runner)?;
        }
        if let Some(enabled) = env_bool("ENABLE_QUERY_CACHE") {
            config.query_cache_enabled = enabled;
        }
        if let Ok(secs) = std::env::var("CACHE_TTL_SECONDS") {
            let secs: u64 = secs
                .parse()
                .map_err(|_| EngineError::invalid_input("invalid CACHE_TTL_SECONDS"))?;
            config.query_cache_ttl = Duration::from_secs(secs);
        }
        if let Some(enabled) = env_bool("USE_SPEED_LAYER") {
            config.speed_layer_enabled = enabled;
        }
        if let Ok(url) = std::env::var("FHIR_DB_URL") {
            config.store_url = url;
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.cache_url = url;
        }
        if let Ok(dir) = std::env::var("VIEWDEF_DIR") {
            config.view_defs_dir = dir;
        }
        if let Some(skip) = env_bool("SKIP_VALIDATION") {
            config.skip_validation = skip;
        }

        Ok(config)
    }
}

fn env_bool(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Environment mutation is process-global; serialize these tests.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for name in [
            "VIEWDEF_RUNNER",
            "ENABLE_QUERY_CACHE",
            "CACHE_TTL_SECONDS",
            "USE_SPEED_LAYER",
            "FHIR_DB_URL",
            "REDIS_URL",
            "VIEWDEF_DIR",
            "SKIP_VALIDATION",
        ] {
            unsafe { std::env::remove_var(name) };
        }
    }

    #[test]
    fn test_defaults() {
        let _guard = ENV_LOCK.lock();
        clear_env();

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.runner, RunnerKind::Hybrid);
        assert!(config.query_cache_enabled);
        assert_eq!(config.query_cache_ttl, Duration::from_secs(300));
        assert!(config.speed_layer_enabled);
        assert!(!config.skip_validation);
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock();
        clear_env();

        unsafe {
            std::env::set_var("VIEWDEF_RUNNER", "postgres");
            std::env::set_var("ENABLE_QUERY_CACHE", "false");
            std::env::set_var("CACHE_TTL_SECONDS", "60");
            std::env::set_var("USE_SPEED_LAYER", "0");
            std::env::set_var("SKIP_VALIDATION", "1");
        }

        let config = EngineConfig::from_env().unwrap();
        assert_eq!(config.runner, RunnerKind::Postgres);
        assert!(!config.query_cache_enabled);
        assert_eq!(config.query_cache_ttl, Duration::from_secs(60));
        assert!(!config.speed_layer_enabled);
        assert!(config.skip_validation);

        clear_env();
    }

    #[test]
    fn test_invalid_runner_rejected() {
        let _guard = ENV_LOCK.lock();
        clear_env();

        unsafe { std::env::set_var("VIEWDEF_RUNNER", "quantum") };
        assert!(EngineConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_runner_kind_parse() {
        assert_eq!(RunnerKind::parse("HYBRID").unwrap(), RunnerKind::Hybrid);
        assert_eq!(RunnerKind::parse("in_memory").unwrap(), RunnerKind::InMemory);
        assert_eq!(RunnerKind::Materialized.as_str(), "materialized");
    }
}
