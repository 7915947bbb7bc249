//! Scene configuration.
//!
//! Tile size, render worker settings and the memory budget for the scene's
//! tile stores. Configuration can be loaded from a TOML file, environment
//! variables, or created programmatically.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tilescene_cache::MemoryBudgetConfig;
use tilescene_scheduler::WorkerPoolConfig;

/// Default tile edge length in data pixels.
pub const TILE_SIZE: usize = 256;

/// Configuration for a [`crate::TileScene`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Tile edge length in data pixels
    pub tile_size: usize,
    /// Number of render worker threads
    pub num_workers: usize,
    /// How long an idle worker waits before checking for shutdown, in milliseconds
    pub poll_interval_ms: u64,
    /// Memory budget for all tile stores, in megabytes
    pub memory_budget_mb: usize,
}

impl Default for SceneConfig {
    fn default() -> Self {
        let workers = WorkerPoolConfig::default();
        Self {
            tile_size: TILE_SIZE,
            num_workers: workers.num_workers,
            poll_interval_ms: workers.poll_interval.as_millis() as u64,
            memory_budget_mb: 256,
        }
    }
}

impl SceneConfig {
    /// Sets the tile edge length.
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Sets the number of render workers.
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    /// Sets the worker poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the memory budget in megabytes.
    pub fn with_memory_budget_mb(mut self, mb: usize) -> Self {
        self.memory_budget_mb = mb;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Worker pool settings derived from this configuration.
    pub fn worker_pool(&self) -> WorkerPoolConfig {
        WorkerPoolConfig::new(self.num_workers).with_poll_interval(self.poll_interval())
    }

    /// Memory budget settings derived from this configuration.
    pub fn memory_budget(&self) -> MemoryBudgetConfig {
        MemoryBudgetConfig::new(self.memory_budget_mb)
    }

    /// Checks that all values are usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tile_size == 0 {
            return Err(ConfigError::InvalidValue("tile_size".to_string()));
        }
        if self.num_workers == 0 {
            return Err(ConfigError::InvalidValue("num_workers".to_string()));
        }
        Ok(())
    }

    /// Loads configuration from environment variables.
    ///
    /// Environment variables:
    /// - `TILESCENE_TILE_SIZE`: tile edge length (default: 256)
    /// - `TILESCENE_WORKERS`: number of render workers (default: logical cores)
    /// - `TILESCENE_POLL_INTERVAL_MS`: worker poll interval (default: 100)
    /// - `TILESCENE_MEMORY_BUDGET_MB`: tile store memory budget (default: 256)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_value("TILESCENE_TILE_SIZE")? {
            config.tile_size = value as usize;
        }
        if let Some(value) = env_value("TILESCENE_WORKERS")? {
            config.num_workers = value as usize;
        }
        if let Some(value) = env_value("TILESCENE_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = value;
        }
        if let Some(value) = env_value("TILESCENE_MEMORY_BUDGET_MB")? {
            config.memory_budget_mb = value as usize;
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format (all keys optional):
    /// ```toml
    /// tile_size = 256
    /// num_workers = 4
    /// poll_interval_ms = 100
    /// memory_budget_mb = 256
    /// ```
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Parses configuration from a TOML string. Missing keys keep their defaults.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

fn env_value(key: &str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const ENV_KEYS: [&str; 4] = [
        "TILESCENE_TILE_SIZE",
        "TILESCENE_WORKERS",
        "TILESCENE_POLL_INTERVAL_MS",
        "TILESCENE_MEMORY_BUDGET_MB",
    ];

    /// Restores the listed environment variables when dropped.
    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&'static str]) -> Self {
            let saved = keys.iter().map(|&k| (k, env::var(k).ok())).collect();
            for key in keys {
                env::remove_var(key);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(key, v),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    fn test_default_config() {
        let config = SceneConfig::default();
        assert_eq!(config.tile_size, 256);
        assert!(config.num_workers > 0);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.memory_budget_mb, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_methods() {
        let config = SceneConfig::default()
            .with_tile_size(64)
            .with_workers(3)
            .with_poll_interval(Duration::from_millis(20))
            .with_memory_budget_mb(32);

        assert_eq!(config.tile_size, 64);
        assert_eq!(config.worker_pool().num_workers, 3);
        assert_eq!(config.worker_pool().poll_interval, Duration::from_millis(20));
        assert_eq!(config.memory_budget().total_budget, 32 * 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_tile_size() {
        let err = SceneConfig::default().with_tile_size(0).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(key) if key == "tile_size"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = SceneConfig::from_toml_str("tile_size = 128\nmemory_budget_mb = 64\n").unwrap();
        assert_eq!(config.tile_size, 128);
        assert_eq!(config.memory_budget_mb, 64);
        assert_eq!(config.poll_interval_ms, 100);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(matches!(
            SceneConfig::from_toml_str("tile_size = \"large\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            SceneConfig::from_toml_str("num_workers = 0"),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = SceneConfig::default().with_tile_size(512).with_workers(2);
        let text = config.to_toml().unwrap();
        assert_eq!(SceneConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_save_and_load_file() {
        let path = env::temp_dir().join(format!("tilescene-config-{}.toml", std::process::id()));
        let config = SceneConfig::default().with_memory_budget_mb(48);

        config.save_to_file(&path).unwrap();
        let loaded = SceneConfig::from_file(&path).unwrap();
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_from_missing_file() {
        let result = SceneConfig::from_file("/nonexistent/tilescene.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("TILESCENE_TILE_SIZE", "128");
        env::set_var("TILESCENE_WORKERS", "3");
        env::set_var("TILESCENE_POLL_INTERVAL_MS", "25");
        env::set_var("TILESCENE_MEMORY_BUDGET_MB", "512");

        let config = SceneConfig::from_env().unwrap();
        assert_eq!(config.tile_size, 128);
        assert_eq!(config.num_workers, 3);
        assert_eq!(config.poll_interval(), Duration::from_millis(25));
        assert_eq!(config.memory_budget_mb, 512);
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_value() {
        let _guard = EnvGuard::new(&ENV_KEYS);

        env::set_var("TILESCENE_WORKERS", "many");

        let result = SceneConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == "TILESCENE_WORKERS"));
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        let _guard = EnvGuard::new(&ENV_KEYS);
        assert_eq!(SceneConfig::from_env().unwrap(), SceneConfig::default());
    }
}
