//! Error types for the tiled scene.

use std::io;

/// Errors surfaced by the scene and its render path.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// A rendered patch does not match the size of the tile it is written to.
    #[error("patch buffer has {actual} bytes, expected {expected}")]
    BufferSize { expected: usize, actual: usize },

    /// The render workers could not be started.
    #[error("render scheduler error: {0}")]
    Scheduler(#[from] tilescene_scheduler::SchedulerError),

    /// The scene could not be attached to a cache graph.
    #[error("cache graph error: {0}")]
    Cache(#[from] tilescene_cache::CacheError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors that can occur while loading or saving a [`crate::SceneConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing a configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub type RenderResult<T> = Result<T, RenderError>;
