//! Kestrel Configuration System
//!
//! Provides configuration for embedding the Kestrel runtime:
//! - Project configuration (kestrel.toml)
//! - Environment variable overrides (KESTREL_*)
//! - Resolved runtime settings with defaults applied
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded and merged in the following order (later overrides earlier):
//! 1. Built-in defaults
//! 2. Project config (./kestrel.toml, searched upward from the start directory)
//! 3. Environment variables (KESTREL_*)
//! 4. Host overrides (handled by caller)
//!
//! # Example
//!
//! ```no_run
//! use kestrel_config::ConfigLoader;
//! use std::path::Path;
//!
//! let loader = ConfigLoader::new();
//! let config = loader.load_from_directory(Path::new(".")).unwrap();
//! let settings = config.settings();
//! assert!(settings.stack_size > 0);
//! ```

pub mod loader;
pub mod project;
pub mod settings;

use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid TOML syntax in {file}: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

// Re-export main types
pub use loader::{Config, ConfigLoader};
pub use project::{CompilerSection, ProjectConfig, VmSection};
pub use settings::RuntimeSettings;
