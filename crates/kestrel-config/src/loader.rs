//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::project::{ProjectConfig, MAX_FRAME_DEPTH, MAX_GLOBALS, MAX_STACK_SIZE};
use crate::settings::RuntimeSettings;
use crate::{project, ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const CONFIG_FILE_NAME: &str = "kestrel.toml";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Project config (./kestrel.toml) - lowest priority
/// 2. Environment variables (KESTREL_*) - overrides project
/// 3. Host overrides - highest priority (handled by caller)
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Skip environment overrides (hosts that want file-only configuration)
    ignore_env: bool,
}

/// Merged configuration result
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Project configuration after overrides
    pub project: ProjectConfig,

    /// Project root directory (where kestrel.toml was found)
    pub project_root: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self { ignore_env: false }
    }

    /// Create a loader that ignores `KESTREL_*` environment variables
    pub fn without_env() -> Self {
        Self { ignore_env: true }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find kestrel.toml. A missing file is not
    /// an error: defaults are used.
    pub fn load_from_directory(&self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            project_root: config_path.parent().map(|p| p.to_path_buf()),
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(CONFIG_FILE_NAME);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognized variables: KESTREL_STACK_SIZE, KESTREL_MAX_FRAMES,
    /// KESTREL_GLOBALS_SIZE, KESTREL_OPTIMIZE.
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if self.ignore_env {
            return Ok(config);
        }

        if let Some(size) = env_usize("KESTREL_STACK_SIZE", 16, MAX_STACK_SIZE)? {
            config.vm.get_or_insert_with(Default::default).stack_size = Some(size);
        }

        if let Some(depth) = env_usize("KESTREL_MAX_FRAMES", 1, MAX_FRAME_DEPTH)? {
            config.vm.get_or_insert_with(Default::default).max_frames = Some(depth);
        }

        if let Some(globals) = env_usize("KESTREL_GLOBALS_SIZE", 0, MAX_GLOBALS)? {
            config.vm.get_or_insert_with(Default::default).globals_size = Some(globals);
        }

        if let Ok(optimize) = env::var("KESTREL_OPTIMIZE") {
            let optimize_bool = matches!(optimize.to_lowercase().as_str(), "true" | "1" | "yes");
            config.compiler.get_or_insert_with(Default::default).optimize = Some(optimize_bool);
        }

        Ok(config)
    }
}

fn env_usize(name: &str, min: usize, max: usize) -> ConfigResult<Option<usize>> {
    let Ok(raw) = env::var(name) else {
        return Ok(None);
    };
    let value = raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        field: name.to_string(),
        reason: format!("'{}' is not a non-negative integer", raw),
    })?;
    project::check_range(name, value, min, max)?;
    Ok(Some(value))
}

impl Config {
    /// Resolve the effective runtime settings
    pub fn settings(&self) -> RuntimeSettings {
        RuntimeSettings::from(&self.project)
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Check if this is a project (has kestrel.toml)
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}
