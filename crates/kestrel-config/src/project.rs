//! Project Configuration (kestrel.toml)
//!
//! Handles project-level configuration stored in `kestrel.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest operand stack a task may request.
pub(crate) const MAX_STACK_SIZE: usize = 1 << 20;
/// Largest frame depth a task may request.
pub(crate) const MAX_FRAME_DEPTH: usize = 1 << 16;
/// Global indexes are 16-bit operands.
pub(crate) const MAX_GLOBALS: usize = 1 << 16;

/// Project configuration from kestrel.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Virtual machine limits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmSection>,

    /// Compiler configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler: Option<CompilerSection>,
}

/// `[vm]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmSection {
    /// Operand stack slots per task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,

    /// Maximum call-frame depth per task
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frames: Option<usize>,

    /// Initial capacity of the shared global table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub globals_size: Option<usize>,
}

/// `[compiler]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CompilerSection {
    /// Run the constant-folding pass before lowering
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize: Option<bool>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(vm) = &self.vm {
            if let Some(size) = vm.stack_size {
                check_range("vm.stack_size", size, 16, MAX_STACK_SIZE)?;
            }
            if let Some(depth) = vm.max_frames {
                check_range("vm.max_frames", depth, 1, MAX_FRAME_DEPTH)?;
            }
            if let Some(globals) = vm.globals_size {
                check_range("vm.globals_size", globals, 0, MAX_GLOBALS)?;
            }
        }
        Ok(())
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if let Some(other_vm) = &other.vm {
            let vm = self.vm.get_or_insert_with(Default::default);
            if other_vm.stack_size.is_some() {
                vm.stack_size = other_vm.stack_size;
            }
            if other_vm.max_frames.is_some() {
                vm.max_frames = other_vm.max_frames;
            }
            if other_vm.globals_size.is_some() {
                vm.globals_size = other_vm.globals_size;
            }
        }
        if let Some(other_compiler) = &other.compiler {
            let compiler = self.compiler.get_or_insert_with(Default::default);
            if other_compiler.optimize.is_some() {
                compiler.optimize = other_compiler.optimize;
            }
        }
    }
}

pub(crate) fn check_range(field: &str, value: usize, min: usize, max: usize) -> ConfigResult<()> {
    if value < min || value > max {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("{} is outside the allowed range {}..={}", value, min, max),
        });
    }
    Ok(())
}
