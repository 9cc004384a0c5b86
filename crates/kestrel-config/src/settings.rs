//! Resolved runtime settings
//!
//! `ProjectConfig` mirrors the file and keeps every field optional. The runtime
//! consumes `RuntimeSettings`, which has defaults filled in.

use crate::project::ProjectConfig;

/// Default operand stack slots per task
pub const DEFAULT_STACK_SIZE: usize = 2048;
/// Default maximum call depth per task
pub const DEFAULT_MAX_FRAMES: usize = 1024;
/// Default initial capacity of the global table
pub const DEFAULT_GLOBALS_SIZE: usize = 65536;

/// Effective settings used to build compilers and VMs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub stack_size: usize,
    pub max_frames: usize,
    pub globals_size: usize,
    pub optimize: bool,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            max_frames: DEFAULT_MAX_FRAMES,
            globals_size: DEFAULT_GLOBALS_SIZE,
            optimize: true,
        }
    }
}

impl From<&ProjectConfig> for RuntimeSettings {
    fn from(config: &ProjectConfig) -> Self {
        let defaults = RuntimeSettings::default();
        let vm = config.vm.clone().unwrap_or_default();
        let compiler = config.compiler.clone().unwrap_or_default();
        Self {
            stack_size: vm.stack_size.unwrap_or(defaults.stack_size),
            max_frames: vm.max_frames.unwrap_or(defaults.max_frames),
            globals_size: vm.globals_size.unwrap_or(defaults.globals_size),
            optimize: compiler.optimize.unwrap_or(defaults.optimize),
        }
    }
}
