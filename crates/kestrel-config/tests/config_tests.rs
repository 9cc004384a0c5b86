//! Configuration loading and precedence tests

use kestrel_config::{ConfigError, ConfigLoader, ProjectConfig, RuntimeSettings};
use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn create_config_file(dir: &Path, content: &str) -> std::path::PathBuf {
    let config_path = dir.join("kestrel.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
fn test_load_project_config_basic() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(
        temp_dir.path(),
        r#"
[vm]
stack_size = 1024
max_frames = 100

[compiler]
optimize = false
"#,
    );

    let config = ConfigLoader::without_env()
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert!(config.is_project());
    assert_eq!(
        config.settings(),
        RuntimeSettings {
            stack_size: 1024,
            max_frames: 100,
            globals_size: 65536,
            optimize: false,
        }
    );
}

#[test]
fn test_load_when_no_config_exists() {
    let temp_dir = TempDir::new().unwrap();

    let config = ConfigLoader::without_env()
        .load_from_directory(temp_dir.path())
        .unwrap();

    assert!(!config.is_project());
    assert_eq!(config.settings(), RuntimeSettings::default());
}

#[test]
fn test_load_from_subdirectory_finds_parent() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[compiler]\noptimize = true\n");

    let sub2 = temp_dir.path().join("sub1").join("sub2");
    fs::create_dir_all(&sub2).unwrap();

    let config = ConfigLoader::without_env().load_from_directory(&sub2).unwrap();

    assert_eq!(config.project_root(), Some(temp_dir.path()));
}

#[test]
fn test_load_from_specific_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[vm]\nglobals_size = 10\n");

    let config = ConfigLoader::without_env().load_from_file(&path).unwrap();

    assert_eq!(config.settings().globals_size, 10);
}

#[test]
fn test_missing_specific_file() {
    let temp_dir = TempDir::new().unwrap();
    let result = ProjectConfig::load_from_file(&temp_dir.path().join("kestrel.toml"));
    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

// ============================================================================
// Invalid Config Tests
// ============================================================================

#[rstest]
#[case::broken_syntax("[vm\nstack_size = ")]
#[case::unknown_section("[package]\nname = \"x\"\n")]
#[case::unknown_field("[vm]\nheap = 3\n")]
#[case::wrong_type("[vm]\nstack_size = \"big\"\n")]
#[case::stack_too_small("[vm]\nstack_size = 2\n")]
#[case::zero_frames("[vm]\nmax_frames = 0\n")]
fn test_invalid_configs_rejected(#[case] content: &str) {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), content);

    let result = ConfigLoader::without_env().load_from_directory(temp_dir.path());

    assert!(result.is_err(), "expected error for {:?}", content);
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_env_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[compiler]\noptimize = true\n[vm]\nmax_frames = 10\n");

    env::set_var("KESTREL_OPTIMIZE", "0");
    env::set_var("KESTREL_MAX_FRAMES", "20");
    let config = ConfigLoader::new().load_from_directory(temp_dir.path());
    env::remove_var("KESTREL_OPTIMIZE");
    env::remove_var("KESTREL_MAX_FRAMES");

    let settings = config.unwrap().settings();
    assert!(!settings.optimize);
    assert_eq!(settings.max_frames, 20);
}

#[test]
#[serial]
fn test_without_env_ignores_overrides() {
    let temp_dir = TempDir::new().unwrap();

    env::set_var("KESTREL_STACK_SIZE", "64");
    let config = ConfigLoader::without_env().load_from_directory(temp_dir.path());
    env::remove_var("KESTREL_STACK_SIZE");

    assert_eq!(config.unwrap().settings().stack_size, 2048);
}
