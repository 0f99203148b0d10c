//! Tests for constants module.
//!
//! Validates that sandbox-critical constants have expected values and that
//! the validation helpers reject unsafe input.

use std::time::Duration;
use texrun::constants::*;

// =============================================================================
// Sandbox Layout Tests
// =============================================================================

#[test]
fn test_mount_path_is_absolute() {
    assert!(WORKSPACE_MOUNT_PATH.starts_with('/'));
    assert!(!WORKSPACE_MOUNT_PATH.ends_with('/'));
}

#[test]
fn test_source_and_artifact_share_stem() {
    let stem = |name: &str| name.rsplit_once('.').map(|(s, _)| s.to_string());
    assert_eq!(stem(SOURCE_FILE_NAME), stem(ARTIFACT_FILE_NAME));
    assert!(SOURCE_FILE_NAME.ends_with(".tex"));
    assert!(ARTIFACT_FILE_NAME.ends_with(".pdf"));
}

#[test]
fn test_texmf_var_is_relative() {
    // Joined under the workspace mount; an absolute path would escape it.
    assert!(!TEXMF_VAR_DIR.starts_with('/'));
}

// =============================================================================
// Timeout Tests
// =============================================================================

#[test]
fn test_poll_interval_is_fine_grained() {
    assert!(CONTAINER_POLL_INTERVAL <= Duration::from_millis(250));
    assert!(CONTAINER_POLL_INTERVAL >= Duration::from_millis(10));
}

#[test]
fn test_pull_timeout_reasonable() {
    assert!(IMAGE_PULL_TIMEOUT >= Duration::from_secs(60));
    assert!(IMAGE_PULL_TIMEOUT <= Duration::from_secs(900));
}

// =============================================================================
// Size Limit Tests
// =============================================================================

#[test]
fn test_log_cap_reasonable() {
    // Enough for the tail of a TeX error transcript.
    assert!(MAX_LOG_BYTES >= 4 * 1024);
    assert!(MAX_LOG_BYTES <= 1024 * 1024);
}

#[test]
fn test_memory_floor_matches_docker() {
    assert_eq!(MIN_MEMORY_LIMIT_MB, 6);
}

#[test]
fn test_memory_ceiling_fits_in_bytes() {
    assert!(MAX_MEMORY_LIMIT_MB > MIN_MEMORY_LIMIT_MB);
    assert!(MAX_MEMORY_LIMIT_MB.checked_mul(1024 * 1024).is_some_and(|b| b <= i64::MAX as u64));
}

#[test]
fn test_cpu_period_is_docker_default() {
    assert_eq!(CPU_PERIOD_MICROS, 100_000);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_valid_image_refs() {
    for image in [
        "texlive/texlive:latest",
        "registry.example.com:5000/tex/full:2024",
        "ghcr.io/org/tex@sha256:0123abcd",
    ] {
        assert!(validate_image_ref(image).is_ok(), "{image} should be valid");
    }
}

#[test]
fn test_invalid_image_refs() {
    assert!(validate_image_ref("").is_err());
    assert!(validate_image_ref("tex live").is_err());
    assert!(validate_image_ref("tex;rm -rf").is_err());
    assert!(validate_image_ref(&"a".repeat(MAX_IMAGE_REF_LEN + 1)).is_err());
}

#[test]
fn test_container_name_rejects_path_characters() {
    assert!(validate_container_name("texrun-0123abcd").is_ok());
    assert!(validate_container_name("").is_err());
    assert!(validate_container_name("../etc").is_err());
    assert!(validate_container_name("a/b").is_err());
    assert!(validate_container_name(&"a".repeat(MAX_CONTAINER_NAME_LEN + 1)).is_err());
}
