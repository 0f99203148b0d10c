//! # Engine Constants
//!
//! Timeouts, file names, and validation bounds for the compilation engine.
//! These constants are the **single source of truth** for values that other
//! modules must agree on (the in-container mount path, the artifact name,
//! the poll cadence).
//!
//! ## Cross-References
//!
//! - [`crate::orchestrator`]: Uses the mount path, file names and poll interval
//! - [`crate::image`]: Uses `IMAGE_PULL_TIMEOUT`
//! - [`crate::config`]: Uses the image reference validation bounds
//! - [`crate::result`]: Uses `MAX_LOG_BYTES` and `MAX_ARTIFACT_BYTES`

use std::time::Duration;

// =============================================================================
// Sandbox Layout
// =============================================================================
//
// The per-request workspace is the only channel between host and sandbox.
// Both sides address files by these fixed names.
// =============================================================================

/// In-container path where the per-request workspace is bind-mounted.
pub const WORKSPACE_MOUNT_PATH: &str = "/workspace";

/// Name of the LaTeX source file inside the workspace.
pub const SOURCE_FILE_NAME: &str = "document.tex";

/// Name of the artifact the toolchain produces next to the source.
pub const ARTIFACT_FILE_NAME: &str = "document.pdf";

/// Writable font/format cache directory for the toolchain.
///
/// The root filesystem is read-only, so `TEXMFVAR` must point inside the
/// workspace or luatex/xetex fail on their first cache write.
pub const TEXMF_VAR_DIR: &str = ".texmf-var";

/// Environment variable carrying the request locale into the container.
pub const LOCALE_ENV: &str = "TEXRUN_LOCALE";

/// Prefix for per-request temporary directories.
pub const WORKSPACE_PREFIX: &str = "texrun-";

/// Prefix for container names.
pub const CONTAINER_NAME_PREFIX: &str = "texrun-";

/// Label marking containers created by this engine.
pub const MANAGED_LABEL: &str = "io.texrun.managed";

/// Label carrying the request locale on the container.
pub const LOCALE_LABEL: &str = "io.texrun.locale";

// =============================================================================
// Timeouts
// =============================================================================

/// Ceiling for a first-use image pull (5 minutes).
///
/// Independent of the per-request compilation timeout: a cold cache pays
/// this once per process lifetime per image tag.
pub const IMAGE_PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between container state checks while waiting for exit.
///
/// This is also the epsilon on the timeout bound: a request whose container
/// never exits fails within `timeout + CONTAINER_POLL_INTERVAL`.
pub const CONTAINER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default graceful stop window before the runtime kills the container.
pub const DEFAULT_STOP_GRACE_SECONDS: u64 = 5;

/// Default slack added on top of the compilation timeout for admission
/// waits and the outer safety net.
pub const DEFAULT_ADMISSION_BUFFER_SECONDS: u64 = 5;

/// Upper bound for the compilation timeout and the admission buffer (1 day).
pub const MAX_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;

// =============================================================================
// Resource Limits
// =============================================================================

/// CFS scheduler period in microseconds used to express a CPU fraction.
pub const CPU_PERIOD_MICROS: i64 = 100_000;

/// Smallest memory limit the Docker engine accepts (6 MiB).
pub const MIN_MEMORY_LIMIT_MB: u64 = 6;

/// Largest accepted memory limit (1 TiB).
pub const MAX_MEMORY_LIMIT_MB: u64 = 1024 * 1024;

/// Default process limit inside the sandbox.
///
/// **Security**: Prevents fork bombs from `\write18`-style escapes that
/// slipped past upstream scanning.
pub const DEFAULT_PIDS_LIMIT: i64 = 256;

/// Maximum bytes of container logs kept for diagnostics (64 KiB).
///
/// LaTeX logs for a failing document can run to megabytes; only the tail
/// carries the error.
pub const MAX_LOG_BYTES: usize = 64 * 1024;

/// Maximum artifact size read back into memory (256 MiB).
pub const MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;

// =============================================================================
// Validation
// =============================================================================

/// Maximum OCI image reference length in bytes.
pub const MAX_IMAGE_REF_LEN: usize = 512;

/// Valid characters for OCI image references.
///
/// Includes: `a-z`, `A-Z`, `0-9`, `-`, `_`, `.`, `/`, `:`, `@`
pub const IMAGE_REF_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_./:@";

/// Valid characters for container names.
///
/// **Security**: Excludes `/` and `.` so names are safe to embed in paths
/// and log lines.
pub const CONTAINER_NAME_VALID_CHARS: &str =
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789-_";

/// Maximum container name length.
pub const MAX_CONTAINER_NAME_LEN: usize = 128;

/// Validates an image reference.
///
/// # Returns
///
/// `Ok(())` if valid, `Err(reason)` with a description of the failure.
#[must_use = "validation result must be checked before the reference is used"]
pub fn validate_image_ref(image: &str) -> std::result::Result<(), &'static str> {
    if image.is_empty() {
        return Err("image reference cannot be empty");
    }
    if image.len() > MAX_IMAGE_REF_LEN {
        return Err("image reference exceeds maximum length");
    }
    if !image.chars().all(|c| IMAGE_REF_VALID_CHARS.contains(c)) {
        return Err("image reference contains invalid characters");
    }
    Ok(())
}

/// Validates a container name.
#[inline]
#[must_use = "validation result must be checked to ensure the container name is safe"]
pub fn validate_container_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("container name cannot be empty");
    }
    if name.len() > MAX_CONTAINER_NAME_LEN {
        return Err("container name exceeds maximum length");
    }
    if !name.chars().all(|c| CONTAINER_NAME_VALID_CHARS.contains(c)) {
        return Err("container name contains invalid characters");
    }
    Ok(())
}
