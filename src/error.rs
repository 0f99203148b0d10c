//! Error types for the compilation engine.
//!
//! Two layers:
//!
//! - [`RuntimeError`] is what a [`ContainerRuntime`] backend reports. It is
//!   internal to the engine.
//! - [`Error`] is the caller-visible taxonomy. [`crate::classify`] converts
//!   every runtime failure into one of its variants, so raw runtime errors
//!   never leave [`CompilationEngine::compile`].
//!
//! [`ContainerRuntime`]: crate::runtime::ContainerRuntime
//! [`CompilationEngine::compile`]: crate::engine::CompilationEngine::compile

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Caller-visible failures of a compilation request.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Admission
    // =========================================================================
    /// No container slot freed up within the admission timeout.
    #[error("no compilation slot available after waiting {waited:?}")]
    ConcurrencyExhausted { waited: Duration },

    // =========================================================================
    // Image
    // =========================================================================
    /// Image absent locally and the pull failed.
    #[error("image '{image}' unavailable: {reason}")]
    ImageUnavailable { image: String, reason: String },

    // =========================================================================
    // Container Lifecycle
    // =========================================================================
    /// The runtime rejected the container spec, or the sandbox could not be
    /// prepared.
    #[error("failed to create compilation container: {reason}")]
    ContainerCreationFailed { reason: String },

    /// The toolchain exited non-zero (or its state became unobservable).
    #[error("compilation failed{}", exit_code_suffix(*exit_code))]
    ExecutionFailed {
        exit_code: Option<i64>,
        logs: String,
    },

    /// Exit code 0 but the artifact file is missing.
    #[error("compilation exited successfully but produced no artifact at {}", path.display())]
    ArtifactNotProduced { path: PathBuf, logs: String },

    /// Compilation exceeded its deadline.
    #[error("compilation timed out after {elapsed:?} (limit {limit:?})")]
    Timeout { elapsed: Duration, limit: Duration },

    /// Stop/remove/delete failed. Logged only, never returned from `compile`.
    #[error("cleanup of {target} failed during {step}: {reason}")]
    CleanupFailure {
        target: String,
        step: &'static str,
        reason: String,
    },

    // =========================================================================
    // Startup / Internal
    // =========================================================================
    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Engine task panicked or was aborted.
    #[error("internal error: {0}")]
    Internal(String),
}

fn exit_code_suffix(exit_code: Option<i64>) -> String {
    match exit_code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

/// Fieldless discriminant of [`Error`], used as a log and metrics label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConcurrencyExhausted,
    ImageUnavailable,
    ContainerCreationFailed,
    ExecutionFailed,
    ArtifactNotProduced,
    Timeout,
    CleanupFailure,
    InvalidConfig,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConcurrencyExhausted => "concurrency_exhausted",
            Self::ImageUnavailable => "image_unavailable",
            Self::ContainerCreationFailed => "container_creation_failed",
            Self::ExecutionFailed => "execution_failed",
            Self::ArtifactNotProduced => "artifact_not_produced",
            Self::Timeout => "timeout",
            Self::CleanupFailure => "cleanup_failure",
            Self::InvalidConfig => "invalid_config",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// How the surrounding application should surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Transient; respond 5xx with a retry hint.
    Retryable,
    /// The document did not compile; respond with a generic failure and do
    /// not leak logs.
    GenerationFailed,
    /// Needs an operator (image or container configuration is broken).
    OperatorAlert,
    /// Not expected in normal operation.
    Internal,
}

impl Error {
    /// Returns the fieldless kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConcurrencyExhausted { .. } => ErrorKind::ConcurrencyExhausted,
            Self::ImageUnavailable { .. } => ErrorKind::ImageUnavailable,
            Self::ContainerCreationFailed { .. } => ErrorKind::ContainerCreationFailed,
            Self::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            Self::ArtifactNotProduced { .. } => ErrorKind::ArtifactNotProduced,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::CleanupFailure { .. } => ErrorKind::CleanupFailure,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Maps the error to its user-facing treatment.
    pub fn disposition(&self) -> Disposition {
        match self.kind() {
            ErrorKind::ConcurrencyExhausted | ErrorKind::Timeout => Disposition::Retryable,
            ErrorKind::ExecutionFailed | ErrorKind::ArtifactNotProduced => {
                Disposition::GenerationFailed
            }
            ErrorKind::ImageUnavailable
            | ErrorKind::ContainerCreationFailed
            | ErrorKind::InvalidConfig => Disposition::OperatorAlert,
            ErrorKind::CleanupFailure | ErrorKind::Internal => Disposition::Internal,
        }
    }

    /// Returns true if the same request may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        self.disposition() == Disposition::Retryable
    }

    /// Captured toolchain logs, if this failure carries any.
    pub fn logs(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { logs, .. } | Self::ArtifactNotProduced { logs, .. } => {
                Some(logs.as_str())
            }
            _ => None,
        }
    }
}

/// Failure reported by a [`ContainerRuntime`] backend.
///
/// [`ContainerRuntime`]: crate::runtime::ContainerRuntime
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuntimeError {
    /// Container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The runtime answered with an error status.
    #[error("runtime API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The call to the runtime timed out.
    #[error("runtime request timed out: {0}")]
    Timeout(String),

    /// The runtime could not be reached or the response was unreadable.
    #[error("runtime transport error: {0}")]
    Transport(String),
}

impl RuntimeError {
    /// Returns true if the runtime reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Api { status: 404, .. })
    }

    /// Returns true if this failure is a timeout, either typed or inferred
    /// from the message text.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::NotFound(_) => false,
            Self::Api { message, .. } | Self::Transport(message) => {
                let lower = message.to_ascii_lowercase();
                lower.contains("timed out") || lower.contains("timeout")
            }
        }
    }
}
