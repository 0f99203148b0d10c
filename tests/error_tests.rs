//! Tests for error types.
//!
//! Validates display formatting, kinds, and the user-facing disposition of
//! every failure.

use std::path::PathBuf;
use std::time::Duration;
use texrun::{Disposition, Error, ErrorKind, RuntimeError};

fn all_errors() -> Vec<Error> {
    vec![
        Error::ConcurrencyExhausted {
            waited: Duration::from_secs(35),
        },
        Error::ImageUnavailable {
            image: "texlive/texlive:latest".to_string(),
            reason: "pull access denied".to_string(),
        },
        Error::ContainerCreationFailed {
            reason: "invalid mount".to_string(),
        },
        Error::ExecutionFailed {
            exit_code: Some(1),
            logs: "! Emergency stop.".to_string(),
        },
        Error::ArtifactNotProduced {
            path: PathBuf::from("/tmp/texrun-x/document.pdf"),
            logs: "No pages of output.".to_string(),
        },
        Error::Timeout {
            elapsed: Duration::from_millis(30_050),
            limit: Duration::from_secs(30),
        },
        Error::CleanupFailure {
            target: "texrun-abc".to_string(),
            step: "remove_container",
            reason: "conflict".to_string(),
        },
        Error::InvalidConfig("timeout_seconds must be at least 1".to_string()),
        Error::Internal("task panicked".to_string()),
    ]
}

// =============================================================================
// Display Tests
// =============================================================================

#[test]
fn test_execution_failed_display_includes_code() {
    let err = Error::ExecutionFailed {
        exit_code: Some(1),
        logs: String::new(),
    };
    assert!(err.to_string().contains("exit code 1"));

    let err = Error::ExecutionFailed {
        exit_code: None,
        logs: String::new(),
    };
    assert!(!err.to_string().contains("exit code"));
}

#[test]
fn test_display_does_not_include_logs() {
    let err = Error::ExecutionFailed {
        exit_code: Some(1),
        logs: "secret source line".to_string(),
    };
    assert!(!err.to_string().contains("secret source line"));
}

#[test]
fn test_image_unavailable_names_image() {
    let err = Error::ImageUnavailable {
        image: "texlive/texlive:2024".to_string(),
        reason: "manifest unknown".to_string(),
    };
    let msg = err.to_string();
    assert!(msg.contains("texlive/texlive:2024"));
    assert!(msg.contains("manifest unknown"));
}

#[test]
fn test_all_errors_have_messages() {
    for err in all_errors() {
        assert!(!err.to_string().is_empty(), "{:?} has empty message", err.kind());
    }
}

// =============================================================================
// Classification Tests
// =============================================================================

#[test]
fn test_dispositions() {
    let expected = [
        (ErrorKind::ConcurrencyExhausted, Disposition::Retryable),
        (ErrorKind::ImageUnavailable, Disposition::OperatorAlert),
        (ErrorKind::ContainerCreationFailed, Disposition::OperatorAlert),
        (ErrorKind::ExecutionFailed, Disposition::GenerationFailed),
        (ErrorKind::ArtifactNotProduced, Disposition::GenerationFailed),
        (ErrorKind::Timeout, Disposition::Retryable),
        (ErrorKind::CleanupFailure, Disposition::Internal),
        (ErrorKind::InvalidConfig, Disposition::OperatorAlert),
        (ErrorKind::Internal, Disposition::Internal),
    ];
    let errors = all_errors();
    assert_eq!(errors.len(), expected.len());
    for (err, (kind, disposition)) in errors.iter().zip(expected) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.disposition(), disposition, "{kind}");
    }
}

#[test]
fn test_only_transient_errors_retryable() {
    let retryable: Vec<_> = all_errors()
        .into_iter()
        .filter(Error::is_retryable)
        .map(|e| e.kind())
        .collect();
    assert_eq!(
        retryable,
        vec![ErrorKind::ConcurrencyExhausted, ErrorKind::Timeout]
    );
}

#[test]
fn test_logs_only_on_generation_failures() {
    for err in all_errors() {
        let has_logs = err.logs().is_some();
        assert_eq!(
            has_logs,
            err.disposition() == Disposition::GenerationFailed,
            "{}",
            err.kind()
        );
    }
}

#[test]
fn test_kind_serializes_snake_case() {
    let json = serde_json::to_string(&ErrorKind::ArtifactNotProduced).unwrap();
    assert_eq!(json, "\"artifact_not_produced\"");
    assert_eq!(ErrorKind::Timeout.to_string(), "timeout");
}

// =============================================================================
// RuntimeError Tests
// =============================================================================

#[test]
fn test_runtime_not_found_detection() {
    assert!(RuntimeError::NotFound("x".to_string()).is_not_found());
    assert!(
        RuntimeError::Api {
            status: 404,
            message: "no such container".to_string()
        }
        .is_not_found()
    );
    assert!(
        !RuntimeError::Api {
            status: 500,
            message: "boom".to_string()
        }
        .is_not_found()
    );
}

#[test]
fn test_runtime_timeout_detection() {
    assert!(RuntimeError::Timeout("read".to_string()).is_timeout());
    assert!(RuntimeError::Transport("operation timed out".to_string()).is_timeout());
    assert!(
        RuntimeError::Api {
            status: 500,
            message: "Client.Timeout exceeded".to_string()
        }
        .is_timeout()
    );
    assert!(!RuntimeError::NotFound("timeout".to_string()).is_timeout());
    assert!(!RuntimeError::Transport("connection refused".to_string()).is_timeout());
}
