//! Maps runtime failures onto the caller-visible taxonomy.
//!
//! | Operation               | Failure                 | Error                       |
//! |-------------------------|-------------------------|-----------------------------|
//! | container phase         | timeout (typed or text) | `Timeout`                   |
//! | `InspectImage`, `PullImage` | other               | `ImageUnavailable`          |
//! | `Create`, `Start`, `PrepareWorkspace` | other     | `ContainerCreationFailed`   |
//! | `Inspect`, `Logs`, `ReadArtifact` | other         | `ExecutionFailed` (no code) |
//! | `Stop`, `Remove`, `DeleteWorkspace` | other       | `CleanupFailure`            |

use crate::error::{Error, RuntimeError};
use std::time::Duration;

/// Step during which a runtime failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeOperation {
    InspectImage,
    PullImage,
    PrepareWorkspace,
    Create,
    Start,
    Inspect,
    Logs,
    ReadArtifact,
    Stop,
    Remove,
    DeleteWorkspace,
}

impl RuntimeOperation {
    /// Short name for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InspectImage => "inspect_image",
            Self::PullImage => "pull_image",
            Self::PrepareWorkspace => "prepare_workspace",
            Self::Create => "create_container",
            Self::Start => "start_container",
            Self::Inspect => "inspect_container",
            Self::Logs => "container_logs",
            Self::ReadArtifact => "read_artifact",
            Self::Stop => "stop_container",
            Self::Remove => "remove_container",
            Self::DeleteWorkspace => "delete_workspace",
        }
    }
}

impl std::fmt::Display for RuntimeOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Context attached to a classified failure.
#[derive(Debug, Clone, Default)]
pub struct FailureContext<'a> {
    /// Image or container the operation targeted.
    pub target: &'a str,
    /// Time spent on the request's container phase so far.
    pub elapsed: Duration,
    /// The request's compilation deadline.
    pub limit: Duration,
}

/// Classifies a runtime failure.
///
/// During the container phase timeouts win over the per-operation mapping,
/// so a runtime call that times out presents the same failure mode as the
/// poll loop's own deadline. Image and cleanup steps keep their own kinds:
/// the pull ceiling is not the compilation deadline, and cleanup failures
/// are never surfaced.
pub fn classify(op: RuntimeOperation, error: &RuntimeError, ctx: &FailureContext<'_>) -> Error {
    if error.is_timeout() && is_container_phase(op) {
        return Error::Timeout {
            elapsed: ctx.elapsed,
            limit: ctx.limit,
        };
    }
    classify_message(op, error.to_string(), ctx)
}

/// Classifies a local I/O failure.
pub fn classify_io(op: RuntimeOperation, error: &std::io::Error, ctx: &FailureContext<'_>) -> Error {
    classify_message(op, error.to_string(), ctx)
}

fn classify_message(op: RuntimeOperation, reason: String, ctx: &FailureContext<'_>) -> Error {
    match op {
        RuntimeOperation::InspectImage | RuntimeOperation::PullImage => Error::ImageUnavailable {
            image: ctx.target.to_string(),
            reason,
        },
        RuntimeOperation::PrepareWorkspace
        | RuntimeOperation::Create
        | RuntimeOperation::Start => Error::ContainerCreationFailed {
            reason: format!("{op}: {reason}"),
        },
        RuntimeOperation::Inspect | RuntimeOperation::Logs | RuntimeOperation::ReadArtifact => {
            Error::ExecutionFailed {
                exit_code: None,
                logs: format!("{op} failed: {reason}"),
            }
        }
        RuntimeOperation::Stop | RuntimeOperation::Remove | RuntimeOperation::DeleteWorkspace => {
            Error::CleanupFailure {
                target: ctx.target.to_string(),
                step: op.as_str(),
                reason,
            }
        }
    }
}

fn is_container_phase(op: RuntimeOperation) -> bool {
    matches!(
        op,
        RuntimeOperation::PrepareWorkspace
            | RuntimeOperation::Create
            | RuntimeOperation::Start
            | RuntimeOperation::Inspect
            | RuntimeOperation::Logs
            | RuntimeOperation::ReadArtifact
    )
}
