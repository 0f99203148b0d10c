//! Artifact retrieval and log capture.

use crate::classify::{FailureContext, RuntimeOperation, classify, classify_io};
use crate::constants::MAX_LOG_BYTES;
use crate::error::{Error, Result};
use crate::orchestrator::ContainerHandle;
use crate::runtime::ContainerRuntime;
use crate::workspace::Workspace;
use std::sync::Arc;
use tracing::{debug, warn};

/// Reads what a finished container left behind.
#[derive(Clone)]
pub struct ResultReader {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ResultReader {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Reads the artifact of a container that exited with code 0.
    ///
    /// # Errors
    ///
    /// [`Error::ArtifactNotProduced`] (with captured logs) if the file is
    /// missing, empty or not a regular file.
    pub async fn read(&self, handle: &ContainerHandle, workspace: &Workspace) -> Result<Vec<u8>> {
        match workspace.read_artifact() {
            Ok(Some(bytes)) if !bytes.is_empty() => {
                debug!(container = %handle.id, bytes = bytes.len(), "artifact read");
                Ok(bytes)
            }
            Ok(_) => {
                let path = workspace.artifact_path();
                warn!(container = %handle.id, path = %path.display(), "no artifact produced");
                let logs = self.capture_logs(&handle.id).await;
                Err(Error::ArtifactNotProduced { path, logs })
            }
            Err(e) => {
                warn!(container = %handle.id, error = %e, "artifact read failed");
                Err(classify_io(
                    RuntimeOperation::ReadArtifact,
                    &e,
                    &FailureContext {
                        target: &handle.id,
                        ..Default::default()
                    },
                ))
            }
        }
    }

    /// Combined stdout/stderr of a container, keeping the last
    /// [`MAX_LOG_BYTES`]. Never fails: a placeholder is returned if the
    /// runtime cannot supply logs.
    pub async fn capture_logs(&self, id: &str) -> String {
        match self.runtime.logs(id).await {
            Ok(logs) => truncate_tail(&logs, MAX_LOG_BYTES).to_string(),
            Err(e) => {
                let classified = classify(
                    RuntimeOperation::Logs,
                    &e,
                    &FailureContext {
                        target: id,
                        ..Default::default()
                    },
                );
                warn!(container = id, kind = %classified.kind(), error = %classified, "log capture failed");
                format!("<logs unavailable: {e}>")
            }
        }
    }
}

/// Keeps at most the last `max` bytes of `s`, on a char boundary.
///
/// TeX reports the fatal error at the end of its log, so the tail is the
/// part worth keeping.
pub fn truncate_tail(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}
