//! Container runtime port.
//!
//! This trait is the engine's only view of the container engine:
//! - `inspect_image` / `pull_image`: local image cache
//! - `create` / `start`: bring up one sandbox from a [`ContainerSpec`]
//! - `inspect`: observe status and exit code
//! - `stop` / `remove`: tear down
//! - `logs`: diagnostics after failure
//!
//! The Docker backend lives in [`crate::runtimes::docker`]. Tests drive the
//! engine through an in-process implementation of the same trait.

use crate::error::RuntimeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Result type for runtime backend calls.
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

// =============================================================================
// Container State
// =============================================================================

/// Coarse container status as reported by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Process is running.
    Running,
    /// Paused by the runtime.
    Paused,
    /// Restarting (never expected, restart policy is `no`).
    Restarting,
    /// Being removed.
    Removing,
    /// Process has exited.
    Exited,
    /// Runtime gave up on the container.
    Dead,
}

impl ContainerStatus {
    /// Returns true while the toolchain may still be making progress.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Created | Self::Running | Self::Paused | Self::Restarting)
    }
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
        }
    }
}

/// Snapshot of a container returned by [`ContainerRuntime::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerState {
    /// Container ID.
    pub id: String,
    /// Container status.
    pub status: ContainerStatus,
    /// Exit code of the main process, once exited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i64>,
    /// Whether the kernel OOM killer terminated the process.
    #[serde(default)]
    pub oom_killed: bool,
}

impl ContainerState {
    /// Creates a state with no exit code.
    pub fn new(id: impl Into<String>, status: ContainerStatus) -> Self {
        Self {
            id: id.into(),
            status,
            exit_code: None,
            oom_killed: false,
        }
    }

    /// Creates an exited state.
    pub fn exited(id: impl Into<String>, exit_code: i64) -> Self {
        Self {
            exit_code: Some(exit_code),
            ..Self::new(id, ContainerStatus::Exited)
        }
    }

    /// Returns true if the container is still running.
    pub fn is_running(&self) -> bool {
        self.status.is_active()
    }
}

/// Local image metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    /// Image ID (content digest).
    pub id: String,
    /// Size in bytes, if the runtime reports it.
    pub size: Option<u64>,
}

// =============================================================================
// Container Spec
// =============================================================================

/// Host directory exposed inside the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute host path.
    pub host_path: PathBuf,
    /// Absolute in-container path.
    pub container_path: String,
    /// Mount read-only.
    pub read_only: bool,
}

impl BindMount {
    /// Renders the `host:container:mode` form used by the Docker API.
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!(
            "{}:{}:{}",
            self.host_path.display(),
            self.container_path,
            mode
        )
    }
}

/// Resource caps for one container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    /// Hard memory limit in bytes (swap disabled).
    pub memory_bytes: i64,
    /// CFS period in microseconds.
    pub cpu_period: i64,
    /// CFS quota in microseconds per period.
    pub cpu_quota: i64,
    /// Maximum number of processes.
    pub pids_limit: i64,
}

impl ResourceLimits {
    /// Expresses a fraction of one core as a quota/period pair.
    ///
    /// Out-of-range values saturate instead of wrapping.
    pub fn from_fraction(memory_mb: u64, cpu_fraction: f64, period: i64, pids_limit: i64) -> Self {
        let quota = ((cpu_fraction * period as f64).round() as i64).max(1000);
        let memory_bytes = i64::try_from(memory_mb)
            .unwrap_or(i64::MAX)
            .saturating_mul(1024 * 1024);
        Self {
            memory_bytes,
            cpu_period: period,
            cpu_quota: quota,
            pids_limit,
        }
    }
}

/// Everything the runtime needs to create one sandbox.
///
/// The security fields are not optional: every spec built by the engine is
/// read-only, networkless and not auto-removed.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    /// Container name.
    pub name: String,
    /// Image reference.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Environment as `(key, value)` pairs.
    pub env: Vec<(String, String)>,
    /// Working directory inside the container.
    pub working_dir: String,
    /// The single workspace mount.
    pub mount: BindMount,
    /// Resource caps.
    pub limits: ResourceLimits,
    /// Mount the root filesystem read-only.
    pub read_only_rootfs: bool,
    /// Disable all networking.
    pub network_disabled: bool,
    /// Let the runtime remove the container on exit.
    pub auto_remove: bool,
    /// Run as this user instead of the image default.
    pub user: Option<String>,
    /// Container labels.
    pub labels: HashMap<String, String>,
}

// =============================================================================
// Container Runtime Trait
// =============================================================================

/// Minimal container-engine interface used by the compilation engine.
///
/// # Lifecycle
///
/// ```text
/// create(spec) → start(id) → inspect(id)* → [logs(id)] → stop(id) → remove(id)
/// ```
///
/// Implementations are shared across concurrent requests and must be
/// `Send + Sync`.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Returns the backend name.
    fn name(&self) -> &str;

    /// Looks up an image in the local cache. `Ok(None)` if absent.
    async fn inspect_image(&self, image: &str) -> RuntimeResult<Option<ImageInfo>>;

    /// Pulls an image into the local cache, blocking until done.
    async fn pull_image(&self, image: &str) -> RuntimeResult<()>;

    /// Creates (but does not start) a container. Returns its ID.
    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String>;

    /// Starts a created container.
    async fn start(&self, id: &str) -> RuntimeResult<()>;

    /// Reads the current state of a container.
    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState>;

    /// Stops a container, killing it after `grace`.
    ///
    /// Stopping an already-stopped container succeeds.
    async fn stop(&self, id: &str, grace: Duration) -> RuntimeResult<()>;

    /// Removes a container. With `force`, a running container is killed first.
    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()>;

    /// Returns combined stdout/stderr of a container.
    async fn logs(&self, id: &str) -> RuntimeResult<String>;
}
