//! # Docker Runtime - Container Engine over the Local Control Socket
//!
//! Implements [`ContainerRuntime`] with `bollard`, talking to the Docker
//! (or Podman-compatible) engine API over its Unix socket.
//!
//! ## Connection Sharing
//!
//! A single [`bollard::Docker`] client is shared by all requests. It wraps
//! one hyper connection pool with no per-host connection cap, so concurrent
//! requests never queue behind each other inside the client; the only
//! concurrency ceiling is the engine's admission gate.
//!
//! ## Security Contract
//!
//! [`create_body`] translates a [`ContainerSpec`] into the engine's create
//! body. The mapping is one-to-one for the sandbox constraints:
//!
//! | Spec field          | HostConfig / body field                  |
//! |---------------------|------------------------------------------|
//! | `read_only_rootfs`  | `readonly_rootfs`                        |
//! | `limits.memory_bytes` | `memory`, `memory_swap` (no swap)      |
//! | `limits.cpu_*`      | `cpu_period`, `cpu_quota`                |
//! | `network_disabled`  | `network_disabled`, `network_mode=none`  |
//! | `mount`             | `binds` (exactly one entry)              |
//! | `auto_remove`       | `auto_remove`                            |
//!
//! All capabilities are dropped and `no-new-privileges` is set on top.
//!
//! ## Error Mapping
//!
//! | bollard error                        | [`RuntimeError`]      |
//! |--------------------------------------|-----------------------|
//! | server error, status 404             | `NotFound`            |
//! | server error, other status           | `Api`                 |
//! | `RequestTimeoutError`                | `Timeout`             |
//! | anything else                        | `Transport`           |
//!
//! [`ContainerRuntime`]: crate::runtime::ContainerRuntime

use crate::config::EngineConfig;
use crate::constants::MAX_LOG_BYTES;
use crate::error::{Error, Result, RuntimeError};
use crate::runtime::{
    ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ImageInfo, RuntimeResult,
};
use async_trait::async_trait;
use bollard::errors::Error as BollardError;
use bollard::models::{ContainerCreateBody, ContainerStateStatusEnum, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptionsBuilder, CreateImageOptionsBuilder, InspectContainerOptions,
    LogsOptionsBuilder, RemoveContainerOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use bollard::{API_DEFAULT_VERSION, Docker};
use futures_util::{StreamExt, TryStreamExt};
use std::time::Duration;
use tracing::{debug, info};

/// Per-request HTTP timeout on the control socket, in seconds.
///
/// Must exceed the longest graceful stop so `stop` is not cut short.
const DOCKER_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Docker runtime backend.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects using the socket from the config, or local defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the client cannot be built. No
    /// request is sent; an unreachable daemon surfaces on first use.
    pub fn connect(config: &EngineConfig) -> Result<Self> {
        let docker = match &config.docker_socket {
            Some(path) => {
                let path = path.to_string_lossy();
                Docker::connect_with_socket(&path, DOCKER_REQUEST_TIMEOUT_SECS, API_DEFAULT_VERSION)
            }
            None => Docker::connect_with_local_defaults(),
        }
        .map_err(|e| Error::InvalidConfig(format!("cannot connect to container engine: {e}")))?;

        info!(socket = ?config.docker_socket, "docker runtime client ready");
        Ok(Self { docker })
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    fn name(&self) -> &str {
        "docker"
    }

    async fn inspect_image(&self, image: &str) -> RuntimeResult<Option<ImageInfo>> {
        match self.docker.inspect_image(image).await {
            Ok(inspect) => Ok(Some(ImageInfo {
                id: inspect.id.unwrap_or_default(),
                size: inspect.size.and_then(|s| u64::try_from(s).ok()),
            })),
            Err(e) => match map_error(e) {
                RuntimeError::NotFound(_) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        let (from_image, tag) = split_image_ref(image);
        debug!(image, from_image, tag, "pulling image");
        self.docker
            .create_image(
                Some(
                    CreateImageOptionsBuilder::new()
                        .from_image(from_image)
                        .tag(tag)
                        .build(),
                ),
                None,
                None,
            )
            .try_collect::<Vec<_>>()
            .await
            .map_err(map_error)?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        let response = self
            .docker
            .create_container(
                Some(CreateContainerOptionsBuilder::new().name(&spec.name).build()),
                create_body(spec),
            )
            .await
            .map_err(map_error)?;
        for warning in &response.warnings {
            debug!(container = %spec.name, warning = %warning, "create warning");
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await
            .map_err(map_error)
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(map_error)?;

        let state = inspect.state.unwrap_or_default();
        let status = match state.status {
            Some(status) => map_status(status),
            None if state.running.unwrap_or(false) => ContainerStatus::Running,
            None => ContainerStatus::Exited,
        };
        let exit_code = if status.is_active() {
            None
        } else {
            state.exit_code
        };
        Ok(ContainerState {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            status,
            exit_code,
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn stop(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        let seconds = i32::try_from(grace.as_secs()).unwrap_or(i32::MAX);
        match self
            .docker
            .stop_container(id, Some(StopContainerOptionsBuilder::new().t(seconds).build()))
            .await
        {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(BollardError::DockerResponseServerError {
                status_code: 304, ..
            }) => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn remove(&self, id: &str, force: bool) -> RuntimeResult<()> {
        self.docker
            .remove_container(
                id,
                Some(
                    RemoveContainerOptionsBuilder::new()
                        .force(force)
                        .v(true)
                        .build(),
                ),
            )
            .await
            .map_err(map_error)
    }

    async fn logs(&self, id: &str) -> RuntimeResult<String> {
        let mut stream = self.docker.logs(
            id,
            Some(
                LogsOptionsBuilder::new()
                    .stdout(true)
                    .stderr(true)
                    .follow(false)
                    .tail(&LOG_TAIL_LINES.to_string())
                    .build(),
            ),
        );

        let mut tail = LogTail::new(MAX_LOG_BYTES);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_error)?;
            tail.push(&chunk.into_bytes());
        }
        Ok(tail.into_string())
    }
}

/// Lines requested from the engine; the byte cap below still applies.
const LOG_TAIL_LINES: usize = 2000;

/// Keeps the last `cap` bytes of a byte stream.
#[derive(Debug)]
pub(crate) struct LogTail {
    buf: Vec<u8>,
    cap: usize,
}

impl LogTail {
    pub(crate) fn new(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
            cap,
        }
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) {
        let bytes = &bytes[bytes.len().saturating_sub(self.cap)..];
        let overflow = (self.buf.len() + bytes.len()).saturating_sub(self.cap);
        self.buf.drain(..overflow);
        self.buf.extend_from_slice(bytes);
    }

    /// Decodes the tail, dropping a UTF-8 sequence cut at the front.
    pub(crate) fn into_string(self) -> String {
        let start = self
            .buf
            .iter()
            .take(3)
            .take_while(|b| (**b & 0xC0) == 0x80)
            .count();
        String::from_utf8_lossy(&self.buf[start..]).into_owned()
    }
}

// =============================================================================
// Spec Translation
// =============================================================================

/// Builds the engine create body for a spec.
pub fn create_body(spec: &ContainerSpec) -> ContainerCreateBody {
    let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();

    ContainerCreateBody {
        image: Some(spec.image.clone()),
        cmd: Some(spec.command.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        working_dir: Some(spec.working_dir.clone()),
        user: spec.user.clone(),
        labels: Some(spec.labels.clone()),
        network_disabled: Some(spec.network_disabled),
        attach_stdin: Some(false),
        attach_stdout: Some(false),
        attach_stderr: Some(false),
        tty: Some(false),
        open_stdin: Some(false),
        host_config: Some(HostConfig {
            binds: Some(vec![spec.mount.to_bind_string()]),
            readonly_rootfs: Some(spec.read_only_rootfs),
            memory: Some(spec.limits.memory_bytes),
            memory_swap: Some(spec.limits.memory_bytes),
            cpu_period: Some(spec.limits.cpu_period),
            cpu_quota: Some(spec.limits.cpu_quota),
            pids_limit: Some(spec.limits.pids_limit),
            network_mode: if spec.network_disabled {
                Some("none".to_string())
            } else {
                None
            },
            auto_remove: Some(spec.auto_remove),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            ..HostConfig::default()
        }),
        ..ContainerCreateBody::default()
    }
}

/// Splits `repo[:tag]` for the pull API. Digest references pass through
/// whole with an empty tag.
pub fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    // A colon before the last slash belongs to a registry port.
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => (&image[..name_start + i], &image[name_start + i + 1..]),
        None => (image, "latest"),
    }
}

fn map_status(status: ContainerStateStatusEnum) -> ContainerStatus {
    match status {
        ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
        ContainerStateStatusEnum::RUNNING => ContainerStatus::Running,
        ContainerStateStatusEnum::PAUSED => ContainerStatus::Paused,
        ContainerStateStatusEnum::RESTARTING => ContainerStatus::Restarting,
        ContainerStateStatusEnum::REMOVING => ContainerStatus::Removing,
        ContainerStateStatusEnum::EXITED => ContainerStatus::Exited,
        ContainerStateStatusEnum::DEAD => ContainerStatus::Dead,
        ContainerStateStatusEnum::EMPTY => ContainerStatus::Created,
    }
}

fn map_error(error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404,
            message,
        } => RuntimeError::NotFound(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Api {
            status: status_code,
            message,
        },
        BollardError::RequestTimeoutError => {
            RuntimeError::Timeout("request to container engine timed out".to_string())
        }
        other => RuntimeError::Transport(other.to_string()),
    }
}
