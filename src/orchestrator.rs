//! # Container Orchestration
//!
//! Builds the sandbox spec for one request, creates and starts the
//! container, and polls it to completion or deadline.
//!
//! ## Sandbox Contract
//!
//! Every container built here is:
//!
//! - read-only at the root filesystem
//! - capped at `memory_limit_mb` (no swap) and `cpu_quota` of one core
//! - without network
//! - given exactly one read-write bind mount: the request workspace at
//!   [`WORKSPACE_MOUNT_PATH`]
//! - left in place on exit (`auto_remove = false`); removal belongs to
//!   [`CleanupManager`]
//!
//! ## Execution
//!
//! ```text
//! create ──► start ──► inspect ─┬─ running, elapsed < timeout ─► sleep(poll) ─┐
//!   │          │          ▲     │                                            │
//!   │          │          └─────┼────────────────────────────────────────────┘
//!   │          │                ├─ running, elapsed ≥ timeout ─► Timeout
//!   │          │                └─ exited ─┬─ code 0 ─► ExecutionReport
//!   ▼          ▼                           └─ code ≠ 0 ─► logs ─► ExecutionFailed
//! created   started
//! ```
//!
//! The poll loop owns the deadline. The outer `safety_deadline` only
//! catches a runtime call that never returns.
//!
//! [`WORKSPACE_MOUNT_PATH`]: crate::constants::WORKSPACE_MOUNT_PATH
//! [`CleanupManager`]: crate::cleanup::CleanupManager

use crate::classify::{FailureContext, RuntimeOperation, classify};
use crate::config::EngineConfig;
use crate::constants::{
    CONTAINER_NAME_PREFIX, CONTAINER_POLL_INTERVAL, CPU_PERIOD_MICROS, LOCALE_ENV, LOCALE_LABEL,
    MANAGED_LABEL, SOURCE_FILE_NAME, TEXMF_VAR_DIR, WORKSPACE_MOUNT_PATH, validate_container_name,
};
use crate::error::{Error, Result};
use crate::metrics::{LifecycleEvent, MetricsSink};
use crate::result::ResultReader;
use crate::runtime::{BindMount, ContainerRuntime, ContainerSpec, ContainerState, ResourceLimits};
use crate::workspace::Workspace;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// One request's container. Owned by that request only.
#[derive(Debug, Clone)]
pub struct ContainerHandle {
    /// Runtime-assigned container ID.
    pub id: String,
    /// Container name (usable wherever the ID is).
    pub name: String,
    /// Host directory mounted into the container.
    pub workspace_dir: PathBuf,
    /// When the runtime accepted the container.
    pub created_at: DateTime<Utc>,
}

/// Outcome of a container that exited with code 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionReport {
    /// Always zero; kept for log context.
    pub exit_code: i64,
    /// From start to observed exit.
    pub duration: Duration,
}

/// Creates, starts and watches compilation containers.
pub struct ContainerOrchestrator {
    runtime: Arc<dyn ContainerRuntime>,
    metrics: Arc<dyn MetricsSink>,
    config: Arc<EngineConfig>,
    reader: ResultReader,
}

impl ContainerOrchestrator {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        metrics: Arc<dyn MetricsSink>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            reader: ResultReader::new(Arc::clone(&runtime)),
            runtime,
            metrics,
            config,
        }
    }

    /// Generates a fresh container name.
    pub fn container_name() -> String {
        format!("{CONTAINER_NAME_PREFIX}{}", uuid::Uuid::new_v4().simple())
    }

    /// Builds the sandbox spec for a workspace.
    pub fn build_spec(&self, name: &str, workspace_dir: &Path, locale: &str) -> ContainerSpec {
        let config = &self.config;
        let source = format!("{WORKSPACE_MOUNT_PATH}/{SOURCE_FILE_NAME}");

        let command = vec![
            config.toolchain.program().to_string(),
            "-interaction=nonstopmode".to_string(),
            "-halt-on-error".to_string(),
            "-no-shell-escape".to_string(),
            format!("-output-directory={WORKSPACE_MOUNT_PATH}"),
            source,
        ];

        let env = vec![
            ("HOME".to_string(), WORKSPACE_MOUNT_PATH.to_string()),
            (
                "TEXMFVAR".to_string(),
                format!("{WORKSPACE_MOUNT_PATH}/{TEXMF_VAR_DIR}"),
            ),
            (LOCALE_ENV.to_string(), locale.to_string()),
        ];

        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        labels.insert(LOCALE_LABEL.to_string(), locale.to_string());

        ContainerSpec {
            name: name.to_string(),
            image: config.image.clone(),
            command,
            env,
            working_dir: WORKSPACE_MOUNT_PATH.to_string(),
            mount: BindMount {
                host_path: workspace_dir.to_path_buf(),
                container_path: WORKSPACE_MOUNT_PATH.to_string(),
                read_only: false,
            },
            limits: ResourceLimits::from_fraction(
                config.memory_limit_mb,
                config.cpu_quota,
                CPU_PERIOD_MICROS,
                config.pids_limit,
            ),
            read_only_rootfs: true,
            network_disabled: true,
            auto_remove: false,
            user: config.container_user.clone(),
            labels,
        }
    }

    /// Creates (but does not start) the container for a workspace.
    ///
    /// # Errors
    ///
    /// [`Error::ContainerCreationFailed`] if the runtime rejects the spec,
    /// or [`Error::Timeout`] if the runtime reports a timeout.
    pub async fn create(
        &self,
        name: &str,
        workspace: &Workspace,
        locale: &str,
    ) -> Result<ContainerHandle> {
        validate_container_name(name).map_err(|reason| Error::ContainerCreationFailed {
            reason: format!("container name '{name}': {reason}"),
        })?;

        let spec = self.build_spec(name, workspace.path(), locale);
        let started = Instant::now();
        let id = self.runtime.create(&spec).await.map_err(|e| {
            warn!(container = name, error = %e, "container create failed");
            classify(
                RuntimeOperation::Create,
                &e,
                &FailureContext {
                    target: name,
                    elapsed: started.elapsed(),
                    limit: self.config.compile_timeout(),
                },
            )
        })?;

        self.metrics.record_event(LifecycleEvent::Created);
        debug!(container = %id, name, image = %spec.image, "container created");

        Ok(ContainerHandle {
            id,
            name: name.to_string(),
            workspace_dir: workspace.path().to_path_buf(),
            created_at: Utc::now(),
        })
    }

    /// Starts the container and waits for it to exit or time out.
    ///
    /// The caller owns cleanup on every outcome, including `Timeout`.
    pub async fn execute(&self, handle: &ContainerHandle) -> Result<ExecutionReport> {
        let limit = self.config.compile_timeout();
        let safety = self.config.safety_deadline();
        let started = Instant::now();

        match tokio::time::timeout(safety, self.start_and_wait(handle, started)).await {
            Ok(result) => result,
            Err(_elapsed) => {
                warn!(container = %handle.id, ?safety, "runtime call exceeded safety deadline");
                self.metrics.record_event(LifecycleEvent::TimedOut);
                Err(Error::Timeout {
                    elapsed: started.elapsed(),
                    limit,
                })
            }
        }
    }

    async fn start_and_wait(
        &self,
        handle: &ContainerHandle,
        started: Instant,
    ) -> Result<ExecutionReport> {
        let limit = self.config.compile_timeout();

        if let Err(e) = self.runtime.start(&handle.id).await {
            warn!(container = %handle.id, error = %e, "container start failed");
            let err = classify(RuntimeOperation::Start, &e, &self.context(handle, started));
            self.record_failure(&err);
            return Err(err);
        }
        self.metrics.record_event(LifecycleEvent::Started);
        debug!(container = %handle.id, "container started");

        loop {
            let state = match self.runtime.inspect(&handle.id).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(container = %handle.id, error = %e, "container inspect failed");
                    let err = classify(RuntimeOperation::Inspect, &e, &self.context(handle, started));
                    self.record_failure(&err);
                    return Err(err);
                }
            };

            if !state.is_running() {
                return self.finish(handle, state, started.elapsed()).await;
            }

            let elapsed = started.elapsed();
            if elapsed >= limit {
                warn!(container = %handle.id, ?elapsed, ?limit, "compilation timed out");
                self.metrics.record_event(LifecycleEvent::TimedOut);
                return Err(Error::Timeout { elapsed, limit });
            }

            tokio::time::sleep(CONTAINER_POLL_INTERVAL.min(limit - elapsed)).await;
        }
    }

    async fn finish(
        &self,
        handle: &ContainerHandle,
        state: ContainerState,
        duration: Duration,
    ) -> Result<ExecutionReport> {
        match state.exit_code {
            Some(0) => {
                self.metrics.record_event(LifecycleEvent::Completed);
                self.metrics.record_execution(duration);
                info!(container = %handle.id, ?duration, "compilation exited successfully");
                Ok(ExecutionReport {
                    exit_code: 0,
                    duration,
                })
            }
            exit_code => {
                let mut logs = self.reader.capture_logs(&handle.id).await;
                if state.oom_killed {
                    logs.push_str(&format!(
                        "\n[texrun] container killed: memory limit of {} MiB exceeded\n",
                        self.config.memory_limit_mb
                    ));
                }
                self.metrics.record_event(LifecycleEvent::Failed);
                info!(
                    container = %handle.id,
                    ?exit_code,
                    status = %state.status,
                    oom_killed = state.oom_killed,
                    "compilation failed"
                );
                Err(Error::ExecutionFailed { exit_code, logs })
            }
        }
    }

    fn context<'a>(&self, handle: &'a ContainerHandle, started: Instant) -> FailureContext<'a> {
        FailureContext {
            target: &handle.id,
            elapsed: started.elapsed(),
            limit: self.config.compile_timeout(),
        }
    }

    fn record_failure(&self, err: &Error) {
        match err {
            Error::Timeout { .. } => self.metrics.record_event(LifecycleEvent::TimedOut),
            Error::ExecutionFailed { .. } => self.metrics.record_event(LifecycleEvent::Failed),
            _ => {}
        }
    }
}
