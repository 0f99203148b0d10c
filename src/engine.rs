//! # Compilation Engine
//!
//! The public entry point. One [`CompilationEngine::compile`] call runs one
//! request through the full pipeline:
//!
//! ```text
//! Queued ─► Admitted ─► ImageReady ─► WorkspacePrepared ─► ContainerCreated
//!                                                                │
//!                                                                ▼
//!   Done ◄─ Cleaned ◄─ { Succeeded | Failed | TimedOut } ◄─ ContainerRunning
//! ```
//!
//! ## Resource Ownership
//!
//! Once a container exists, the request's permit, workspace and container
//! handle move into a single `RequestScope`. Closing the scope is the only
//! teardown path: stop and remove the container, delete the workspace, then
//! drop the permit. The slot is therefore never released while the
//! container still exists.
//!
//! On `Timeout` the scope is closed on a detached task with a zero stop
//! grace, so the caller gets its error without waiting for teardown. The
//! engine tracks those tasks; [`CompilationEngine::shutdown`] waits for
//! them and must be awaited before the tokio runtime is torn down.
//!
//! Every request runs on its own spawned task: dropping the future returned
//! by `compile` does not abort a pipeline halfway through cleanup.

use crate::admission::{AdmissionGate, AdmissionPermit};
use crate::classify::{FailureContext, RuntimeOperation, classify_io};
use crate::cleanup::{CleanupManager, CleanupReport};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::image::ImageProvisioner;
use crate::metrics::MetricsSink;
use crate::orchestrator::{ContainerHandle, ContainerOrchestrator};
use crate::result::ResultReader;
use crate::runtime::ContainerRuntime;
use crate::workspace::{Workspace, WorkspaceManager};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, warn};

/// Locale used when a request does not name one.
pub const DEFAULT_LOCALE: &str = "en";

/// One compilation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationRequest {
    /// Complete LaTeX source.
    pub source: String,
    /// Passed through to the toolchain environment.
    pub locale: String,
}

impl CompilationRequest {
    pub fn new(source: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            locale: locale.into(),
        }
    }
}

/// A successfully produced document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationResult {
    pdf: Vec<u8>,
    duration: Duration,
}

impl CompilationResult {
    /// The artifact bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.pdf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.pdf
    }

    pub fn len(&self) -> usize {
        self.pdf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pdf.is_empty()
    }

    /// Container run time, start to exit.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

/// Where a request is in the pipeline. Used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Queued,
    Admitted,
    ImageReady,
    WorkspacePrepared,
    ContainerCreated,
    ContainerRunning,
    Succeeded,
    Failed,
    TimedOut,
    Cleaned,
    Done,
}

impl RequestPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Admitted => "admitted",
            Self::ImageReady => "image_ready",
            Self::WorkspacePrepared => "workspace_prepared",
            Self::ContainerCreated => "container_created",
            Self::ContainerRunning => "container_running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Cleaned => "cleaned",
            Self::Done => "done",
        }
    }

    /// Terminal outcome phase for a pipeline result.
    fn outcome<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => Self::Succeeded,
            Err(Error::Timeout { .. }) => Self::TimedOut,
            Err(_) => Self::Failed,
        }
    }
}

impl std::fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn advance(phase: &mut RequestPhase, next: RequestPhase) {
    debug!(from = %phase, to = %next, "request phase");
    *phase = next;
}

/// Sandboxed LaTeX compilation service.
///
/// Cheap to clone; clones share the admission gate and image cache.
#[derive(Clone)]
pub struct CompilationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: Arc<EngineConfig>,
    runtime: Arc<dyn ContainerRuntime>,
    gate: AdmissionGate,
    images: ImageProvisioner,
    workspaces: WorkspaceManager,
    orchestrator: ContainerOrchestrator,
    reader: ResultReader,
    cleanup: CleanupManager,
    /// Detached teardowns of timed-out requests.
    pending: Mutex<JoinSet<()>>,
}

impl CompilationEngine {
    /// Builds an engine over an existing runtime.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] if the configuration fails validation.
    pub fn new(
        config: EngineConfig,
        runtime: Arc<dyn ContainerRuntime>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        info!(
            runtime = runtime.name(),
            image = %config.image,
            toolchain = %config.toolchain,
            max_concurrent = config.max_concurrent_containers,
            timeout = ?config.compile_timeout(),
            "compilation engine configured"
        );

        let inner = EngineInner {
            gate: AdmissionGate::new(config.max_concurrent_containers, Arc::clone(&metrics)),
            images: ImageProvisioner::new(Arc::clone(&runtime)),
            workspaces: WorkspaceManager::new(config.workspace_root.clone()),
            orchestrator: ContainerOrchestrator::new(
                Arc::clone(&runtime),
                Arc::clone(&metrics),
                Arc::clone(&config),
            ),
            reader: ResultReader::new(Arc::clone(&runtime)),
            cleanup: CleanupManager::new(Arc::clone(&runtime), metrics),
            pending: Mutex::new(JoinSet::new()),
            runtime,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Builds an engine over the Docker backend.
    pub fn connect(config: EngineConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;
        let runtime = crate::runtimes::connect(&config)?;
        Self::new(config, runtime, metrics)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Name of the backing runtime.
    pub fn runtime_name(&self) -> &str {
        self.inner.runtime.name()
    }

    /// Container slots currently held.
    pub fn in_use(&self) -> usize {
        self.inner.gate.in_use()
    }

    /// Container slots currently free.
    pub fn available(&self) -> usize {
        self.inner.gate.available()
    }

    /// Pulls the toolchain image ahead of the first request.
    pub async fn warm_up(&self) -> Result<()> {
        self.inner.images.ensure(&self.inner.config.image).await
    }

    /// Teardowns still running for timed-out requests.
    pub fn pending_cleanups(&self) -> usize {
        self.inner.lock_pending().len()
    }

    /// Waits for every detached teardown to finish.
    ///
    /// Call before the tokio runtime shuts down: a runtime that is dropped
    /// first cancels those tasks and leaves their containers behind.
    /// Requests may still be submitted afterwards.
    pub async fn shutdown(&self) {
        loop {
            let mut pending = std::mem::take(&mut *self.inner.lock_pending());
            if pending.is_empty() {
                return;
            }
            info!(count = pending.len(), "waiting for container cleanup");
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "cleanup task aborted");
                }
            }
        }
    }

    /// Compiles one document.
    ///
    /// # Errors
    ///
    /// Any [`Error`] variant except `InvalidConfig` and `CleanupFailure`.
    /// Runtime errors are always classified first.
    pub async fn compile(&self, request: CompilationRequest) -> Result<CompilationResult> {
        let request_id = uuid::Uuid::new_v4();
        let span = info_span!("compile", request = %request_id, locale = %request.locale);
        let inner = Arc::clone(&self.inner);

        let task = tokio::spawn(async move { inner.run(request).await }.instrument(span));
        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!(request = %request_id, error = %e, "compilation task aborted");
                Err(Error::Internal(format!("compilation task failed: {e}")))
            }
        }
    }
}

impl EngineInner {
    async fn run(self: Arc<Self>, request: CompilationRequest) -> Result<CompilationResult> {
        let mut phase = RequestPhase::Queued;

        let permit = self.gate.acquire(self.config.admission_timeout()).await?;
        advance(&mut phase, RequestPhase::Admitted);

        self.images.ensure(&self.config.image).await?;
        advance(&mut phase, RequestPhase::ImageReady);

        let workspace = self.prepare_workspace(&request.source)?;
        advance(&mut phase, RequestPhase::WorkspacePrepared);

        let name = ContainerOrchestrator::container_name();
        let handle = match self
            .orchestrator
            .create(&name, &workspace, &request.locale)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                // The runtime may have created it before failing.
                self.cleanup.discard(&name).await;
                workspace.destroy();
                return Err(e);
            }
        };
        advance(&mut phase, RequestPhase::ContainerCreated);

        let scope = RequestScope {
            handle,
            workspace,
            _permit: permit,
        };

        advance(&mut phase, RequestPhase::ContainerRunning);
        let result = match self.orchestrator.execute(&scope.handle).await {
            Ok(report) => self
                .reader
                .read(&scope.handle, &scope.workspace)
                .await
                .map(|pdf| CompilationResult {
                    pdf,
                    duration: report.duration,
                }),
            Err(e) => Err(e),
        };
        advance(&mut phase, RequestPhase::outcome(&result));

        if phase == RequestPhase::TimedOut {
            let cleanup = self.cleanup.clone();
            let mut pending = self.lock_pending();
            while pending.try_join_next().is_some() {}
            pending.spawn(
                async move {
                    scope.close(&cleanup, Duration::ZERO).await;
                    advance(&mut phase, RequestPhase::Cleaned);
                }
                .in_current_span(),
            );
            return result;
        }

        scope.close(&self.cleanup, self.config.stop_grace()).await;
        advance(&mut phase, RequestPhase::Cleaned);

        match &result {
            Ok(pdf) => info!(bytes = pdf.len(), duration = ?pdf.duration, "compilation succeeded"),
            Err(e) => info!(kind = %e.kind(), error = %e, "compilation failed"),
        }
        advance(&mut phase, RequestPhase::Done);
        result
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        // A poisoned set still holds live cleanups.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn prepare_workspace(&self, source: &str) -> Result<Workspace> {
        let ctx = FailureContext {
            target: "workspace",
            ..Default::default()
        };
        let workspace = self
            .workspaces
            .create()
            .map_err(|e| classify_io(RuntimeOperation::PrepareWorkspace, &e, &ctx))?;
        if let Err(e) = workspace.write_source(source) {
            workspace.destroy();
            return Err(classify_io(RuntimeOperation::PrepareWorkspace, &e, &ctx));
        }
        Ok(workspace)
    }
}

/// Everything one admitted request holds once its container exists.
struct RequestScope {
    handle: ContainerHandle,
    workspace: Workspace,
    _permit: AdmissionPermit,
}

impl RequestScope {
    /// Tears down in order: container, workspace, slot.
    async fn close(self, cleanup: &CleanupManager, grace: Duration) -> CleanupReport {
        let report = cleanup.cleanup(&self.handle, grace).await;
        if !report.is_complete() {
            warn!(
                container = %self.handle.name,
                stopped = report.stopped,
                removed = report.removed,
                "container cleanup incomplete"
            );
        }
        self.workspace.destroy();
        report
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        // Dropping a JoinSet aborts its tasks; let teardowns run to the end.
        let pending = self.pending.get_mut().unwrap_or_else(|e| e.into_inner());
        if !pending.is_empty() {
            warn!(count = pending.len(), "engine dropped with cleanups pending");
        }
        pending.detach_all();
    }
}
