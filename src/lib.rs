//! # texrun
//!
//! **Sandboxed LaTeX to PDF Compilation Engine**
//!
//! Compiles untrusted LaTeX source into a PDF by running the TeX toolchain
//! inside a short-lived, locked-down container. Each request gets its own
//! container and its own workspace directory; nothing is shared between
//! requests except the toolchain image.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        CompilationEngine                            │
//! │   compile(source, locale) → PDF bytes | classified Error            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  AdmissionGate ─► ImageProvisioner ─► WorkspaceManager              │
//! │        │                                     │                      │
//! │        ▼                                     ▼                      │
//! │  ContainerOrchestrator ─► ResultReader ─► CleanupManager            │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                    ContainerRuntime Trait                           │
//! │   inspect_image / pull_image / create / start / inspect /           │
//! │   stop / remove / logs                                              │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │                        DockerRuntime                                │
//! │                 (bollard, local socket)                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Security Model
//!
//! Source text is treated as hostile. Every container is:
//!
//! | Control             | Setting                                    |
//! |---------------------|--------------------------------------------|
//! | Root filesystem     | read-only                                  |
//! | Network             | none                                       |
//! | Memory              | `memory_limit_mb`, no swap                 |
//! | CPU                 | `cpu_quota` of one core                    |
//! | Processes           | `pids_limit`                               |
//! | Capabilities        | all dropped, `no-new-privileges`           |
//! | Writable paths      | the request workspace only                 |
//! | Shell escape        | disabled on the toolchain command line     |
//! | Wall clock          | `timeout_seconds`, then killed             |
//!
//! # Failure Taxonomy
//!
//! Callers only ever see [`Error`]. Its [`Disposition`] says whether to
//! retry, report a document error, or page an operator.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use texrun::{CompilationEngine, CompilationRequest, EngineConfig, NoopMetrics};
//!
//! #[tokio::main]
//! async fn main() -> texrun::Result<()> {
//!     let config = EngineConfig::default().with_env_overrides()?;
//!     let engine = CompilationEngine::connect(config, Arc::new(NoopMetrics))?;
//!
//!     let source = r"\documentclass{article}\begin{document}Hi\end{document}";
//!     let pdf = engine.compile(CompilationRequest::new(source, "en")).await?;
//!     std::fs::write("out.pdf", pdf.bytes()).ok();
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod classify;
pub mod cleanup;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod image;
pub mod metrics;
pub mod orchestrator;
pub mod result;
pub mod runtime;
pub mod workspace;

pub mod runtimes;

// Re-exports
pub use admission::{AdmissionGate, AdmissionPermit};
pub use cleanup::{CleanupManager, CleanupReport};
pub use config::{EngineConfig, Toolchain};
pub use constants::*;
pub use engine::{CompilationEngine, CompilationRequest, CompilationResult, RequestPhase};
pub use error::{Disposition, Error, ErrorKind, Result, RuntimeError};
pub use image::ImageProvisioner;
pub use metrics::{InMemoryMetrics, LifecycleEvent, MetricsSink, MetricsSnapshot, NoopMetrics};
pub use orchestrator::{ContainerHandle, ContainerOrchestrator, ExecutionReport};
pub use result::ResultReader;
pub use runtime::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ImageInfo,
    ResourceLimits, RuntimeResult,
};
pub use runtimes::DockerRuntime;
pub use workspace::{Workspace, WorkspaceManager};
