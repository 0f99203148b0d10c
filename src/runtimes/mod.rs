//! Container runtime backends.
//!
//! Each backend implements [`ContainerRuntime`] for one container engine.

pub mod docker;

pub use self::docker::DockerRuntime;

use crate::config::EngineConfig;
use crate::error::Result;
use crate::runtime::ContainerRuntime;
use std::sync::Arc;

/// Connects the default backend for a configuration.
pub fn connect(config: &EngineConfig) -> Result<Arc<dyn ContainerRuntime>> {
    Ok(Arc::new(DockerRuntime::connect(config)?))
}
