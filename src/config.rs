//! Engine configuration.
//!
//! Loaded once at startup from YAML (plus `TEXRUN_*` environment
//! overrides), validated, then shared read-only by every request.
//!
//! ```yaml
//! image: texlive/texlive:latest
//! max_concurrent_containers: 4
//! timeout_seconds: 30
//! memory_limit_mb: 512
//! cpu_quota: 1.0
//! toolchain: xelatex
//! ```

use crate::constants::{
    DEFAULT_ADMISSION_BUFFER_SECONDS, DEFAULT_PIDS_LIMIT, DEFAULT_STOP_GRACE_SECONDS,
    MAX_MEMORY_LIMIT_MB, MAX_TIMEOUT_SECONDS, MIN_MEMORY_LIMIT_MB, validate_image_ref,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// LaTeX engine invoked inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Toolchain {
    #[default]
    Pdflatex,
    Xelatex,
    Lualatex,
}

impl Toolchain {
    /// Executable name inside the image.
    pub fn program(&self) -> &'static str {
        match self {
            Self::Pdflatex => "pdflatex",
            Self::Xelatex => "xelatex",
            Self::Lualatex => "lualatex",
        }
    }
}

impl std::fmt::Display for Toolchain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

impl std::str::FromStr for Toolchain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pdflatex" => Ok(Self::Pdflatex),
            "xelatex" => Ok(Self::Xelatex),
            "lualatex" => Ok(Self::Lualatex),
            other => Err(Error::InvalidConfig(format!("unknown toolchain '{other}'"))),
        }
    }
}

/// Immutable engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Toolchain image to run.
    pub image: String,
    /// Admission ceiling on simultaneously running containers.
    pub max_concurrent_containers: usize,
    /// Per-compilation deadline.
    pub timeout_seconds: u64,
    /// Container memory cap.
    pub memory_limit_mb: u64,
    /// Fraction of one CPU core.
    pub cpu_quota: f64,
    /// LaTeX engine.
    pub toolchain: Toolchain,
    /// Container engine socket; local defaults when unset.
    pub docker_socket: Option<PathBuf>,
    /// Parent directory for per-request workspaces; system temp dir when unset.
    pub workspace_root: Option<PathBuf>,
    /// `uid[:gid]` to run the toolchain as.
    pub container_user: Option<String>,
    /// Graceful stop window during cleanup.
    pub stop_grace_seconds: u64,
    /// Slack on top of `timeout_seconds` for admission waits and the
    /// outer safety net.
    pub admission_buffer_seconds: u64,
    /// Process cap inside the container.
    pub pids_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            image: "texlive/texlive:latest".to_string(),
            max_concurrent_containers: 4,
            timeout_seconds: 30,
            memory_limit_mb: 512,
            cpu_quota: 1.0,
            toolchain: Toolchain::default(),
            docker_socket: None,
            workspace_root: None,
            container_user: None,
            stop_grace_seconds: DEFAULT_STOP_GRACE_SECONDS,
            admission_buffer_seconds: DEFAULT_ADMISSION_BUFFER_SECONDS,
            pids_limit: DEFAULT_PIDS_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Parses YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Reads and parses a YAML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Applies `TEXRUN_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies `TEXRUN_*` overrides from an arbitrary lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TEXRUN_IMAGE") {
            self.image = v;
        }
        if let Some(v) = lookup("TEXRUN_MAX_CONCURRENT_CONTAINERS") {
            self.max_concurrent_containers = parse_env("TEXRUN_MAX_CONCURRENT_CONTAINERS", &v)?;
        }
        if let Some(v) = lookup("TEXRUN_TIMEOUT_SECONDS") {
            self.timeout_seconds = parse_env("TEXRUN_TIMEOUT_SECONDS", &v)?;
        }
        if let Some(v) = lookup("TEXRUN_MEMORY_LIMIT_MB") {
            self.memory_limit_mb = parse_env("TEXRUN_MEMORY_LIMIT_MB", &v)?;
        }
        if let Some(v) = lookup("TEXRUN_CPU_QUOTA") {
            self.cpu_quota = parse_env("TEXRUN_CPU_QUOTA", &v)?;
        }
        if let Some(v) = lookup("TEXRUN_TOOLCHAIN") {
            self.toolchain = v.parse()?;
        }
        if let Some(v) = lookup("TEXRUN_DOCKER_SOCKET") {
            self.docker_socket = Some(PathBuf::from(v));
        }
        Ok(self)
    }

    /// Checks every field, returning the first violation.
    pub fn validate(&self) -> Result<()> {
        validate_image_ref(&self.image)
            .map_err(|reason| Error::InvalidConfig(format!("image: {reason}")))?;

        if self.max_concurrent_containers == 0 {
            return Err(Error::InvalidConfig(
                "max_concurrent_containers must be at least 1".to_string(),
            ));
        }
        if self.timeout_seconds == 0 {
            return Err(Error::InvalidConfig(
                "timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "timeout_seconds must be at most {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if self.admission_buffer_seconds > MAX_TIMEOUT_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "admission_buffer_seconds must be at most {MAX_TIMEOUT_SECONDS}"
            )));
        }
        if !(MIN_MEMORY_LIMIT_MB..=MAX_MEMORY_LIMIT_MB).contains(&self.memory_limit_mb) {
            return Err(Error::InvalidConfig(format!(
                "memory_limit_mb must be between {MIN_MEMORY_LIMIT_MB} and {MAX_MEMORY_LIMIT_MB}"
            )));
        }
        if !self.cpu_quota.is_finite() || self.cpu_quota <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "cpu_quota must be a positive number, got {}",
                self.cpu_quota
            )));
        }
        if self.pids_limit <= 0 {
            return Err(Error::InvalidConfig(
                "pids_limit must be at least 1".to_string(),
            ));
        }
        if let Some(user) = &self.container_user
            && (user.is_empty() || !user.chars().all(|c| c.is_ascii_alphanumeric() || c == ':'))
        {
            return Err(Error::InvalidConfig(format!(
                "container_user '{user}' must look like uid[:gid]"
            )));
        }
        Ok(())
    }

    /// The authoritative per-compilation deadline.
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// How long a request may wait for a container slot.
    ///
    /// Never shorter than one compilation cycle, so queueing alone cannot
    /// fail a request that would have been served by the next free slot.
    pub fn admission_timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .saturating_add(self.admission_buffer_seconds),
        )
    }

    /// Outer bound on the container phase, covering runtime calls that hang.
    pub fn safety_deadline(&self) -> Duration {
        Duration::from_secs(
            self.timeout_seconds
                .saturating_add(self.admission_buffer_seconds),
        )
    }

    /// Graceful stop window for normal cleanup.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_seconds)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::InvalidConfig(format!("{key}={value}: {e}")))
}
