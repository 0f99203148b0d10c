//! Scripted in-process container runtime for engine tests.
//!
//! Containers "run" by wall clock: `inspect` decides the state from the
//! time since `start` and the configured [`Behavior`]. A successful run
//! writes the artifact into the bind-mounted host directory, the same way
//! the real toolchain would.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use texrun::{
    ARTIFACT_FILE_NAME, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus,
    EngineConfig, ImageInfo, RuntimeError, RuntimeResult,
};

/// What every container created by the fake does once started.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Exits 0 after `after`, leaving `output` as the artifact.
    Succeed { output: Vec<u8>, after: Duration },
    /// Exits with `exit_code` after `after`, printing `logs`.
    Fail {
        exit_code: i64,
        logs: String,
        after: Duration,
    },
    /// Exits 0 without writing an artifact.
    ExitWithoutArtifact { logs: String },
    /// Runs until stopped.
    Hang,
    /// Killed by the memory cgroup.
    OomKilled,
}

#[derive(Debug)]
struct FakeContainer {
    spec: ContainerSpec,
    started: Option<Instant>,
    stopped: bool,
}

#[derive(Debug, Default)]
struct FakeState {
    containers: HashMap<String, FakeContainer>,
    peak_live: usize,
    created: usize,
    removed: Vec<String>,
    stops: Vec<(String, Duration)>,
    specs: Vec<ContainerSpec>,
}

pub struct FakeRuntime {
    behavior: Mutex<Behavior>,
    image_present: AtomicBool,
    pull_fails: AtomicBool,
    create_fails: AtomicBool,
    stop_fails: AtomicBool,
    start_fails: AtomicBool,
    inspect_hangs: AtomicBool,
    stop_delay: Mutex<Duration>,
    remove_failures_left: AtomicUsize,
    pulls: AtomicUsize,
    state: Mutex<FakeState>,
}

impl FakeRuntime {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            image_present: AtomicBool::new(true),
            pull_fails: AtomicBool::new(false),
            create_fails: AtomicBool::new(false),
            stop_fails: AtomicBool::new(false),
            start_fails: AtomicBool::new(false),
            inspect_hangs: AtomicBool::new(false),
            stop_delay: Mutex::new(Duration::ZERO),
            remove_failures_left: AtomicUsize::new(0),
            pulls: AtomicUsize::new(0),
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn succeeding(output: &[u8]) -> Self {
        Self::new(Behavior::Succeed {
            output: output.to_vec(),
            after: Duration::from_millis(150),
        })
    }

    pub fn without_image(self) -> Self {
        self.image_present.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing_pulls(self) -> Self {
        self.pull_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_creates(self) -> Self {
        self.create_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_stops(self) -> Self {
        self.stop_fails.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_starts(self) -> Self {
        self.start_fails.store(true, Ordering::SeqCst);
        self
    }

    /// `inspect` on a started container never returns.
    pub fn hanging_inspects(self) -> Self {
        self.inspect_hangs.store(true, Ordering::SeqCst);
        self
    }

    /// Every `stop` takes `delay` before it acts.
    pub fn slow_stops(self, delay: Duration) -> Self {
        *self.stop_delay.lock().unwrap() = delay;
        self
    }

    pub fn failing_removes(self, times: usize) -> Self {
        self.remove_failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Containers that currently exist.
    pub fn live(&self) -> usize {
        self.state.lock().unwrap().containers.len()
    }

    /// Most containers that existed at the same time.
    pub fn peak_live(&self) -> usize {
        self.state.lock().unwrap().peak_live
    }

    pub fn created(&self) -> usize {
        self.state.lock().unwrap().created
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().unwrap().removed.clone()
    }

    pub fn stops(&self) -> Vec<(String, Duration)> {
        self.state.lock().unwrap().stops.clone()
    }

    pub fn last_spec(&self) -> Option<ContainerSpec> {
        self.state.lock().unwrap().specs.last().cloned()
    }

    /// Polls until no container exists or `within` elapses.
    pub async fn wait_until_empty(&self, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        while Instant::now() < deadline {
            if self.live() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.live() == 0
    }

    fn write_artifact(mount: &Path, output: &[u8]) {
        std::fs::write(mount.join(ARTIFACT_FILE_NAME), output).unwrap();
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn inspect_image(&self, image: &str) -> RuntimeResult<Option<ImageInfo>> {
        if self.image_present.load(Ordering::SeqCst) {
            Ok(Some(ImageInfo {
                id: format!("sha256:{}", image.len()),
                size: Some(1024),
            }))
        } else {
            Ok(None)
        }
    }

    async fn pull_image(&self, image: &str) -> RuntimeResult<()> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.pull_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api {
                status: 404,
                message: format!("pull access denied for {image}"),
            });
        }
        self.image_present.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> RuntimeResult<String> {
        if self.create_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api {
                status: 400,
                message: "invalid mount config for type \"bind\"".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        state.containers.insert(
            spec.name.clone(),
            FakeContainer {
                spec: spec.clone(),
                started: None,
                stopped: false,
            },
        );
        state.created += 1;
        state.peak_live = state.peak_live.max(state.containers.len());
        state.specs.push(spec.clone());
        Ok(spec.name.clone())
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        if self.start_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api {
                status: 500,
                message: "OCI runtime create failed: unable to apply cgroup configuration"
                    .to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        let container = state
            .containers
            .get_mut(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;
        container.started = Some(Instant::now());
        Ok(())
    }

    async fn inspect(&self, id: &str) -> RuntimeResult<ContainerState> {
        if self.inspect_hangs.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let behavior = self.behavior.lock().unwrap().clone();
        let state = self.state.lock().unwrap();
        let container = state
            .containers
            .get(id)
            .ok_or_else(|| RuntimeError::NotFound(id.to_string()))?;

        let Some(started) = container.started else {
            return Ok(ContainerState::new(id, ContainerStatus::Created));
        };
        if container.stopped {
            return Ok(ContainerState::exited(id, 137));
        }

        let elapsed = started.elapsed();
        let observed = match behavior {
            Behavior::Succeed { output, after } if elapsed >= after => {
                Self::write_artifact(&container.spec.mount.host_path, &output);
                ContainerState::exited(id, 0)
            }
            Behavior::Fail {
                exit_code, after, ..
            } if elapsed >= after => ContainerState::exited(id, exit_code),
            Behavior::ExitWithoutArtifact { .. } => ContainerState::exited(id, 0),
            Behavior::OomKilled => ContainerState {
                oom_killed: true,
                ..ContainerState::exited(id, 137)
            },
            _ => ContainerState::new(id, ContainerStatus::Running),
        };
        Ok(observed)
    }

    async fn stop(&self, id: &str, grace: Duration) -> RuntimeResult<()> {
        let delay = *self.stop_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.stops.push((id.to_string(), grace));
        if self.stop_fails.load(Ordering::SeqCst) {
            return Err(RuntimeError::Api {
                status: 500,
                message: "cannot stop container: permission denied".to_string(),
            });
        }
        match state.containers.get_mut(id) {
            Some(container) => {
                container.stopped = true;
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn remove(&self, id: &str, _force: bool) -> RuntimeResult<()> {
        let failures = self.remove_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.remove_failures_left
                .store(failures - 1, Ordering::SeqCst);
            return Err(RuntimeError::Api {
                status: 409,
                message: "removal already in progress".to_string(),
            });
        }
        let mut state = self.state.lock().unwrap();
        match state.containers.remove(id) {
            Some(_) => {
                state.removed.push(id.to_string());
                Ok(())
            }
            None => Err(RuntimeError::NotFound(id.to_string())),
        }
    }

    async fn logs(&self, _id: &str) -> RuntimeResult<String> {
        let behavior = self.behavior.lock().unwrap().clone();
        Ok(match behavior {
            Behavior::Fail { logs, .. } | Behavior::ExitWithoutArtifact { logs } => logs,
            Behavior::OomKilled => "This is pdfTeX, Version 3.141592653".to_string(),
            _ => String::new(),
        })
    }
}

/// Config for tests: short timeout, workspaces under `root`.
pub fn test_config(root: &Path) -> EngineConfig {
    EngineConfig {
        timeout_seconds: 5,
        max_concurrent_containers: 2,
        stop_grace_seconds: 1,
        admission_buffer_seconds: 2,
        workspace_root: Some(root.to_path_buf()),
        ..Default::default()
    }
}

/// Number of entries directly under `root`.
pub fn entries(root: &Path) -> usize {
    std::fs::read_dir(root).map(|d| d.count()).unwrap_or(0)
}

pub const SAMPLE_SOURCE: &str = r"\documentclass{article}
\begin{document}
Hello, world.
\end{document}
";

pub const SAMPLE_PDF: &[u8] = b"%PDF-1.5\n%fake document\n%%EOF\n";
