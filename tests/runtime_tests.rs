//! Tests for the runtime port and container state.
//!
//! Validates the status model, state serialization, and that the trait is
//! usable as a shared trait object.

mod common;

use common::{FakeRuntime, SAMPLE_PDF};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use texrun::{
    BindMount, ContainerRuntime, ContainerSpec, ContainerState, ContainerStatus, ResourceLimits,
};

// =============================================================================
// ContainerStatus Tests
// =============================================================================

#[test]
fn test_container_status_display() {
    assert_eq!(format!("{}", ContainerStatus::Created), "created");
    assert_eq!(format!("{}", ContainerStatus::Running), "running");
    assert_eq!(format!("{}", ContainerStatus::Exited), "exited");
    assert_eq!(format!("{}", ContainerStatus::Dead), "dead");
}

#[test]
fn test_only_live_statuses_are_active() {
    for status in [
        ContainerStatus::Created,
        ContainerStatus::Running,
        ContainerStatus::Paused,
        ContainerStatus::Restarting,
    ] {
        assert!(status.is_active(), "{status} should be active");
    }
    for status in [
        ContainerStatus::Removing,
        ContainerStatus::Exited,
        ContainerStatus::Dead,
    ] {
        assert!(!status.is_active(), "{status} should not be active");
    }
}

// =============================================================================
// ContainerState Tests
// =============================================================================

#[test]
fn test_exited_state_carries_code() {
    let state = ContainerState::exited("c1", 1);
    assert_eq!(state.status, ContainerStatus::Exited);
    assert_eq!(state.exit_code, Some(1));
    assert!(!state.oom_killed);
}

#[test]
fn test_state_serialization() {
    let state = ContainerState::exited("c1", 0);
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["id"], "c1");
    assert_eq!(json["status"], "exited");
    assert_eq!(json["exitCode"], 0);

    let running = serde_json::to_value(ContainerState::new("c2", ContainerStatus::Running)).unwrap();
    assert!(running.get("exitCode").is_none());
}

#[test]
fn test_state_deserialization_defaults_oom() {
    let state: ContainerState =
        serde_json::from_str(r#"{"id":"c1","status":"running"}"#).unwrap();
    assert_eq!(state.status, ContainerStatus::Running);
    assert!(!state.oom_killed);
    assert!(state.is_running());
}

// =============================================================================
// Trait Object Tests
// =============================================================================

fn spec(host: PathBuf) -> ContainerSpec {
    ContainerSpec {
        name: "texrun-runtime-test".to_string(),
        image: "texlive/texlive:latest".to_string(),
        command: vec!["pdflatex".to_string()],
        env: Vec::new(),
        working_dir: "/workspace".to_string(),
        mount: BindMount {
            host_path: host,
            container_path: "/workspace".to_string(),
            read_only: false,
        },
        limits: ResourceLimits::from_fraction(512, 1.0, 100_000, 256),
        read_only_rootfs: true,
        network_disabled: true,
        auto_remove: false,
        user: None,
        labels: Default::default(),
    }
}

#[tokio::test]
async fn test_lifecycle_through_trait_object() {
    let dir = tempfile::TempDir::new().unwrap();
    let runtime: Arc<dyn ContainerRuntime> = Arc::new(FakeRuntime::succeeding(SAMPLE_PDF));

    let id = runtime.create(&spec(dir.path().to_path_buf())).await.unwrap();
    assert_eq!(
        runtime.inspect(&id).await.unwrap().status,
        ContainerStatus::Created
    );

    runtime.start(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let state = runtime.inspect(&id).await.unwrap();
    assert_eq!(state.exit_code, Some(0));

    runtime.stop(&id, Duration::from_secs(1)).await.unwrap();
    runtime.remove(&id, true).await.unwrap();

    let err = runtime.remove(&id, true).await.unwrap_err();
    assert!(err.is_not_found());
}
