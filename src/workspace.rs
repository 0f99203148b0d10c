//! Per-request workspaces.
//!
//! Each request gets a freshly created, uniquely named temporary directory
//! that is bind-mounted into its container. It holds exactly two files of
//! interest: the source written before start and the artifact the
//! toolchain leaves behind.
//!
//! [`Workspace::destroy`] is the explicit, best-effort teardown the engine
//! calls once per request. The underlying [`tempfile::TempDir`] also deletes
//! the directory on drop, so a panic between creation and teardown still
//! leaves nothing behind.

use crate::classify::{FailureContext, RuntimeOperation, classify_io};
use crate::constants::{ARTIFACT_FILE_NAME, MAX_ARTIFACT_BYTES, SOURCE_FILE_NAME, WORKSPACE_PREFIX};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Creates workspaces under a fixed parent directory.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    /// Uses `root` as the parent directory, or the system temp dir.
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root: root.unwrap_or_else(std::env::temp_dir),
        }
    }

    /// Creates a new uniquely named workspace.
    pub fn create(&self) -> io::Result<Workspace> {
        fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(&self.root)?;

        // The toolchain may run as an unprivileged uid that does not own
        // the directory; it must still be able to write the artifact.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o777))?;
        }

        debug!(path = %dir.path().display(), "workspace created");
        Ok(Workspace { dir: Some(dir) })
    }
}

/// One request's private directory.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
}

impl Workspace {
    /// Absolute path of the directory.
    pub fn path(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => Path::new(""),
        }
    }

    /// Writes the source file and returns its path.
    pub fn write_source(&self, content: &str) -> io::Result<PathBuf> {
        let path = self.path().join(SOURCE_FILE_NAME);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Host path of the expected artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.path().join(ARTIFACT_FILE_NAME)
    }

    /// Reads the artifact. `Ok(None)` if the toolchain did not produce one.
    ///
    /// Symlinks and non-regular files are treated as absent: the sandbox
    /// controls this directory and must not be able to point the host at
    /// another file.
    pub fn read_artifact(&self) -> io::Result<Option<Vec<u8>>> {
        let path = self.artifact_path();
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if !meta.file_type().is_file() {
            warn!(path = %path.display(), "artifact is not a regular file, ignoring");
            return Ok(None);
        }
        if meta.len() > MAX_ARTIFACT_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "artifact is {} bytes, limit is {}",
                    meta.len(),
                    MAX_ARTIFACT_BYTES
                ),
            ));
        }
        fs::read(&path).map(Some)
    }

    /// Recursively deletes the directory. Never fails; errors are logged.
    pub fn destroy(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(path = %path.display(), "workspace deleted"),
                Err(e) => {
                    let target = path.display().to_string();
                    let classified = classify_io(
                        RuntimeOperation::DeleteWorkspace,
                        &e,
                        &FailureContext {
                            target: &target,
                            ..Default::default()
                        },
                    );
                    warn!(kind = %classified.kind(), error = %classified, "workspace cleanup failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspaces_are_unique_and_prefixed() {
        let root = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(Some(root.path().to_path_buf()));

        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
        let name = a.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(WORKSPACE_PREFIX));
    }

    #[test]
    fn test_source_roundtrip_and_missing_artifact() {
        let root = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(Some(root.path().to_path_buf()))
            .create()
            .unwrap();

        let source = ws.write_source("\\documentclass{article}").unwrap();
        assert_eq!(source.file_name().unwrap(), SOURCE_FILE_NAME);
        assert_eq!(
            fs::read_to_string(&source).unwrap(),
            "\\documentclass{article}"
        );
        assert!(ws.read_artifact().unwrap().is_none());

        fs::write(ws.artifact_path(), b"%PDF-1.5").unwrap();
        assert_eq!(ws.read_artifact().unwrap().unwrap(), b"%PDF-1.5");
    }

    #[test]
    fn test_destroy_removes_directory() {
        let root = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(Some(root.path().to_path_buf()))
            .create()
            .unwrap();
        let path = ws.path().to_path_buf();
        fs::create_dir(path.join("nested")).unwrap();
        fs::write(path.join("nested/file.aux"), b"x").unwrap();

        ws.destroy();
        assert!(!path.exists());
    }

    #[test]
    fn test_drop_also_removes_directory() {
        let root = TempDir::new().unwrap();
        let path = {
            let ws = WorkspaceManager::new(Some(root.path().to_path_buf()))
                .create()
                .unwrap();
            ws.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_artifact_is_ignored() {
        let root = TempDir::new().unwrap();
        let ws = WorkspaceManager::new(Some(root.path().to_path_buf()))
            .create()
            .unwrap();
        let secret = root.path().join("secret");
        fs::write(&secret, b"host data").unwrap();
        std::os::unix::fs::symlink(&secret, ws.artifact_path()).unwrap();

        assert!(ws.read_artifact().unwrap().is_none());
    }
}
