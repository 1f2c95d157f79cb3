// Per-execution scratch directories
//
// Every (submission, test case) pair gets a fresh directory under the arena
// root, named after the job id so concurrent submissions never collide.
// The directory is removed when the handle is released or dropped, which
// covers timeouts, crashes and cancelled futures alike.

use crate::harness::ExecutionPlan;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ScratchArena {
    root: PathBuf,
}

impl ScratchArena {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a private directory for one execution of `job_id`.
    pub fn acquire(&self, job_id: &Uuid, label: &str) -> io::Result<ScratchDir> {
        std::fs::create_dir_all(&self.root)?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", job_id, label))
            .tempdir_in(&self.root)?;

        debug!(path = %dir.path().display(), "Acquired scratch directory");
        Ok(ScratchDir { dir })
    }
}

pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write the plan's program text to its source file and return the file path.
    pub async fn materialize(&self, plan: &ExecutionPlan) -> io::Result<PathBuf> {
        let path = self.dir.path().join(&plan.source_file);
        tokio::fs::write(&path, plan.program.as_bytes()).await?;
        Ok(path)
    }

    /// Remove the directory now, logging instead of failing.
    pub fn release(self) {
        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch directory");
        }
    }
}
