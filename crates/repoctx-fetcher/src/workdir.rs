//! Exclusive per-job working directories
//!
//! Every attempt gets `<root>/<message_id>-<attempt>-<random>`. The directory
//! is removed when the guard drops, which covers success, failure, timeout
//! and panic unwinding alike.

use crate::error::FetchResult;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Working directory owned by one job attempt
#[derive(Debug)]
pub struct WorkDir {
    dir: TempDir,
}

impl WorkDir {
    /// Create a fresh directory under `root`, creating `root` if needed
    ///
    /// # Errors
    /// Returns `FetchError::Io` if the directory cannot be created
    pub fn create(root: &Path, message_id: impl Display, attempt: u32) -> FetchResult<Self> {
        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{message_id}-{attempt}-"))
            .tempdir_in(root)?;

        tracing::debug!(path = %dir.path().display(), "Created job workdir");
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of the checkout inside the workdir
    pub fn checkout_path(&self) -> PathBuf {
        self.dir.path().join("repo")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_workdir_is_named_and_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let work_root = root.path().join("nested").join("work");

        let path = {
            let workdir = WorkDir::create(&work_root, "msg-1", 2).unwrap();
            let name = workdir.path().file_name().unwrap().to_string_lossy().into_owned();
            assert!(name.starts_with("msg-1-2-"));
            assert!(name.len() > "msg-1-2-".len());

            std::fs::create_dir_all(workdir.checkout_path()).unwrap();
            std::fs::write(workdir.checkout_path().join("file.txt"), "x").unwrap();
            workdir.path().to_path_buf()
        };

        assert!(!path.exists());
        assert!(work_root.exists());
    }

    #[test]
    fn test_two_attempts_never_share_a_directory() {
        let root = tempfile::tempdir().unwrap();
        let a = WorkDir::create(root.path(), "msg", 1).unwrap();
        let b = WorkDir::create(root.path(), "msg", 1).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
