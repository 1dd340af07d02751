//! Scoped workspace: an ephemeral directory owning every per-invocation
//! temporary file (chunk files + the shared output buffer).
//!
//! Removal runs on every exit path via `Drop`, with bounded retries and a
//! fixed backoff. If the directory still cannot be removed the failure is
//! logged as a warning and swallowed — cleanup must never replace the
//! pipeline's actual result or error.

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, thread};

use tempfile::TempDir;
use tracing::warn;

use crate::error::{MagicError, Result};

const MAX_REMOVE_RETRIES: u32 = 3;
const REMOVE_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
}

impl Workspace {
    /// Create a uniquely named directory `<parent>/<prefix><random>`.
    pub fn acquire(prefix: &str, parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir_in(parent)
            .map_err(|e| {
                MagicError::io(format!("workspace creation in {}", parent.display()), e)
            })?;
        Ok(Workspace { dir: Some(dir) })
    }

    pub fn path(&self) -> &Path {
        // `dir` is only None after Drop has taken it.
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else { return };
        let path: PathBuf = dir.path().to_path_buf();

        // First attempt goes through TempDir so the handle is consumed even
        // on success; later attempts retry the raw removal.
        if dir.close().is_ok() {
            return;
        }
        for attempt in 2..=MAX_REMOVE_RETRIES {
            thread::sleep(REMOVE_BACKOFF);
            match fs::remove_dir_all(&path) {
                Ok(()) => return,
                Err(e) => {
                    warn!(
                        attempt,
                        path = %path.display(),
                        error = %e,
                        "failed to remove workspace, retrying"
                    );
                }
            }
        }
        warn!(
            path = %path.display(),
            "workspace not fully removed; manual cleanup may be required"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removed_on_scope_exit() {
        let parent = tempfile::tempdir().unwrap();
        let path;
        {
            let ws = Workspace::acquire("magic_test_", parent.path()).unwrap();
            path = ws.path().to_path_buf();
            assert!(path.is_dir());
            std::fs::write(path.join("junk.bin"), [0u8; 16]).unwrap();
        }
        assert!(!path.exists());
    }

    #[test]
    fn workspace_is_debug_printable() {
        // `unwrap_err()` on acquire's Result needs this impl.
        let parent = tempfile::tempdir().unwrap();
        let ws = Workspace::acquire("magic_test_", parent.path()).unwrap();
        assert!(format!("{ws:?}").contains("Workspace"));
    }

    #[test]
    fn acquire_fails_for_missing_parent() {
        let parent = Path::new("/nonexistent/magic/parent");
        let err = Workspace::acquire("magic_test_", parent).unwrap_err();
        assert!(matches!(err, MagicError::Io { .. }));
    }
}
