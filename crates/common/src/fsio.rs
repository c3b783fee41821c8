//! Atomic file persistence helpers.
//!
//! Every persisted store (accounts, cookies, update state) commits by staging
//! to a sibling `.tmp` file and renaming into place, so readers never observe
//! a partially written file.

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::error::{Error, Result};

/// Write `bytes` to `path` by staging to `<path>.tmp` and renaming into place.
///
/// Creates parent directories if needed. The rename is atomic on the
/// filesystems we care about, so a crash mid-write leaves either the old file
/// or the new file, never a torn one.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = staging_path(path);
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Serialize `value` as pretty JSON and write it atomically, off the async
/// runtime's worker threads.
pub async fn persist_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || atomic_write(&path, &bytes))
        .await
        .map_err(|e| Error::message(format!("persist task panicked: {e}")))?
}

/// Synchronous variant of [`persist_json`] for shutdown paths where the
/// runtime is already draining.
pub fn persist_json_blocking<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &bytes)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_creates_parents_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/out.json");
        atomic_write(&path, b"{\"ok\":true}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"ok\":true}");
    }

    #[test]
    fn atomic_write_replaces_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn no_staging_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        atomic_write(&path, b"data").unwrap();
        assert!(!dir.path().join("out.json.tmp").exists());
    }

    #[tokio::test]
    async fn persist_json_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("value.json");
        persist_json(&path, &serde_json::json!({"n": 42})).await.unwrap();
        let read: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read["n"], 42);
    }
}
