//! Atomic JSON file writes: write to a tmp file in the same directory,
//! fsync it, rename over the target, then best-effort fsync the directory.
//! `rename` within a POSIX filesystem is atomic, so readers never observe a
//! torn file.

use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use crate::error::StoreError;

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state")
    ));

    let body = serde_json::to_vec_pretty(value)?;
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&body)?;
        f.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    fsync_dir_best_effort(dir);
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Directory fsync failures are logged and swallowed: the file rename
/// already happened, losing the dir-entry fsync only risks a stale
/// directory listing after a power loss, not data corruption.
fn fsync_dir_best_effort(dir: &Path) {
    match OpenOptions::new().read(true).open(dir) {
        Ok(f) => {
            if let Err(e) = f.sync_all() {
                tracing::warn!(event = "dir_fsync_failed", dir = %dir.display(), error = %e);
            }
        }
        Err(e) => {
            tracing::warn!(event = "dir_fsync_open_failed", dir = %dir.display(), error = %e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Sample {
        n: u32,
    }

    #[test]
    fn round_trips_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_json_atomic(&path, &Sample { n: 1 }).unwrap();
        assert_eq!(read_json::<Sample>(&path).unwrap(), Some(Sample { n: 1 }));

        write_json_atomic(&path, &Sample { n: 2 }).unwrap();
        assert_eq!(read_json::<Sample>(&path).unwrap(), Some(Sample { n: 2 }));
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert_eq!(read_json::<Sample>(&path).unwrap(), None);
    }
}
