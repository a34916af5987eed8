//! Discovers the sync client's placeholder database and the process that
//! owns it.
//!
//! Grounded in `_find_owncloud_threads` in the original Python
//! implementation: scan `/proc` for processes whose uid matches the
//! database file's owner, then narrow to the one (or more) that actually
//! hold the database file open.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use procfs::process::{all_processes, FDTarget};
use thiserror::Error;
use tracing::warn;

use ocffs_core::SyncClient;

#[derive(Debug, Error)]
pub enum LocatorError {
    #[error("no placeholder database ('._sync_<hex>.db') found under {0}")]
    MissingDatabase(PathBuf),

    #[error("no process holding {0} open was found (is the sync client running?)")]
    NoSyncClient(PathBuf),

    #[error("reading directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("enumerating processes: {0}")]
    Procfs(#[from] procfs::ProcError),
}

/// Returns true for filenames of the shape `._sync_<hex>.db`.
fn is_placeholder_db_name(name: &str) -> bool {
    let Some(hex) = name.strip_prefix("._sync_").and_then(|s| s.strip_suffix(".db")) else {
        return false;
    };
    !hex.is_empty() && hex.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Scan `root` for the sync client's placeholder database.
pub fn find_database(root: &Path) -> Result<PathBuf, LocatorError> {
    let entries = fs::read_dir(root).map_err(|source| LocatorError::ReadDir {
        path: root.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| LocatorError::ReadDir {
            path: root.to_path_buf(),
            source,
        })?;
        if let Some(name) = entry.file_name().to_str() {
            if is_placeholder_db_name(name) {
                return Ok(entry.path());
            }
        }
    }

    Err(LocatorError::MissingDatabase(root.to_path_buf()))
}

/// Enumerate processes and find the one holding `db_path` open, restricted
/// to processes whose real or effective uid matches the database's owner.
///
/// The first match wins; additional matches are logged at `warn!` and
/// ignored, matching spec.md §4.1.
pub fn find_sync_client(db_path: &Path) -> Result<SyncClient, LocatorError> {
    let canonical_db = fs::canonicalize(db_path).map_err(|source| LocatorError::Stat {
        path: db_path.to_path_buf(),
        source,
    })?;
    let db_uid = fs::metadata(&canonical_db)
        .map_err(|source| LocatorError::Stat { path: canonical_db.clone(), source })?
        .uid();

    let my_pid = std::process::id();
    let mut matches = Vec::new();

    let processes = all_processes()?;

    for proc in processes.flatten() {
        if proc.pid() as u32 == my_pid {
            continue;
        }

        let status = match proc.status() {
            Ok(s) => s,
            Err(_) => continue,
        };
        if status.ruid != db_uid && status.euid != db_uid {
            continue;
        }

        let fds = match proc.fd() {
            Ok(fds) => fds,
            // e.g. gpg-agent and similar processes deny /proc/<pid>/fd reads
            Err(_) => continue,
        };

        let holds_db = fds.flatten().any(|fd| match fd.target {
            FDTarget::Path(ref p) => p == &canonical_db,
            _ => false,
        });

        if holds_db {
            matches.push(SyncClient {
                pid: proc.pid() as u32,
                uid: db_uid,
                name: status.name.clone(),
            });
        }
    }

    let mut iter = matches.into_iter();
    let Some(first) = iter.next() else {
        return Err(LocatorError::NoSyncClient(canonical_db));
    };

    let extra: Vec<_> = iter.collect();
    if !extra.is_empty() {
        warn!(
            count = extra.len(),
            "extra processes hold the placeholder database open, ignoring"
        );
    }

    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_placeholder_db_names() {
        assert!(is_placeholder_db_name("._sync_4f3a9c.db"));
        assert!(is_placeholder_db_name("._sync_0.db"));
        assert!(!is_placeholder_db_name("._sync_.db"));
        assert!(!is_placeholder_db_name("._sync_zz.db"));
        assert!(!is_placeholder_db_name("sync_4f3a9c.db"));
        assert!(!is_placeholder_db_name("._sync_4f3a9c.db.bak"));
    }

    #[test]
    fn find_database_locates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();
        std::fs::write(dir.path().join("._sync_deadbeef.db"), b"").unwrap();

        let found = find_database(dir.path()).unwrap();
        assert_eq!(found.file_name().unwrap(), "._sync_deadbeef.db");
    }

    #[test]
    fn find_database_missing_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_database(dir.path()).is_err());
    }

    #[test]
    fn find_sync_client_with_no_holder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        std::fs::write(&db_path, b"").unwrap();

        // Nothing on this machine has this fresh temp file open.
        assert!(find_sync_client(&db_path).is_err());
    }
}
