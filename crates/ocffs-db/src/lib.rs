//! Read-only access to the sync client's placeholder database.
//!
//! The database format itself is owned by the sync client; this crate
//! issues exactly one query against it (`SELECT ... FROM metadata WHERE
//! path = ?1`) and is defensive against schema drift — a missing row, an
//! unexpected column type, or a missing table are all treated as a
//! non-fatal lookup miss, never a panic or a surfaced error.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use thiserror::Error;
use tracing::warn;

use ocffs_core::PlaceholderRecord;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("opening placeholder database {path}: {source}")]
    Open {
        path: std::path::PathBuf,
        #[source]
        source: rusqlite::Error,
    },
}

/// A read-only connection to the sync client's placeholder database.
///
/// `rusqlite::Connection` is `Send` but not `Sync`; the FUSE driver shares a
/// `&PlaceholderDb` across the `fuse3` op dispatch, so the connection is
/// guarded by a mutex that serializes the one query this crate ever issues
/// (see spec.md §5's "serializing accessor" guidance).
pub struct PlaceholderDb {
    conn: Mutex<Connection>,
}

impl PlaceholderDb {
    /// Open the database at `path` in read-only mode.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|source| DbError::Open { path: path.to_path_buf(), source })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Look up the placeholder record for `rel_path` (relative to the
    /// symlink-resolved sync root, no leading slash).
    ///
    /// Returns `None` — logging a warning, never an error — on a missing
    /// row, a query failure, or a column that doesn't parse the way we
    /// expect. The overlay falls back to on-disk stat values in that case.
    pub fn lookup(&self, rel_path: &str) -> Option<PlaceholderRecord> {
        let conn = self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stmt = match conn
            .prepare_cached("SELECT fileid, modtime, filesize, type FROM metadata WHERE path = ?1")
        {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!(path = rel_path, "placeholder db: prepare failed: {e}");
                return None;
            }
        };

        let row = stmt.query_row([rel_path], |row| {
            Ok(PlaceholderRecord {
                fileid: row.get(0)?,
                modtime: row.get(1)?,
                filesize: row.get(2)?,
                file_type: row.get(3)?,
            })
        });

        match row {
            Ok(record) => Some(record),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                warn!(path = rel_path, "placeholder db: no row for path");
                None
            }
            Err(e) => {
                warn!(path = rel_path, "placeholder db: lookup failed: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_db(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (path TEXT, fileid TEXT, modtime INTEGER, filesize INTEGER, type INTEGER);
             INSERT INTO metadata VALUES ('doc.pdf', 'abc123', 1700000000, 1048576, 1);",
        )
        .unwrap();
    }

    #[test]
    fn lookup_hit() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        seed_db(&db_path);

        let db = PlaceholderDb::open(&db_path).unwrap();
        let record = db.lookup("doc.pdf").unwrap();
        assert_eq!(record.fileid, "abc123");
        assert_eq!(record.modtime, 1700000000);
        assert_eq!(record.filesize, 1048576);
    }

    #[test]
    fn lookup_miss_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        seed_db(&db_path);

        let db = PlaceholderDb::open(&db_path).unwrap();
        assert!(db.lookup("missing.txt").is_none());
    }

    #[test]
    fn lookup_against_drifted_schema_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch("CREATE TABLE metadata (path TEXT);").unwrap();

        let db = PlaceholderDb::open(&db_path).unwrap();
        assert!(db.lookup("doc.pdf").is_none());
    }
}
