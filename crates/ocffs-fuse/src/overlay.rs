//! Substitutes placeholder-database values for on-disk stat fields.

use std::path::Path;
use std::time::{Duration, UNIX_EPOCH};

use fuse3::FileType;
use fuse3::path::prelude::FileAttr;
use tracing::warn;

use ocffs_db::PlaceholderDb;

/// Build a `FileAttr` for `physical_path` (the on-disk placeholder file),
/// substituting `size`/`mtime` from the placeholder database unless
/// `transparent` is set.
///
/// `rel_path` is the lookup key: the path relative to `root_dir`, without a
/// leading slash.
pub fn virtual_attr(
    db: &PlaceholderDb,
    meta: &std::fs::Metadata,
    rel_path: &str,
    transparent: bool,
) -> FileAttr {
    let mut attr = stat_to_attr(meta);

    if transparent {
        return attr;
    }

    match db.lookup(rel_path) {
        Some(record) => {
            if let Ok(size) = u64::try_from(record.filesize) {
                attr.size = size;
                attr.blocks = size.div_ceil(512);
            }
            if let Ok(secs) = u64::try_from(record.modtime) {
                let mtime = UNIX_EPOCH + Duration::from_secs(secs);
                attr.mtime = mtime;
                attr.ctime = mtime;
            }
        }
        None => {
            warn!(path = rel_path, "no placeholder record, falling back to on-disk stub stat");
        }
    }

    attr
}

/// Build a `FileAttr` straight from on-disk metadata, no overlay applied —
/// used for physical files and for virtual files seen by a transparent caller.
pub fn stat_to_attr(meta: &std::fs::Metadata) -> FileAttr {
    use std::os::unix::fs::MetadataExt;

    let kind = if meta.is_dir() {
        FileType::Directory
    } else if meta.file_type().is_symlink() {
        FileType::Symlink
    } else {
        FileType::RegularFile
    };

    FileAttr {
        size: meta.size(),
        blocks: meta.blocks(),
        atime: meta.accessed().unwrap_or(UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(UNIX_EPOCH),
        ctime: UNIX_EPOCH + Duration::from_secs(meta.ctime().max(0) as u64),
        #[cfg(target_os = "macos")]
        crtime: UNIX_EPOCH,
        kind,
        perm: (meta.mode() & 0o7777) as u16,
        nlink: meta.nlink() as u32,
        uid: meta.uid(),
        gid: meta.gid(),
        rdev: meta.rdev() as u32,
        blksize: meta.blksize() as u32,
        #[cfg(target_os = "macos")]
        flags: 0,
    }
}

/// Relative path (no leading slash) of `physical_path` within `root_dir`,
/// the key the placeholder database is keyed on.
pub fn rel_to_root<'a>(root_dir: &Path, physical_path: &'a Path) -> &'a str {
    physical_path
        .strip_prefix(root_dir)
        .unwrap_or(physical_path)
        .to_str()
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn seed(db_path: &Path) {
        let conn = Connection::open(db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE metadata (path TEXT, fileid TEXT, modtime INTEGER, filesize INTEGER, type INTEGER);
             INSERT INTO metadata VALUES ('doc.pdf', 'abc', 1700000000, 1048576, 1);",
        )
        .unwrap();
    }

    #[test]
    fn overlay_substitutes_size_and_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        seed(&db_path);
        let db = PlaceholderDb::open(&db_path).unwrap();

        let stub_path = dir.path().join("doc.pdf.owncloud");
        std::fs::write(&stub_path, b"").unwrap();
        let meta = std::fs::metadata(&stub_path).unwrap();

        let attr = virtual_attr(&db, &meta, "doc.pdf", false);
        assert_eq!(attr.size, 1048576);
        assert_eq!(attr.mtime, UNIX_EPOCH + Duration::from_secs(1700000000));
    }

    #[test]
    fn transparent_caller_sees_stub_stat() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        seed(&db_path);
        let db = PlaceholderDb::open(&db_path).unwrap();

        let stub_path = dir.path().join("doc.pdf.owncloud");
        std::fs::write(&stub_path, b"").unwrap();
        let meta = std::fs::metadata(&stub_path).unwrap();

        let attr = virtual_attr(&db, &meta, "doc.pdf", true);
        assert_eq!(attr.size, 0);
    }

    #[test]
    fn missing_record_falls_back_to_stub_stat() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("._sync_deadbeef.db");
        seed(&db_path);
        let db = PlaceholderDb::open(&db_path).unwrap();

        let stub_path = dir.path().join("other.txt.owncloud");
        std::fs::write(&stub_path, b"xyz").unwrap();
        let meta = std::fs::metadata(&stub_path).unwrap();

        let attr = virtual_attr(&db, &meta, "other.txt", false);
        assert_eq!(attr.size, 3);
    }

    #[test]
    fn rel_to_root_strips_prefix() {
        let root = Path::new("/home/user/Nextcloud");
        let physical = Path::new("/home/user/Nextcloud/docs/report.pdf");
        assert_eq!(rel_to_root(root, physical), "docs/report.pdf");
    }
}
