//! Maps a FUSE-supplied path to its physical and virtual on-disk candidates.

use std::path::{Path, PathBuf};

/// The outcome of resolving a single logical path against the two places it
/// could actually live on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The physical (materialized) candidate, and it exists (or is being
    /// forced as the target of a creating operation).
    Physical(PathBuf),
    /// The virtual (placeholder) candidate, and it exists (or is forced).
    Virtual(PathBuf),
    /// Neither candidate exists on disk; carries the physical candidate.
    Absent(PathBuf),
}

impl Resolved {
    pub fn path(&self) -> &Path {
        match self {
            Resolved::Physical(p) | Resolved::Virtual(p) | Resolved::Absent(p) => p,
        }
    }

    pub fn is_virtual(&self) -> bool {
        matches!(self, Resolved::Virtual(_))
    }
}

/// Resolution strategy; most operations use `Auto`, operations that create
/// or overwrite an entry force one side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Auto,
    ForcePhysical,
    ForceVirtual,
}

/// Join `fuse_path` (leading `/`) onto `root_dir` and split it into its
/// physical/virtual candidates, then apply `mode`.
///
/// `fuse_path` that already ends in `virtual_suffix` is treated as already
/// naming the virtual candidate (this happens for control-plane operations
/// that address a placeholder directly, e.g. a caller-supplied path after a
/// previous `readdir` in transparent mode).
pub fn resolve(root_dir: &Path, fuse_path: &Path, virtual_suffix: &str, mode: Mode) -> Resolved {
    let rel = fuse_path
        .to_str()
        .unwrap_or("/")
        .trim_start_matches('/');
    let joined = if rel.is_empty() {
        root_dir.to_path_buf()
    } else {
        root_dir.join(rel)
    };

    let joined_str = joined.to_string_lossy();
    let (physical, virt) = if let Some(stripped) = joined_str.strip_suffix(virtual_suffix) {
        (PathBuf::from(stripped), joined.clone())
    } else {
        (joined.clone(), PathBuf::from(format!("{joined_str}{virtual_suffix}")))
    };

    match mode {
        Mode::ForcePhysical => Resolved::Physical(physical),
        Mode::ForceVirtual => Resolved::Virtual(virt),
        Mode::Auto => {
            if physical.exists() {
                Resolved::Physical(physical)
            } else if virt.exists() {
                Resolved::Virtual(virt)
            } else {
                Resolved::Absent(physical)
            }
        }
    }
}
