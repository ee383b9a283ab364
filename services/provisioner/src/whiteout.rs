//! Whiteout resolution for composed layered root filesystems.
//!
//! After a backend has stacked every layer into a rootfs, the marker files
//! contributed by upper layers are still present as ordinary files:
//!
//! - `.wh.<name>`: `<name>` from a lower layer must not be visible
//! - `.wh..wh..opq`: nothing from lower layers in this directory is visible
//!
//! [`resolve`] removes the markers and applies them to the tree in place.
//! Opaque directories lose their whole current content, including entries
//! already merged in from upper layers.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Prefix marking a whiteout file.
pub const WHITEOUT_PREFIX: &str = ".wh.";

/// Name of the opaque whiteout marker.
pub const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

#[derive(Debug, Error)]
pub enum WhiteoutError {
    #[error("failed to traverse '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("whiteout file '{path}' does not name an entry of its directory")]
    InvalidMarker { path: PathBuf },

    #[error("failed to remove whiteout file '{path}': {source}")]
    RemoveMarker {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to clear directory labeled as opaque whiteout '{path}': {source}")]
    ClearOpaque {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to remove entry labeled as whiteout '{path}': {source}")]
    RemoveWhiteout {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What [`resolve`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WhiteoutSummary {
    /// Marker files removed.
    pub markers: usize,
    /// Directories cleared by opaque markers.
    pub opaque_dirs: usize,
    /// Whiteout targets that still existed and were removed.
    pub removed: usize,
}

/// Applies and removes all whiteout markers under `rootfs`.
///
/// Any I/O failure aborts; the tree is then left partially resolved and the
/// caller is expected to destroy it.
pub fn resolve(rootfs: &Path) -> Result<WhiteoutSummary, WhiteoutError> {
    let mut summary = WhiteoutSummary::default();
    let mut opaque: BTreeSet<PathBuf> = BTreeSet::new();
    let mut whiteouts: BTreeSet<PathBuf> = BTreeSet::new();

    for entry in WalkDir::new(rootfs).follow_links(false) {
        let entry = entry.map_err(|source| WhiteoutError::Walk {
            path: source
                .path()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| rootfs.to_path_buf()),
            source,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name();
        let Some(target) = strip_whiteout_prefix(name) else {
            continue;
        };

        let path = entry.path();
        let Some(parent) = path.parent() else {
            continue;
        };

        if name == OsStr::new(WHITEOUT_OPAQUE) {
            opaque.insert(parent.to_path_buf());
        } else {
            // Must stay a direct child of the marker's directory.
            if target.is_empty() || target == "." || target == ".." {
                return Err(WhiteoutError::InvalidMarker {
                    path: path.to_path_buf(),
                });
            }
            whiteouts.insert(parent.join(target));
        }

        fs::remove_file(path).map_err(|source| WhiteoutError::RemoveMarker {
            path: path.to_path_buf(),
            source,
        })?;
        summary.markers += 1;
    }

    for dir in &opaque {
        clear_dir(dir).map_err(|source| WhiteoutError::ClearOpaque {
            path: dir.clone(),
            source,
        })?;
        summary.opaque_dirs += 1;
    }

    for path in &whiteouts {
        // May already be gone with an opaque parent.
        let metadata = match fs::symlink_metadata(path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(WhiteoutError::RemoveWhiteout {
                    path: path.clone(),
                    source,
                })
            }
        };

        let removed = if metadata.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|source| WhiteoutError::RemoveWhiteout {
            path: path.clone(),
            source,
        })?;
        summary.removed += 1;
    }

    debug!(
        rootfs = %rootfs.display(),
        markers = summary.markers,
        opaque_dirs = summary.opaque_dirs,
        removed = summary.removed,
        "Resolved whiteouts"
    );

    Ok(summary)
}

/// Name of the entry hidden by a whiteout marker, compared on raw bytes so
/// names that are not UTF-8 are still recognized.
#[cfg(unix)]
fn strip_whiteout_prefix(name: &OsStr) -> Option<&OsStr> {
    use std::os::unix::ffi::OsStrExt;

    name.as_bytes()
        .strip_prefix(WHITEOUT_PREFIX.as_bytes())
        .map(OsStr::from_bytes)
}

#[cfg(not(unix))]
fn strip_whiteout_prefix(name: &OsStr) -> Option<&OsStr> {
    name.to_str()?.strip_prefix(WHITEOUT_PREFIX).map(OsStr::new)
}

/// Removes everything inside `dir`, keeping `dir` itself.
fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_plain_whiteouts() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("a"));
        touch(&root.join("dir/nested/file"));
        touch(&root.join("keep"));
        touch(&root.join(".wh.a"));
        touch(&root.join(".wh.dir"));

        let summary = resolve(root).unwrap();

        assert_eq!(summary.markers, 2);
        assert_eq!(summary.removed, 2);
        assert!(!root.join("a").exists());
        assert!(!root.join("dir").exists());
        assert!(root.join("keep").exists());
        assert!(!root.join(".wh.a").exists());
    }

    #[test]
    fn test_opaque_clears_contents_but_keeps_dir() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("d/x"));
        touch(&root.join("d/sub/y"));
        touch(&root.join("d/upper"));
        touch(&root.join("d").join(WHITEOUT_OPAQUE));

        let summary = resolve(root).unwrap();

        assert_eq!(summary.opaque_dirs, 1);
        assert!(root.join("d").is_dir());
        assert_eq!(fs::read_dir(root.join("d")).unwrap().count(), 0);
    }

    #[test]
    fn test_whiteout_under_opaque_dir_is_already_gone() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        touch(&root.join("d/x"));
        touch(&root.join("d/.wh.x"));
        touch(&root.join("d").join(WHITEOUT_OPAQUE));

        let summary = resolve(root).unwrap();

        assert_eq!(summary.markers, 2);
        assert_eq!(summary.removed, 0);
        assert!(root.join("d").is_dir());
    }

    #[test]
    fn test_whiteout_for_missing_target() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join(".wh.never-existed"));

        let summary = resolve(tmp.path()).unwrap();
        assert_eq!(summary.markers, 1);
        assert_eq!(summary.removed, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let outside = TempDir::new().unwrap();
        touch(&outside.path().join("precious"));
        touch(&outside.path().join(".wh.precious"));

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("gone")).unwrap();
        touch(&root.join(".wh.gone"));

        resolve(root).unwrap();

        // markers behind the link are untouched, the whited-out link itself is removed
        assert!(outside.path().join(".wh.precious").exists());
        assert!(outside.path().join("precious").exists());
        assert!(root.join("link").exists());
        assert!(fs::symlink_metadata(root.join("gone")).is_err());
    }

    #[test]
    fn test_marker_cannot_reach_outside_its_directory() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("mine");
        touch(&rootfs.join("etc/hostname"));
        touch(&rootfs.join(".wh..."));
        touch(&tmp.path().join("sibling/data"));

        let err = resolve(&rootfs).unwrap_err();

        assert!(matches!(err, WhiteoutError::InvalidMarker { .. }));
        assert!(tmp.path().join("sibling/data").exists());
        assert!(rootfs.join("etc/hostname").exists());
    }

    #[test]
    fn test_marker_cannot_name_its_own_directory() {
        for marker in [".wh.", ".wh.."] {
            let tmp = TempDir::new().unwrap();
            touch(&tmp.path().join("d/keep"));
            touch(&tmp.path().join("d").join(marker));

            let err = resolve(tmp.path()).unwrap_err();
            assert!(matches!(err, WhiteoutError::InvalidMarker { .. }), "{marker}");
            assert!(tmp.path().join("d/keep").exists(), "{marker}");
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_marker_is_applied() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let target = root.join(OsString::from_vec(b"f\xff".to_vec()));
        let marker = root.join(OsString::from_vec(b".wh.f\xff".to_vec()));
        touch(&target);
        touch(&marker);

        let summary = resolve(root).unwrap();

        assert_eq!(summary.markers, 1);
        assert_eq!(summary.removed, 1);
        assert!(fs::symlink_metadata(&target).is_err());
        assert!(fs::symlink_metadata(&marker).is_err());
    }

    #[test]
    fn test_tree_without_markers_is_untouched() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("etc/hostname"));
        touch(&tmp.path().join("etc/.whiteout-lookalike"));

        let summary = resolve(tmp.path()).unwrap();
        assert_eq!(summary, WhiteoutSummary::default());
        assert!(tmp.path().join("etc/.whiteout-lookalike").exists());
    }
}
