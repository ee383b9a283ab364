//! On-disk layout of provisioned root filesystems.
//!
//! ```text
//! <root>/containers/<id>/backends/<backend>/rootfses/<rootfs_id>
//! <root>/containers/<parent>/containers/<child>/backends/...
//! ```
//!
//! Recovery rebuilds all bookkeeping from this tree alone, so nothing is
//! stored beside it.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use strata_id::{ContainerId, IdError, RootfsId};
use thiserror::Error;

const CONTAINERS_DIR: &str = "containers";
const BACKENDS_DIR: &str = "backends";
const ROOTFSES_DIR: &str = "rootfses";

/// Errors from listing the layout.
#[derive(Debug, Error)]
pub enum PathsError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unexpected container directory '{path}': {source}")]
    InvalidContainer {
        path: PathBuf,
        #[source]
        source: IdError,
    },

    #[error("unexpected rootfs directory '{path}': {source}")]
    InvalidRootfs {
        path: PathBuf,
        #[source]
        source: IdError,
    },

    #[error("entry name is not valid UTF-8: '{0}'")]
    NonUtf8(PathBuf),
}

/// Top-level directory of a container. Nested containers live under their
/// parent's directory.
pub fn container_dir(root: &Path, container_id: &ContainerId) -> PathBuf {
    let mut dir = root.to_path_buf();
    for level in container_id.ancestry() {
        dir.push(CONTAINERS_DIR);
        dir.push(level.value());
    }
    dir
}

/// Private directory handed to a backend for one container.
pub fn backend_dir(root: &Path, container_id: &ContainerId, backend: &str) -> PathBuf {
    container_dir(root, container_id)
        .join(BACKENDS_DIR)
        .join(backend)
}

pub fn rootfs_dir(
    root: &Path,
    container_id: &ContainerId,
    backend: &str,
    rootfs_id: &RootfsId,
) -> PathBuf {
    backend_dir(root, container_id, backend)
        .join(ROOTFSES_DIR)
        .join(rootfs_id.to_string())
}

/// Lists every container with a directory under `root`, nested ones included.
pub fn list_containers(root: &Path) -> Result<HashSet<ContainerId>, PathsError> {
    let mut found = HashSet::new();
    collect_containers(root, None, &mut found)?;
    Ok(found)
}

fn collect_containers(
    dir: &Path,
    parent: Option<&ContainerId>,
    found: &mut HashSet<ContainerId>,
) -> Result<(), PathsError> {
    for (name, path) in subdirectories(&dir.join(CONTAINERS_DIR))? {
        let id = match parent {
            None => ContainerId::new(name),
            Some(parent) => ContainerId::nested(parent.clone(), name),
        }
        .map_err(|source| PathsError::InvalidContainer {
            path: path.clone(),
            source,
        })?;

        collect_containers(&path, Some(&id), found)?;
        found.insert(id);
    }
    Ok(())
}

/// Lists the rootfses of one container, grouped by backend name.
///
/// A backend directory without any rootfs is still reported, with an empty
/// set, so callers can validate the backend name.
pub fn list_container_rootfses(
    root: &Path,
    container_id: &ContainerId,
) -> Result<HashMap<String, HashSet<RootfsId>>, PathsError> {
    let backends_dir = container_dir(root, container_id).join(BACKENDS_DIR);

    let mut rootfses = HashMap::new();
    for (backend, path) in subdirectories(&backends_dir)? {
        let mut ids = HashSet::new();
        for (name, rootfs_path) in subdirectories(&path.join(ROOTFSES_DIR))? {
            let id = RootfsId::parse(&name).map_err(|source| PathsError::InvalidRootfs {
                path: rootfs_path,
                source,
            })?;
            ids.insert(id);
        }
        rootfses.insert(backend, ids);
    }
    Ok(rootfses)
}

/// Directory entries of `dir` that are directories themselves (symlinks are
/// not followed). A missing `dir` has no entries.
fn subdirectories(dir: &Path) -> Result<Vec<(String, PathBuf)>, PathsError> {
    let io_err = |source| PathsError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(io_err(e)),
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        if !entry.file_type().map_err(io_err)?.is_dir() {
            continue;
        }
        let path = entry.path();
        let name = entry
            .file_name()
            .into_string()
            .map_err(|_| PathsError::NonUtf8(path.clone()))?;
        dirs.push((name, path));
    }
    Ok(dirs)
}
