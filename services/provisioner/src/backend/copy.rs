//! Copy backend: materializes a rootfs by copying every layer in order.
//!
//! Upper layers overwrite lower ones entry by entry. Whiteout markers are
//! copied like any other file; resolving them is the provisioner's job.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};
use walkdir::WalkDir;

use super::Backend;

/// Backend that copies layers into a plain directory.
#[derive(Debug, Default, Clone)]
pub struct CopyBackend;

impl CopyBackend {
    pub const NAME: &'static str = "copy";

    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Backend for CopyBackend {
    async fn provision(&self, layers: &[PathBuf], rootfs: &Path, _work_dir: &Path) -> Result<()> {
        let layers = layers.to_vec();
        let target = rootfs.to_path_buf();

        info!(
            rootfs = %rootfs.display(),
            layer_count = layers.len(),
            "Copying layers into rootfs"
        );

        tokio::task::spawn_blocking(move || {
            if fs::symlink_metadata(&target).is_ok() {
                bail!("rootfs '{}' already exists", target.display());
            }
            fs::create_dir_all(&target)
                .with_context(|| format!("failed to create rootfs '{}'", target.display()))?;
            copy_layers(&layers, &target)
        })
        .await
        .context("copy task failed")?
    }

    async fn destroy(&self, rootfs: &Path, _work_dir: &Path) -> Result<bool> {
        let target = rootfs.to_path_buf();

        tokio::task::spawn_blocking(move || match fs::remove_dir_all(&target) {
            Ok(()) => {
                debug!(rootfs = %target.display(), "Removed rootfs");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to remove rootfs '{}'", target.display())),
        })
        .await
        .context("remove task failed")?
    }
}

/// Copy `layers` over `rootfs` in order.
pub(crate) fn copy_layers(layers: &[PathBuf], rootfs: &Path) -> Result<()> {
    // Directory permissions are applied once every layer is in place, so a
    // read-only directory from a lower layer can still be filled by upper
    // ones. The topmost layer defining a directory decides its mode.
    let mut dirs = BTreeMap::new();

    for (index, layer) in layers.iter().enumerate() {
        debug!(layer = index, path = %layer.display(), "Copying layer");
        copy_layer(layer, rootfs, &mut dirs)
            .with_context(|| format!("failed to copy layer '{}'", layer.display()))?;
    }

    // Reverse path order visits children before their parents.
    for (dir, permissions) in dirs.into_iter().rev() {
        if fs::symlink_metadata(&dir).is_ok_and(|metadata| metadata.is_dir()) {
            fs::set_permissions(&dir, permissions)
                .with_context(|| format!("failed to set permissions on '{}'", dir.display()))?;
        }
    }

    Ok(())
}

fn copy_layer(
    layer: &Path,
    rootfs: &Path,
    dirs: &mut BTreeMap<PathBuf, fs::Permissions>,
) -> io::Result<()> {
    for entry in WalkDir::new(layer).follow_links(false).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(layer)
            .map_err(io::Error::other)?;
        let target = rootfs.join(relative);
        let file_type = entry.file_type();
        let existing = fs::symlink_metadata(&target).ok();

        if file_type.is_dir() {
            match existing {
                Some(metadata) if metadata.is_dir() => {}
                Some(_) => {
                    fs::remove_file(&target)?;
                    fs::create_dir(&target)?;
                }
                None => fs::create_dir(&target)?,
            }
            dirs.insert(target, entry.metadata()?.permissions());
            continue;
        }

        if let Some(metadata) = existing {
            if metadata.is_dir() {
                dirs.retain(|dir, _| !dir.starts_with(&target));
                fs::remove_dir_all(&target)?;
            } else {
                fs::remove_file(&target)?;
            }
        }

        if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            symlink(&link, &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else {
            debug!(path = %entry.path().display(), "Skipping special file");
        }
    }

    Ok(())
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(not(unix))]
fn symlink(_link: &Path, target: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot create symlink '{}' on this platform", target.display()),
    ))
}
