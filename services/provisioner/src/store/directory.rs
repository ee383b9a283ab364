//! Store backed by layers already unpacked on local disk.
//!
//! ```text
//! <root>/images/<sanitized reference>.json   image record
//! <root>/layers/<layer id>/                  unpacked layer tree
//! <root>/staging/                            scratch for in-flight imports
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use super::Store;
use crate::image::{Image, ImageInfo, ImageType};

const IMAGES_DIR: &str = "images";
const LAYERS_DIR: &str = "layers";
const STAGING_DIR: &str = "staging";

/// Persisted description of one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Layer IDs, lowest layer first.
    pub layers: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<serde_json::Value>,
}

/// Local directory store for a single image type.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    image_type: ImageType,
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(image_type: ImageType, root: impl Into<PathBuf>) -> Self {
        Self {
            image_type,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    /// Directory holding the unpacked contents of a layer.
    pub fn layer_dir(&self, layer_id: &str) -> PathBuf {
        self.root.join(LAYERS_DIR).join(layer_id)
    }

    fn record_path(&self, reference: &str) -> PathBuf {
        self.root
            .join(IMAGES_DIR)
            .join(format!("{}.json", sanitize_reference(reference)))
    }

    /// Publish an image record. The record is staged first and renamed into
    /// place so readers never observe a partial file.
    pub async fn put(&self, reference: &str, record: &ImageRecord) -> Result<()> {
        let staging = self.root.join(STAGING_DIR);
        fs::create_dir_all(&staging).await?;
        fs::create_dir_all(self.root.join(IMAGES_DIR)).await?;

        let final_path = self.record_path(reference);
        let staged = staging.join(format!("{}.json", sanitize_reference(reference)));

        fs::write(&staged, serde_json::to_vec_pretty(record)?)
            .await
            .with_context(|| format!("failed to stage image record '{}'", staged.display()))?;
        fs::rename(&staged, &final_path)
            .await
            .with_context(|| format!("failed to publish image record '{}'", final_path.display()))?;

        debug!(reference = %reference, layers = record.layers.len(), "Stored image record");
        Ok(())
    }
}

#[async_trait]
impl Store for DirectoryStore {
    async fn get(&self, image: &Image) -> Result<ImageInfo> {
        if image.image_type != self.image_type {
            bail!(
                "{} store cannot resolve {} image '{}'",
                self.image_type,
                image.image_type,
                image.reference
            );
        }

        let record_path = self.record_path(&image.reference);
        let bytes = fs::read(&record_path)
            .await
            .with_context(|| format!("image '{}' not found in store", image.reference))?;
        let record: ImageRecord = serde_json::from_slice(&bytes)
            .with_context(|| format!("malformed image record '{}'", record_path.display()))?;

        let mut layers = Vec::with_capacity(record.layers.len());
        for layer_id in &record.layers {
            if layer_id.is_empty()
                || layer_id.contains('/')
                || layer_id == "."
                || layer_id == ".."
            {
                bail!("invalid layer id '{}' in image '{}'", layer_id, image.reference);
            }

            let dir = self.layer_dir(layer_id);
            let metadata = fs::metadata(&dir)
                .await
                .with_context(|| format!("layer '{}' is missing from the store", layer_id))?;
            if !metadata.is_dir() {
                bail!("layer '{}' is not a directory", dir.display());
            }
            layers.push(dir);
        }

        let (docker_manifest, appc_manifest) = match self.image_type {
            ImageType::Docker => (record.manifest, None),
            ImageType::Appc => (None, record.manifest),
        };

        Ok(ImageInfo {
            layers,
            docker_manifest,
            appc_manifest,
        })
    }

    async fn recover(&self) -> Result<()> {
        for dir in [IMAGES_DIR, LAYERS_DIR, STAGING_DIR] {
            let path = self.root.join(dir);
            fs::create_dir_all(&path)
                .await
                .with_context(|| format!("failed to create '{}'", path.display()))?;
        }

        // Anything left in staging belongs to an import that never finished.
        let staging = self.root.join(STAGING_DIR);
        let mut entries = fs::read_dir(&staging).await?;
        let mut purged = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let removed = if entry.file_type().await?.is_dir() {
                fs::remove_dir_all(&path).await
            } else {
                fs::remove_file(&path).await
            };
            removed.with_context(|| format!("failed to purge staged entry '{}'", path.display()))?;
            purged += 1;
        }

        info!(
            image_type = %self.image_type,
            root = %self.root.display(),
            purged,
            "Recovered image store"
        );
        Ok(())
    }
}

/// Make an image reference safe to use as a file name.
fn sanitize_reference(reference: &str) -> String {
    reference.replace([':', '/', '@'], "_")
}
