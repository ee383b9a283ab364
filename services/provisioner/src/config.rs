//! Configuration for the provisioner.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::backend::CopyBackend;
use crate::image::ImageType;

/// Provisioner configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Agent work directory. The provisioner lives under `provisioner/`.
    pub work_dir: PathBuf,

    /// Backend used for every provision.
    pub image_provisioner_backend: String,

    /// Image types with a configured store.
    pub image_providers: Vec<ImageType>,

    /// Root of the image stores, one subdirectory per image type.
    pub store_dir: PathBuf,

    /// Capacity of the provisioner actor's mailbox.
    pub mailbox_size: usize,
}

impl Config {
    /// Defaults rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            store_dir: work_dir.join("store"),
            work_dir,
            image_provisioner_backend: CopyBackend::NAME.to_string(),
            image_providers: vec![ImageType::Docker],
            mailbox_size: 256,
        }
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let work_dir = lookup("STRATA_WORK_DIR").unwrap_or_else(|| "/var/lib/strata".to_string());
        let mut config = Self::new(work_dir);

        if let Some(backend) = lookup("STRATA_IMAGE_PROVISIONER_BACKEND") {
            config.image_provisioner_backend = backend;
        }

        if let Some(providers) = lookup("STRATA_IMAGE_PROVIDERS") {
            config.image_providers = parse_providers(&providers)?;
        }

        if let Some(store_dir) = lookup("STRATA_STORE_DIR") {
            config.store_dir = PathBuf::from(store_dir);
        }

        if let Some(mailbox) = lookup("STRATA_ACTOR_MAILBOX") {
            config.mailbox_size = mailbox
                .parse()
                .with_context(|| format!("invalid STRATA_ACTOR_MAILBOX '{mailbox}'"))?;
        }

        Ok(config)
    }

    /// Root of the on-disk container layout.
    pub fn provisioner_dir(&self) -> PathBuf {
        self.work_dir.join("provisioner")
    }

    /// Store directory for one image type.
    pub fn store_dir_for(&self, image_type: ImageType) -> PathBuf {
        self.store_dir.join(image_type.as_str())
    }
}

fn parse_providers(value: &str) -> Result<Vec<ImageType>> {
    let mut providers = Vec::new();
    for entry in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let image_type: ImageType = entry
            .parse()
            .with_context(|| format!("invalid STRATA_IMAGE_PROVIDERS entry '{entry}'"))?;
        if !providers.contains(&image_type) {
            providers.push(image_type);
        }
    }
    Ok(providers)
}
