//! Public entry point.
//!
//! `Provisioner` owns the provisioner actor and turns each call into a
//! request/reply exchange with it. Cloning is not supported: there is one
//! owner, and dropping it stops the actor.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_id::ContainerId;
use tracing::info;

use crate::actors::{self, ActorHandle, ActorRef, Info, ProvisionerActor, ProvisionerMessage};
use crate::backend::{builtin_backends, Backend};
use crate::config::Config;
use crate::error::{ProvisionerError, Result};
use crate::image::{Image, ImageType, ProvisionInfo};
use crate::metrics::ProvisionerMetrics;
use crate::store::{DirectoryStore, Store};

const DEFAULT_MAILBOX_SIZE: usize = 256;

/// Rootfs provisioner for containers.
pub struct Provisioner {
    handle: ActorHandle<ProvisionerMessage>,

    actor: ActorRef,

    metrics: Arc<ProvisionerMetrics>,

    root_dir: PathBuf,
}

impl Provisioner {
    /// Build a provisioner from configuration.
    ///
    /// Creates `<work_dir>/provisioner` and uses its canonical path as the
    /// layout root, so rootfs paths handed out never contain symlinks.
    pub fn create(config: &Config) -> Result<Self> {
        let dir = config.provisioner_dir();
        std::fs::create_dir_all(&dir).map_err(|source| ProvisionerError::RootDir {
            path: dir.clone(),
            source,
        })?;
        let root_dir = dir
            .canonicalize()
            .map_err(|source| ProvisionerError::RootDir { path: dir, source })?;

        let mut stores: HashMap<ImageType, Arc<dyn Store>> = HashMap::new();
        for image_type in &config.image_providers {
            let store = DirectoryStore::new(*image_type, config.store_dir_for(*image_type));
            stores.insert(*image_type, Arc::new(store));
        }

        Self::start(
            root_dir,
            stores,
            builtin_backends(),
            &config.image_provisioner_backend,
            config.mailbox_size,
        )
    }

    /// Build a provisioner from explicit collaborators.
    pub fn new(
        root_dir: impl Into<PathBuf>,
        stores: HashMap<ImageType, Arc<dyn Store>>,
        backends: HashMap<String, Arc<dyn Backend>>,
        default_backend: &str,
    ) -> Result<Self> {
        Self::start(
            root_dir.into(),
            stores,
            backends,
            default_backend,
            DEFAULT_MAILBOX_SIZE,
        )
    }

    fn start(
        root_dir: PathBuf,
        stores: HashMap<ImageType, Arc<dyn Store>>,
        backends: HashMap<String, Arc<dyn Backend>>,
        default_backend: &str,
        mailbox_size: usize,
    ) -> Result<Self> {
        if backends.is_empty() {
            return Err(ProvisionerError::NoBackends);
        }
        if !backends.contains_key(default_backend) {
            return Err(ProvisionerError::UnsupportedBackend(
                default_backend.to_string(),
            ));
        }

        info!(
            root_dir = %root_dir.display(),
            backend = %default_backend,
            "Starting provisioner"
        );

        let metrics = Arc::new(ProvisionerMetrics::new());
        let actor = ProvisionerActor::new(
            root_dir.clone(),
            stores,
            backends,
            default_backend.to_string(),
            Arc::clone(&metrics),
        );
        let (handle, actor) = actors::spawn(actor, mailbox_size.max(1));

        Ok(Self {
            handle,
            actor,
            metrics,
            root_dir,
        })
    }

    /// Rebuild bookkeeping from disk after a restart.
    ///
    /// Containers on disk but not in `known` are destroyed. Fails if a
    /// container holds rootfses of a backend that is not configured.
    pub async fn recover(&self, known: HashSet<ContainerId>) -> Result<()> {
        self.handle
            .request(|reply_to| ProvisionerMessage::Recover { known, reply_to })
            .await
            .map_err(|_| ProvisionerError::Terminated)?
    }

    /// Compose a fresh rootfs of `image` for `container_id`.
    pub async fn provision(&self, container_id: ContainerId, image: Image) -> Result<ProvisionInfo> {
        self.handle
            .request(|reply_to| ProvisionerMessage::Provision {
                container_id,
                image,
                reply_to,
            })
            .await
            .map_err(|_| ProvisionerError::Terminated)?
    }

    /// Destroy every rootfs of `container_id`.
    ///
    /// Returns `false` if the container was not known. Nested containers
    /// must be destroyed before their parent.
    pub async fn destroy(&self, container_id: &ContainerId) -> Result<bool> {
        let container_id = container_id.clone();
        self.handle
            .request(|reply_to| ProvisionerMessage::Destroy {
                container_id,
                reply_to,
            })
            .await
            .map_err(|_| ProvisionerError::Terminated)?
    }

    /// Snapshot of the registered containers and their rootfses.
    pub async fn containers(&self) -> Result<HashMap<ContainerId, Info>> {
        self.handle
            .request(|reply_to| ProvisionerMessage::Containers { reply_to })
            .await
            .map_err(|_| ProvisionerError::Terminated)
    }

    /// Failed container directory removals since startup.
    pub fn remove_container_errors(&self) -> u64 {
        self.metrics.remove_container_errors()
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Stop the actor and wait for it to exit. Work already spawned by the
    /// actor keeps running to completion.
    pub async fn shutdown(self) {
        self.actor.shutdown().await;
    }
}
