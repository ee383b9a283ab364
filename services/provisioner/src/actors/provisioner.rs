//! Provisioner actor - owns the record of which rootfses exist for which
//! container.
//!
//! All bookkeeping happens inside `handle`, one message at a time. Slow work
//! (store lookups, backend composition and teardown, whiteout resolution,
//! directory removal) runs on spawned tasks. The only result that must come
//! back to the actor is a resolved image, because the rootfs reservation is
//! made after it; it re-enters the mailbox as `ImageResolved`.
//!
//! ## Ordering guarantees
//!
//! - A provision registers its rootfs before the backend starts composing it.
//! - A destroy unregisters the container before any physical cleanup, so a
//!   concurrent destroy of the same container is a no-op returning `false`.
//! - Recovery unregisters orphans children-first and tears them down level
//!   by level, deepest first.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{try_join, try_join_all};
use strata_id::{ContainerId, RootfsId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::framework::{Actor, ActorContext, ActorError, WeakActorHandle};
use crate::backend::Backend;
use crate::error::{PreconditionViolation, ProvisionerError, Result};
use crate::image::{Image, ImageInfo, ImageType, ProvisionInfo};
use crate::metrics::ProvisionerMetrics;
use crate::paths::{self, PathsError};
use crate::store::Store;
use crate::whiteout;

// =============================================================================
// Messages
// =============================================================================

/// Messages handled by ProvisionerActor.
#[derive(Debug)]
pub enum ProvisionerMessage {
    /// Rebuild bookkeeping from disk and destroy containers not in `known`.
    Recover {
        known: HashSet<ContainerId>,
        reply_to: oneshot::Sender<Result<()>>,
    },

    /// Compose a new rootfs for a container.
    Provision {
        container_id: ContainerId,
        image: Image,
        reply_to: oneshot::Sender<Result<ProvisionInfo>>,
    },

    /// Destroy every rootfs of a container.
    Destroy {
        container_id: ContainerId,
        reply_to: oneshot::Sender<Result<bool>>,
    },

    /// A store finished resolving the image of a pending provision.
    ImageResolved {
        container_id: ContainerId,
        image: Image,
        resolved: Result<ImageInfo>,
        reply_to: oneshot::Sender<Result<ProvisionInfo>>,
    },

    /// Copy of the current bookkeeping.
    Containers {
        reply_to: oneshot::Sender<HashMap<ContainerId, Info>>,
    },
}

// =============================================================================
// Actor State
// =============================================================================

/// Rootfses provisioned for one container, by backend name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Info {
    pub rootfses: HashMap<String, HashSet<RootfsId>>,
}

impl Info {
    /// Total number of rootfses across all backends.
    pub fn rootfs_count(&self) -> usize {
        self.rootfses.values().map(HashSet::len).sum()
    }
}

/// Physical cleanup of a container that has already been unregistered.
struct Teardown {
    container_id: ContainerId,
    container_dir: PathBuf,
    rootfses: Vec<RootfsTeardown>,
    metrics: Arc<ProvisionerMetrics>,
}

struct RootfsTeardown {
    backend: Arc<dyn Backend>,
    rootfs: PathBuf,
    work_dir: PathBuf,
}

impl Teardown {
    /// Destroys all rootfses concurrently, then removes the container
    /// directory. A failed directory removal is counted but not returned;
    /// the next recovery finds the directory and retries.
    async fn run(self) -> Result<bool> {
        let destroys = self.rootfses.into_iter().map(|entry| {
            info!(
                container_id = %self.container_id,
                rootfs = %entry.rootfs.display(),
                "Destroying container rootfs"
            );
            joined(tokio::spawn(async move {
                entry
                    .backend
                    .destroy(&entry.rootfs, &entry.work_dir)
                    .await
                    .map_err(ProvisionerError::Backend)
            }))
        });
        try_join_all(destroys).await?;

        match tokio::fs::remove_dir_all(&self.container_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                error!(
                    container_id = %self.container_id,
                    dir = %self.container_dir.display(),
                    error = %e,
                    "Failed to remove the provisioned container directory"
                );
                self.metrics.record_remove_container_error();
            }
        }

        Ok(true)
    }
}

// =============================================================================
// Provisioner Actor
// =============================================================================

/// Actor owning the container → rootfs bookkeeping.
pub struct ProvisionerActor {
    /// Canonical root of the on-disk layout.
    root_dir: PathBuf,

    stores: HashMap<ImageType, Arc<dyn Store>>,

    backends: HashMap<String, Arc<dyn Backend>>,

    /// Backend used for every provision.
    default_backend: String,

    infos: HashMap<ContainerId, Info>,

    metrics: Arc<ProvisionerMetrics>,

    /// Own mailbox, for continuations.
    mailbox: Option<WeakActorHandle<ProvisionerMessage>>,
}

impl ProvisionerActor {
    /// Create a provisioner actor. Callers validate that `default_backend`
    /// is one of `backends`.
    pub fn new(
        root_dir: PathBuf,
        stores: HashMap<ImageType, Arc<dyn Store>>,
        backends: HashMap<String, Arc<dyn Backend>>,
        default_backend: String,
        metrics: Arc<ProvisionerMetrics>,
    ) -> Self {
        Self {
            root_dir,
            stores,
            backends,
            default_backend,
            infos: HashMap::new(),
            metrics,
            mailbox: None,
        }
    }

    pub fn container_count(&self) -> usize {
        self.infos.len()
    }

    // -------------------------------------------------------------------------
    // Message Handlers
    // -------------------------------------------------------------------------

    async fn handle_recover(
        &mut self,
        known: HashSet<ContainerId>,
        reply_to: oneshot::Sender<Result<()>>,
    ) {
        let root = self.root_dir.clone();
        let scanned = match tokio::task::spawn_blocking(move || scan_layout(&root)).await {
            Ok(Ok(scanned)) => scanned,
            Ok(Err(e)) => {
                error!(error = %e, "Failed to list the containers managed by the provisioner");
                let _ = reply_to.send(Err(e.into()));
                return;
            }
            Err(e) => {
                let _ = reply_to.send(Err(e.into()));
                return;
            }
        };

        // The whole layout is checked before anything is registered.
        for (container_id, rootfses) in &scanned {
            if let Some(backend) = rootfses.keys().find(|b| !self.backends.contains_key(*b)) {
                error!(
                    container_id = %container_id,
                    backend = %backend,
                    "Found rootfses managed by an unrecognized backend"
                );
                let _ = reply_to.send(Err(ProvisionerError::UnrecognizedBackend {
                    container_id: container_id.clone(),
                    backend: backend.clone(),
                }));
                return;
            }
        }

        let mut unknown = Vec::new();
        for (container_id, rootfses) in scanned {
            if known.contains(&container_id) {
                info!(container_id = %container_id, "Recovered container");
            } else {
                unknown.push(container_id.clone());
            }
            self.infos.insert(container_id, Info { rootfses });
        }

        // Children before parents, so the parent check in `begin_destroy`
        // holds for orphaned subtrees.
        unknown.sort_by_key(|id| std::cmp::Reverse(id.depth()));

        let mut waves: BTreeMap<usize, Vec<Teardown>> = BTreeMap::new();
        for container_id in unknown {
            info!(container_id = %container_id, "Cleaning up unknown container");
            match self.begin_destroy(&container_id) {
                Ok(Some(teardown)) => waves.entry(container_id.depth()).or_default().push(teardown),
                Ok(None) => {}
                Err(e) => {
                    let _ = reply_to.send(Err(e));
                    return;
                }
            }
        }

        let cleanup = async move {
            for (depth, wave) in waves.into_iter().rev() {
                debug!(depth, count = wave.len(), "Destroying orphaned containers");
                try_join_all(wave.into_iter().map(|t| joined(tokio::spawn(t.run())))).await?;
            }
            Ok::<(), ProvisionerError>(())
        };

        let store_recovery = try_join_all(self.stores.iter().map(|(image_type, store)| {
            let image_type = *image_type;
            let store = Arc::clone(store);
            joined(tokio::spawn(async move {
                store.recover().await.map_err(|e| {
                    ProvisionerError::Store(e.context(format!("failed to recover {image_type} store")))
                })
            }))
        }));

        // TODO: recover stores only after orphan cleanup once stores start
        // garbage-collecting layers that orphans may still reference.
        tokio::spawn(async move {
            let result = try_join(cleanup, store_recovery).await.map(|_| ());
            match &result {
                Ok(()) => info!("Provisioner recovery complete"),
                Err(e) => error!(error = %e, "Provisioner recovery failed"),
            }
            let _ = reply_to.send(result);
        });
    }

    fn handle_provision(
        &mut self,
        container_id: ContainerId,
        image: Image,
        reply_to: oneshot::Sender<Result<ProvisionInfo>>,
    ) {
        let Some(store) = self.stores.get(&image.image_type).cloned() else {
            warn!(container_id = %container_id, image = %image, "Unsupported container image type");
            let _ = reply_to.send(Err(ProvisionerError::UnsupportedImageType(image.image_type)));
            return;
        };

        let Some(mailbox) = self.mailbox.as_ref().and_then(WeakActorHandle::upgrade) else {
            let _ = reply_to.send(Err(ProvisionerError::Terminated));
            return;
        };

        debug!(container_id = %container_id, image = %image, "Resolving image");

        tokio::spawn(async move {
            let resolved = store.get(&image).await.map_err(ProvisionerError::Store);
            let msg = ProvisionerMessage::ImageResolved {
                container_id,
                image,
                resolved,
                reply_to,
            };
            // On failure the message, and with it the reply channel, is
            // dropped; the caller then sees the provisioner as terminated.
            if mailbox.send(msg).await.is_err() {
                warn!("Provisioner stopped before image resolution completed");
            }
        });
    }

    fn handle_image_resolved(
        &mut self,
        container_id: ContainerId,
        image: Image,
        resolved: Result<ImageInfo>,
        reply_to: oneshot::Sender<Result<ProvisionInfo>>,
    ) {
        let image_info = match resolved {
            Ok(image_info) => image_info,
            Err(e) => {
                warn!(container_id = %container_id, image = %image, error = %e, "Failed to resolve image");
                let _ = reply_to.send(Err(e));
                return;
            }
        };

        let backend_name = self.default_backend.clone();
        let Some(backend) = self.backends.get(&backend_name).cloned() else {
            let _ = reply_to.send(Err(ProvisionerError::UnknownBackend(backend_name)));
            return;
        };

        let rootfs_id = RootfsId::new();
        let rootfs = paths::rootfs_dir(&self.root_dir, &container_id, &backend_name, &rootfs_id);
        let work_dir = paths::backend_dir(&self.root_dir, &container_id, &backend_name);

        info!(
            container_id = %container_id,
            rootfs = %rootfs.display(),
            backend = %backend_name,
            "Provisioning image rootfs"
        );

        // A container may provision several images.
        self.infos
            .entry(container_id.clone())
            .or_default()
            .rootfses
            .entry(backend_name)
            .or_default()
            .insert(rootfs_id);

        tokio::spawn(async move {
            let result = compose(backend, &image, image_info, rootfs, work_dir).await;
            if let Err(e) = &result {
                warn!(container_id = %container_id, error = %e, "Failed to provision rootfs");
            }
            let _ = reply_to.send(result);
        });
    }

    fn handle_destroy(&mut self, container_id: ContainerId, reply_to: oneshot::Sender<Result<bool>>) {
        match self.begin_destroy(&container_id) {
            Ok(Some(teardown)) => {
                tokio::spawn(async move {
                    let _ = reply_to.send(teardown.run().await);
                });
            }
            Ok(None) => {
                let _ = reply_to.send(Ok(false));
            }
            Err(e) => {
                let _ = reply_to.send(Err(e));
            }
        }
    }

    /// The synchronous half of a destroy: checks, then unregisters.
    ///
    /// Returns `None` for containers that are not registered.
    fn begin_destroy(&mut self, container_id: &ContainerId) -> Result<Option<Teardown>> {
        if !self.infos.contains_key(container_id) {
            debug!(container_id = %container_id, "Ignoring destroy request for unknown container");
            return Ok(None);
        }

        if let Some(child) = self.infos.keys().find(|id| id.parent() == Some(container_id)) {
            let violation = PreconditionViolation::ChildNotDestroyed {
                container: container_id.clone(),
                child: child.clone(),
            };
            error!(error = %violation, "Refusing to destroy container with live nested container");
            return Err(violation.into());
        }

        let Some(info) = self.infos.remove(container_id) else {
            return Ok(None);
        };

        let mut rootfses = Vec::with_capacity(info.rootfs_count());
        for (backend_name, ids) in info.rootfses {
            let backend = self
                .backends
                .get(&backend_name)
                .cloned()
                .ok_or_else(|| ProvisionerError::UnknownBackend(backend_name.clone()))?;
            let work_dir = paths::backend_dir(&self.root_dir, container_id, &backend_name);

            for rootfs_id in ids {
                rootfses.push(RootfsTeardown {
                    backend: Arc::clone(&backend),
                    rootfs: paths::rootfs_dir(&self.root_dir, container_id, &backend_name, &rootfs_id),
                    work_dir: work_dir.clone(),
                });
            }
        }

        Ok(Some(Teardown {
            container_id: container_id.clone(),
            container_dir: paths::container_dir(&self.root_dir, container_id),
            rootfses,
            metrics: Arc::clone(&self.metrics),
        }))
    }
}

#[async_trait]
impl Actor for ProvisionerActor {
    type Message = ProvisionerMessage;

    fn name(&self) -> &str {
        "provisioner"
    }

    fn bind(&mut self, mailbox: WeakActorHandle<ProvisionerMessage>) {
        self.mailbox = Some(mailbox);
    }

    async fn handle(
        &mut self,
        msg: ProvisionerMessage,
        _ctx: &mut ActorContext,
    ) -> std::result::Result<bool, ActorError> {
        match msg {
            ProvisionerMessage::Recover { known, reply_to } => {
                self.handle_recover(known, reply_to).await;
            }

            ProvisionerMessage::Provision {
                container_id,
                image,
                reply_to,
            } => {
                self.handle_provision(container_id, image, reply_to);
            }

            ProvisionerMessage::ImageResolved {
                container_id,
                image,
                resolved,
                reply_to,
            } => {
                self.handle_image_resolved(container_id, image, resolved, reply_to);
            }

            ProvisionerMessage::Destroy {
                container_id,
                reply_to,
            } => {
                self.handle_destroy(container_id, reply_to);
            }

            ProvisionerMessage::Containers { reply_to } => {
                let _ = reply_to.send(self.infos.clone());
            }
        }

        Ok(true)
    }

    async fn on_start(&mut self, _ctx: &mut ActorContext) -> std::result::Result<(), ActorError> {
        let mut image_types: Vec<_> = self.stores.keys().map(|t| t.as_str()).collect();
        image_types.sort_unstable();

        info!(
            root_dir = %self.root_dir.display(),
            backend = %self.default_backend,
            image_types = ?image_types,
            "ProvisionerActor starting"
        );
        Ok(())
    }

    async fn on_stop(&mut self, _ctx: &mut ActorContext) {
        info!(containers = self.infos.len(), "ProvisionerActor stopping");
    }
}

// =============================================================================
// Helpers
// =============================================================================

type Scan = Vec<(ContainerId, HashMap<String, HashSet<RootfsId>>)>;

fn scan_layout(root: &std::path::Path) -> std::result::Result<Scan, PathsError> {
    paths::list_containers(root)?
        .into_iter()
        .map(|id| -> std::result::Result<_, PathsError> {
            let rootfses = paths::list_container_rootfses(root, &id)?;
            Ok((id, rootfses))
        })
        .collect()
}

/// Compose a rootfs and resolve its whiteouts.
async fn compose(
    backend: Arc<dyn Backend>,
    image: &Image,
    image_info: ImageInfo,
    rootfs: PathBuf,
    work_dir: PathBuf,
) -> Result<ProvisionInfo> {
    backend
        .provision(&image_info.layers, &rootfs, &work_dir)
        .await
        .map_err(ProvisionerError::Backend)?;

    // Single-layer images have nothing to merge.
    if image.image_type.has_whiteouts() && image_info.layers.len() > 1 {
        let target = rootfs.clone();
        tokio::task::spawn_blocking(move || whiteout::resolve(&target)).await??;
    }

    Ok(ProvisionInfo {
        rootfs,
        docker_manifest: image_info.docker_manifest,
        appc_manifest: image_info.appc_manifest,
    })
}

/// Flatten a spawned task's result.
async fn joined<T>(task: JoinHandle<Result<T>>) -> Result<T> {
    task.await?
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use crate::store::MockStore;
    use tempfile::TempDir;

    fn cid(s: &str) -> ContainerId {
        s.parse().unwrap()
    }

    fn actor(root: &std::path::Path) -> ProvisionerActor {
        let mut stores: HashMap<ImageType, Arc<dyn Store>> = HashMap::new();
        stores.insert(ImageType::Docker, Arc::new(MockStore::default()));
        let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
        backends.insert("mock".to_string(), Arc::new(MockBackend::new()));

        ProvisionerActor::new(
            root.to_path_buf(),
            stores,
            backends,
            "mock".to_string(),
            Arc::new(ProvisionerMetrics::new()),
        )
    }

    #[test]
    fn test_info_rootfs_count() {
        let mut info = Info::default();
        info.rootfses
            .entry("copy".to_string())
            .or_default()
            .extend([RootfsId::new(), RootfsId::new()]);
        info.rootfses.entry("bind".to_string()).or_default();
        assert_eq!(info.rootfs_count(), 2);
    }

    #[test]
    fn test_begin_destroy_unknown_container() {
        let tmp = TempDir::new().unwrap();
        let mut actor = actor(tmp.path());
        assert!(actor.begin_destroy(&cid("ghost")).unwrap().is_none());
    }

    #[test]
    fn test_begin_destroy_unregisters_first() {
        let tmp = TempDir::new().unwrap();
        let mut actor = actor(tmp.path());
        let mut info = Info::default();
        info.rootfses
            .entry("mock".to_string())
            .or_default()
            .insert(RootfsId::new());
        actor.infos.insert(cid("web"), info);

        let teardown = actor.begin_destroy(&cid("web")).unwrap().unwrap();
        assert_eq!(teardown.rootfses.len(), 1);
        assert_eq!(actor.container_count(), 0);
        assert!(actor.begin_destroy(&cid("web")).unwrap().is_none());
    }

    #[test]
    fn test_begin_destroy_with_live_child() {
        let tmp = TempDir::new().unwrap();
        let mut actor = actor(tmp.path());
        actor.infos.insert(cid("parent"), Info::default());
        actor.infos.insert(cid("parent.child"), Info::default());

        let err = actor.begin_destroy(&cid("parent")).err().unwrap();
        assert!(err.is_precondition_violation());
        assert_eq!(actor.container_count(), 2);
    }

    #[test]
    fn test_begin_destroy_unknown_backend() {
        let tmp = TempDir::new().unwrap();
        let mut actor = actor(tmp.path());
        let mut info = Info::default();
        info.rootfses
            .entry("overlay".to_string())
            .or_default()
            .insert(RootfsId::new());
        actor.infos.insert(cid("web"), info);

        let err = actor.begin_destroy(&cid("web")).err().unwrap();
        assert!(matches!(err, ProvisionerError::UnknownBackend(name) if name == "overlay"));
    }

    #[tokio::test]
    async fn test_spawned_actor_answers_with_several_stores() {
        let tmp = TempDir::new().unwrap();
        let mut actor = actor(tmp.path());
        actor
            .stores
            .insert(ImageType::Appc, Arc::new(MockStore::default()));

        let (handle, actor_ref) = crate::actors::spawn(actor, 4);
        let containers = handle
            .request(|reply_to| ProvisionerMessage::Containers { reply_to })
            .await
            .unwrap();
        assert!(containers.is_empty());

        actor_ref.shutdown().await;
    }
}
