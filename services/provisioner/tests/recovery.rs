//! Integration tests for recovery after an agent restart.

mod common;

use std::collections::HashSet;
use std::fs;

use common::{cid, Harness, BACKEND};
use strata_provisioner::paths;
use strata_provisioner::{
    ContainerId, Image, MockBackend, MockStore, PreconditionViolation, ProvisionerError, RootfsId,
};

fn known(ids: &[&str]) -> HashSet<ContainerId> {
    ids.iter().map(|id| cid(id)).collect()
}

/// Lay out a rootfs on disk without going through a provisioner.
fn plant_rootfs(h: &Harness, container: &str, backend: &str) -> std::path::PathBuf {
    let rootfs = paths::rootfs_dir(&h.root(), &cid(container), backend, &RootfsId::new());
    fs::create_dir_all(&rootfs).unwrap();
    rootfs
}

#[tokio::test]
async fn test_recover_empty_root() {
    let h = Harness::new();

    h.provisioner.recover(HashSet::new()).await.unwrap();

    assert!(h.provisioner.containers().await.unwrap().is_empty());
    assert_eq!(h.store.recover_calls(), 1);
}

#[tokio::test]
async fn test_recover_registers_known_containers() {
    let h = Harness::new();
    for image in ["app", "sidecar"] {
        h.provisioner
            .provision(cid("web"), Image::docker(image))
            .await
            .unwrap();
    }

    let h = h.restart(MockStore::default(), MockBackend::new()).await;
    h.provisioner.recover(known(&["web"])).await.unwrap();

    let containers = h.provisioner.containers().await.unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[&cid("web")].rootfs_count(), 2);
    assert_eq!(h.backend.destroy_calls(), 0);

    // Recovered rootfses are destroyable like fresh ones.
    assert!(h.provisioner.destroy(&cid("web")).await.unwrap());
    assert_eq!(h.backend.destroy_calls(), 2);
}

#[tokio::test]
async fn test_recover_destroys_unknown_containers() {
    let h = Harness::new();
    h.provisioner
        .provision(cid("kept"), Image::docker("app"))
        .await
        .unwrap();
    let orphan = h
        .provisioner
        .provision(cid("orphan"), Image::docker("app"))
        .await
        .unwrap();

    let h = h.restart(MockStore::default(), MockBackend::new()).await;
    h.provisioner.recover(known(&["kept"])).await.unwrap();

    let containers = h.provisioner.containers().await.unwrap();
    assert_eq!(containers.keys().cloned().collect::<Vec<_>>(), vec![cid("kept")]);
    assert_eq!(h.backend.destroyed(), vec![orphan.rootfs]);
    assert!(!paths::container_dir(&h.root(), &cid("orphan")).exists());
    assert!(paths::container_dir(&h.root(), &cid("kept")).exists());
    assert_eq!(h.store.recover_calls(), 1);
}

#[tokio::test]
async fn test_recover_destroys_nested_orphans_children_first() {
    let h = Harness::new();
    let parent = plant_rootfs(&h, "pod", BACKEND);
    let child = plant_rootfs(&h, "pod.app", BACKEND);

    h.provisioner.recover(HashSet::new()).await.unwrap();

    assert!(h.provisioner.containers().await.unwrap().is_empty());
    assert_eq!(h.backend.destroyed(), vec![child, parent]);
    assert!(!paths::container_dir(&h.root(), &cid("pod")).exists());
}

#[tokio::test]
async fn test_recover_keeps_known_nested_containers() {
    let h = Harness::new();
    plant_rootfs(&h, "pod", BACKEND);
    plant_rootfs(&h, "pod.app", BACKEND);

    h.provisioner.recover(known(&["pod", "pod.app"])).await.unwrap();
    assert_eq!(h.provisioner.containers().await.unwrap().len(), 2);

    let err = h.provisioner.destroy(&cid("pod")).await.unwrap_err();
    assert!(err.is_precondition_violation());
}

#[tokio::test]
async fn test_recover_fails_on_known_child_of_unknown_parent() {
    let h = Harness::new();
    let parent = plant_rootfs(&h, "pod", BACKEND);
    let child = plant_rootfs(&h, "pod.app", BACKEND);

    let err = h.provisioner.recover(known(&["pod.app"])).await.unwrap_err();

    assert!(err.is_precondition_violation());
    assert!(matches!(
        err,
        ProvisionerError::Precondition(PreconditionViolation::ChildNotDestroyed { ref container, ref child })
            if *container == cid("pod") && *child == cid("pod.app")
    ));
    assert_eq!(h.backend.destroy_calls(), 0);
    assert!(parent.exists());
    assert!(child.exists());
}

#[tokio::test]
async fn test_recover_rejects_unrecognized_backend() {
    let h = Harness::new();
    plant_rootfs(&h, "web", BACKEND);
    plant_rootfs(&h, "db", "overlay");

    let err = h.provisioner.recover(known(&["web", "db"])).await.unwrap_err();

    assert!(matches!(
        err,
        ProvisionerError::UnrecognizedBackend { ref backend, .. } if backend == "overlay"
    ));
    assert!(h.provisioner.containers().await.unwrap().is_empty());
    assert_eq!(h.backend.destroy_calls(), 0);
}

#[tokio::test]
async fn test_recover_reports_backend_dir_without_rootfses() {
    let h = Harness::new();
    fs::create_dir_all(paths::backend_dir(&h.root(), &cid("web"), BACKEND)).unwrap();

    h.provisioner.recover(known(&["web"])).await.unwrap();

    let containers = h.provisioner.containers().await.unwrap();
    assert_eq!(containers[&cid("web")].rootfs_count(), 0);
    assert!(containers[&cid("web")].rootfses.contains_key(BACKEND));
}

#[tokio::test]
async fn test_recover_fails_when_store_recovery_fails() {
    let h = Harness::with(MockStore::failing_recover(), MockBackend::new());

    let err = h.provisioner.recover(HashSet::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionerError::Store(_)));
}

#[tokio::test]
async fn test_recover_fails_when_orphan_cleanup_fails() {
    let h = Harness::with(MockStore::default(), MockBackend::failing_destroy());
    plant_rootfs(&h, "orphan", BACKEND);

    let err = h.provisioner.recover(HashSet::new()).await.unwrap_err();

    assert!(matches!(err, ProvisionerError::Backend(_)));
    assert!(paths::container_dir(&h.root(), &cid("orphan")).exists());
}

#[tokio::test]
async fn test_destroyed_container_is_not_recovered() {
    let h = Harness::new();
    h.provisioner
        .provision(cid("web"), Image::docker("app"))
        .await
        .unwrap();
    assert!(h.provisioner.destroy(&cid("web")).await.unwrap());

    let h = h.restart(MockStore::default(), MockBackend::new()).await;
    h.provisioner.recover(known(&["web"])).await.unwrap();

    assert!(h.provisioner.containers().await.unwrap().is_empty());
    assert!(!h.provisioner.destroy(&cid("web")).await.unwrap());
}

#[tokio::test]
async fn test_recover_rejects_malformed_layout() {
    let h = Harness::new();
    fs::create_dir_all(h.root().join("containers").join("not a valid id")).unwrap();

    let err = h.provisioner.recover(HashSet::new()).await.unwrap_err();
    assert!(matches!(err, ProvisionerError::Layout(_)));
}
