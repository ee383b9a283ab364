//! Shared fixtures for the provisioner integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use strata_provisioner::{Backend, ContainerId, ImageType, MockBackend, MockStore, Provisioner, Store};
use tempfile::TempDir;

pub const BACKEND: &str = "mock";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn cid(s: &str) -> ContainerId {
    s.parse().unwrap()
}

pub fn write(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A provisioner over mock collaborators in a scratch directory.
pub struct Harness {
    pub tmp: TempDir,
    pub store: Arc<MockStore>,
    pub backend: Arc<MockBackend>,
    pub provisioner: Provisioner,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MockStore::default(), MockBackend::new())
    }

    pub fn with(store: MockStore, backend: MockBackend) -> Self {
        init_tracing();
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(store);
        let backend = Arc::new(backend);
        let provisioner = start(&root_of(&tmp), &store, &backend, &[ImageType::Docker]);

        Self {
            tmp,
            store,
            backend,
            provisioner,
        }
    }

    pub fn root(&self) -> PathBuf {
        root_of(&self.tmp)
    }

    /// Stop the provisioner and start a new one over the same directory,
    /// as after an agent restart.
    pub async fn restart(self, store: MockStore, backend: MockBackend) -> Self {
        self.provisioner.shutdown().await;

        let store = Arc::new(store);
        let backend = Arc::new(backend);
        let provisioner = start(&root_of(&self.tmp), &store, &backend, &[ImageType::Docker]);

        Self {
            tmp: self.tmp,
            store,
            backend,
            provisioner,
        }
    }
}

fn root_of(tmp: &TempDir) -> PathBuf {
    tmp.path().join("provisioner")
}

pub fn start(
    root: &Path,
    store: &Arc<MockStore>,
    backend: &Arc<MockBackend>,
    image_types: &[ImageType],
) -> Provisioner {
    let mut stores: HashMap<ImageType, Arc<dyn Store>> = HashMap::new();
    for image_type in image_types {
        stores.insert(*image_type, store.clone());
    }

    let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
    backends.insert(BACKEND.to_string(), backend.clone());

    Provisioner::new(root, stores, backends, BACKEND).unwrap()
}
