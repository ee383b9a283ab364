//! Mock backend for testing and development.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use super::copy::copy_layers;
use super::Backend;

/// Backend with counters and failure injection.
///
/// By default `provision` only creates the rootfs directory. With
/// [`MockBackend::materializing`] it copies layer contents the way the copy
/// backend does, which is what whiteout tests need.
#[derive(Default)]
pub struct MockBackend {
    materialize: bool,

    fail_provision: bool,

    fail_destroy: bool,

    delay: Duration,

    provision_calls: AtomicUsize,

    destroy_calls: AtomicUsize,

    destroyed: Mutex<Vec<PathBuf>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend that copies layer contents into the rootfs.
    pub fn materializing() -> Self {
        Self {
            materialize: true,
            ..Self::default()
        }
    }

    /// A backend whose `provision` always fails.
    pub fn failing_provision() -> Self {
        Self {
            fail_provision: true,
            ..Self::default()
        }
    }

    /// A backend whose `destroy` always fails.
    pub fn failing_destroy() -> Self {
        Self {
            fail_destroy: true,
            ..Self::default()
        }
    }

    /// Simulate slow I/O in both operations.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn provision_calls(&self) -> usize {
        self.provision_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// Rootfs paths passed to `destroy`, in call order.
    pub fn destroyed(&self) -> Vec<PathBuf> {
        self.destroyed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn provision(&self, layers: &[PathBuf], rootfs: &Path, work_dir: &Path) -> Result<()> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        info!(
            rootfs = %rootfs.display(),
            work_dir = %work_dir.display(),
            layer_count = layers.len(),
            "[MOCK] Provisioning rootfs"
        );

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_provision {
            anyhow::bail!("Mock backend configured to fail provision");
        }

        tokio::fs::create_dir_all(rootfs)
            .await
            .with_context(|| format!("failed to create '{}'", rootfs.display()))?;

        if self.materialize {
            let layers = layers.to_vec();
            let rootfs = rootfs.to_path_buf();
            tokio::task::spawn_blocking(move || copy_layers(&layers, &rootfs)).await??;
        }

        Ok(())
    }

    async fn destroy(&self, rootfs: &Path, _work_dir: &Path) -> Result<bool> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.destroyed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(rootfs.to_path_buf());
        debug!(rootfs = %rootfs.display(), "[MOCK] Destroying rootfs");

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.fail_destroy {
            anyhow::bail!("Mock backend configured to fail destroy");
        }

        match tokio::fs::remove_dir_all(rootfs).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
