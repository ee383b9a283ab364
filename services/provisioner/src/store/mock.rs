//! Mock store for testing and development.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use super::Store;
use crate::image::{Image, ImageInfo};

/// Store returning a fixed [`ImageInfo`] for every image.
pub struct MockStore {
    info: Mutex<ImageInfo>,

    fail_get: bool,

    fail_recover: bool,

    get_calls: AtomicUsize,

    recover_calls: AtomicUsize,
}

impl MockStore {
    pub fn new(info: ImageInfo) -> Self {
        Self {
            info: Mutex::new(info),
            fail_get: false,
            fail_recover: false,
            get_calls: AtomicUsize::new(0),
            recover_calls: AtomicUsize::new(0),
        }
    }

    /// A store whose `get` always fails.
    pub fn failing_get() -> Self {
        Self {
            fail_get: true,
            ..Self::new(ImageInfo::default())
        }
    }

    /// A store whose `recover` always fails.
    pub fn failing_recover() -> Self {
        Self {
            fail_recover: true,
            ..Self::new(ImageInfo::default())
        }
    }

    /// Replace the info returned by subsequent `get` calls.
    pub fn set_info(&self, info: ImageInfo) {
        *self.info.lock().unwrap_or_else(|e| e.into_inner()) = info;
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn recover_calls(&self) -> usize {
        self.recover_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new(ImageInfo::default())
    }
}

#[async_trait]
impl Store for MockStore {
    async fn get(&self, image: &Image) -> Result<ImageInfo> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        debug!(image = %image, "[MOCK] Resolving image");

        if self.fail_get {
            anyhow::bail!("Mock store configured to fail get");
        }

        Ok(self.info.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn recover(&self) -> Result<()> {
        self.recover_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_recover {
            anyhow::bail!("Mock store configured to fail recover");
        }

        Ok(())
    }
}
