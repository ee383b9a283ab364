//! Rootfs backends.
//!
//! A backend stacks an image's layer directories into a target rootfs
//! directory and later tears it down again. Backends are registered by name
//! and the provisioner uses the single configured one for every image.
//!
//! - `CopyBackend` (`copy`): copies each layer over the previous ones
//! - `MockBackend`: counters, delays and failure injection for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

mod copy;
mod mock;

pub use copy::CopyBackend;
pub use mock::MockBackend;

/// Rootfs backend interface.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Compose `rootfs` from `layers`, lowest layer first. `work_dir` is
    /// private to this backend and shared by all rootfses of one container.
    async fn provision(&self, layers: &[PathBuf], rootfs: &Path, work_dir: &Path) -> Result<()>;

    /// Release everything held for `rootfs`. Returns whether anything was
    /// there to release.
    async fn destroy(&self, rootfs: &Path, work_dir: &Path) -> Result<bool>;
}

/// Backends usable on this host, keyed by name.
pub fn builtin_backends() -> HashMap<String, Arc<dyn Backend>> {
    let mut backends: HashMap<String, Arc<dyn Backend>> = HashMap::new();
    backends.insert(CopyBackend::NAME.to_string(), Arc::new(CopyBackend::new()));
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_backends_include_copy() {
        let backends = builtin_backends();
        assert!(backends.contains_key("copy"));
    }
}
