//! Provisioner counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the provisioner actor and its cleanup tasks.
#[derive(Debug, Default)]
pub struct ProvisionerMetrics {
    /// Failed removals of a destroyed container's directory.
    remove_container_errors: AtomicU64,
}

impl ProvisionerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_remove_container_error(&self) {
        self.remove_container_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Total failed container directory removals since startup.
    pub fn remove_container_errors(&self) -> u64 {
        self.remove_container_errors.load(Ordering::Relaxed)
    }
}
