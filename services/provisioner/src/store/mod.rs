//! Image stores.
//!
//! A store resolves an image reference to locally available, unpacked layer
//! directories plus manifest metadata. There is one store per image type.
//!
//! - `DirectoryStore`: layers already unpacked under a local directory
//! - `MockStore`: canned results and failure injection for tests

use anyhow::Result;
use async_trait::async_trait;

use crate::image::{Image, ImageInfo};

mod directory;
mod mock;

pub use directory::{DirectoryStore, ImageRecord};
pub use mock::MockStore;

/// Image store interface.
#[async_trait]
pub trait Store: Send + Sync {
    /// Resolve an image to its ordered layers and manifests.
    async fn get(&self, image: &Image) -> Result<ImageInfo>;

    /// Startup reconciliation of the store's own state. Must be idempotent.
    async fn recover(&self) -> Result<()>;
}
