//! strata rootfs provisioner
//!
//! Composes a root filesystem for each container from the layers of its
//! image, keeps track of every rootfs it hands out, and tears them down when
//! the container goes away or turns out to be unknown after a restart.
//!
//! ## Architecture
//!
//! ```text
//! Provisioner (facade)
//! └── ProvisionerActor            (container → rootfs bookkeeping)
//!     ├── Store per image type    (image → unpacked layers)
//!     ├── Backend per name        (layers → rootfs directory)
//!     └── whiteout::resolve       (docker layer deletions)
//! ```
//!
//! ## Modules
//!
//! - `actors`: Actor framework and the provisioner actor
//! - `backend`: Rootfs backends
//! - `store`: Image stores
//! - `paths`: On-disk layout of provisioned rootfses
//! - `whiteout`: Layer deletion markers

pub mod actors;
pub mod backend;
pub mod config;
pub mod error;
pub mod image;
pub mod metrics;
pub mod paths;
pub mod store;
pub mod whiteout;

mod provisioner;

// Re-export commonly used types
pub use actors::Info;
pub use backend::{Backend, CopyBackend, MockBackend};
pub use config::Config;
pub use error::{PreconditionViolation, ProvisionerError, Result};
pub use image::{Image, ImageInfo, ImageType, ProvisionInfo};
pub use provisioner::Provisioner;
pub use store::{DirectoryStore, MockStore, Store};
pub use strata_id::{ContainerId, RootfsId};
