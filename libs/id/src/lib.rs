//! # strata-id
//!
//! Identifiers used by the strata provisioner. Both kinds double as
//! directory names in the provisioner's on-disk layout, so parsing only
//! accepts strings that are a single safe path component per level.
//!
//! - `ContainerId`: caller-chosen, optionally nested (`pod.app`); one
//!   directory level per ancestor on disk
//! - `RootfsId`: minted by the provisioner, `rootfs_01HV4Z2WQXKJNM8GPQY6VBKC3D`

mod container;
mod error;
mod rootfs;

pub use container::{ContainerId, NESTING_SEPARATOR};
pub use error::IdError;
pub use rootfs::RootfsId;
