//! Actor framework for the provisioner.
//!
//! The provisioner keeps its bookkeeping inside a single actor so that every
//! mutation happens in mailbox order, without locks. Anything slow is
//! spawned off the actor and reports back through the mailbox when it needs
//! to touch state again.
//!
//! ## Actor Types
//!
//! - `ProvisionerActor`: owns the container → rootfs map and drives
//!   recover, provision and destroy

mod framework;
mod provisioner;

pub use framework::{
    spawn, Actor, ActorContext, ActorError, ActorHandle, ActorRef, Message, WeakActorHandle,
};
pub use provisioner::{Info, ProvisionerActor, ProvisionerMessage};
