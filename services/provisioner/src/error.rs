//! Provisioner error types.

use std::path::PathBuf;

use strata_id::ContainerId;
use thiserror::Error;

use crate::image::ImageType;
use crate::paths::PathsError;
use crate::whiteout::WhiteoutError;

/// Errors returned by the provisioner.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// The root directory could not be created or resolved.
    #[error("failed to prepare provisioner root directory '{path}': {source}")]
    RootDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no usable provisioner backend")]
    NoBackends,

    /// The configured backend is not among the constructed ones.
    #[error("the specified provisioner backend '{0}' is unsupported")]
    UnsupportedBackend(String),

    #[error("unsupported container image type: {0}")]
    UnsupportedImageType(ImageType),

    /// The on-disk layout could not be listed.
    #[error("failed to list provisioned rootfses: {0}")]
    Layout(#[from] PathsError),

    /// A rootfs on disk belongs to a backend that is not configured.
    #[error("found rootfses of container {container_id} managed by an unrecognized backend: {backend}")]
    UnrecognizedBackend {
        container_id: ContainerId,
        backend: String,
    },

    /// Bookkeeping references a backend that is not configured.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    #[error("store failure: {0:#}")]
    Store(anyhow::Error),

    #[error("backend failure: {0:#}")]
    Backend(anyhow::Error),

    #[error(transparent)]
    Whiteout(#[from] WhiteoutError),

    /// A spawned task panicked or was cancelled.
    #[error("provisioner task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The provisioner actor is no longer running.
    #[error("provisioner has terminated")]
    Terminated,

    /// The caller broke the API contract.
    #[error(transparent)]
    Precondition(#[from] PreconditionViolation),
}

impl ProvisionerError {
    /// True when the error signals API misuse rather than an environmental
    /// failure. Such errors are not retryable.
    pub fn is_precondition_violation(&self) -> bool {
        matches!(self, ProvisionerError::Precondition(_))
    }
}

/// Fatal contract violations by the embedding system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionViolation {
    #[error("failed to destroy container {container} since its nested container {child} has not been destroyed yet")]
    ChildNotDestroyed {
        container: ContainerId,
        child: ContainerId,
    },
}

/// Result alias for provisioner operations.
pub type Result<T> = std::result::Result<T, ProvisionerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_is_distinguishable() {
        let container: ContainerId = "parent".parse().unwrap();
        let child: ContainerId = "parent.child".parse().unwrap();
        let err: ProvisionerError = PreconditionViolation::ChildNotDestroyed { container, child }.into();

        assert!(err.is_precondition_violation());
        assert!(err.to_string().contains("parent.child"));
        assert!(!ProvisionerError::Terminated.is_precondition_violation());
    }

    #[test]
    fn test_collaborator_errors_keep_context() {
        let source = anyhow::anyhow!("disk full").context("copying layer");
        let err = ProvisionerError::Backend(source);
        assert_eq!(err.to_string(), "backend failure: copying layer: disk full");
    }
}
