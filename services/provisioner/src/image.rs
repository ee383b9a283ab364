//! Image references and the results of resolving and provisioning them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Image format understood by a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Docker/OCI layered images. Upper layers may carry whiteout markers.
    Docker,
    /// App Container images.
    Appc,
}

impl ImageType {
    pub const ALL: [ImageType; 2] = [ImageType::Docker, ImageType::Appc];

    /// Whether layers of this type encode deletions as whiteout markers.
    pub fn has_whiteouts(self) -> bool {
        matches!(self, ImageType::Docker)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageType::Docker => "docker",
            ImageType::Appc => "appc",
        }
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown image type '{0}'")]
pub struct UnknownImageType(pub String);

impl FromStr for ImageType {
    type Err = UnknownImageType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "docker" => Ok(ImageType::Docker),
            "appc" => Ok(ImageType::Appc),
            other => Err(UnknownImageType(other.to_string())),
        }
    }
}

/// An image to provision: its type plus a store-specific reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub reference: String,
}

impl Image {
    pub fn new(image_type: ImageType, reference: impl Into<String>) -> Self {
        Self {
            image_type,
            reference: reference.into(),
        }
    }

    pub fn docker(reference: impl Into<String>) -> Self {
        Self::new(ImageType::Docker, reference)
    }

    pub fn appc(reference: impl Into<String>) -> Self {
        Self::new(ImageType::Appc, reference)
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.image_type, self.reference)
    }
}

/// What a store resolved an image to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageInfo {
    /// Unpacked layer directories, lowest layer first.
    pub layers: Vec<PathBuf>,

    pub docker_manifest: Option<serde_json::Value>,

    pub appc_manifest: Option<serde_json::Value>,
}

/// Result of a successful provision.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionInfo {
    /// The composed root filesystem.
    pub rootfs: PathBuf,

    pub docker_manifest: Option<serde_json::Value>,

    pub appc_manifest: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_type_parse() {
        assert_eq!("docker".parse::<ImageType>().unwrap(), ImageType::Docker);
        assert_eq!(" APPC ".parse::<ImageType>().unwrap(), ImageType::Appc);
        assert_eq!(
            "oci".parse::<ImageType>().unwrap_err(),
            UnknownImageType("oci".to_string())
        );
    }

    #[test]
    fn test_only_docker_has_whiteouts() {
        assert!(ImageType::Docker.has_whiteouts());
        assert!(!ImageType::Appc.has_whiteouts());
    }

    #[test]
    fn test_image_serde_shape() {
        let image = Image::docker("library/busybox:latest");
        let json = serde_json::to_value(&image).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "docker", "reference": "library/busybox:latest"})
        );
        assert_eq!(image.to_string(), "docker:library/busybox:latest");
    }
}
