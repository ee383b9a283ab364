//! Rootfs identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

use crate::IdError;

/// Identifies one provisioned rootfs.
///
/// A fresh id is minted for every provision and never reused. The rendered
/// form `rootfs_<ulid>` is also the rootfs directory name, so it only ever
/// contains `[0-9A-Za-z_]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RootfsId(Ulid);

impl RootfsId {
    pub const PREFIX: &'static str = "rootfs_";

    /// Mints a new id.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub const fn ulid(&self) -> Ulid {
        self.0
    }

    /// Parses the `rootfs_<ulid>` form. ULIDs are case-insensitive.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let encoded = s
            .strip_prefix(Self::PREFIX)
            .ok_or_else(|| IdError::NotRootfs(s.to_string()))?;

        Ulid::from_string(encoded)
            .map(Self)
            .map_err(|e| IdError::MalformedUlid {
                value: s.to_string(),
                reason: e.to_string(),
            })
    }
}

impl Default for RootfsId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RootfsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

impl FromStr for RootfsId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RootfsId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RootfsId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_display_parse() {
        let id = RootfsId::new();
        let rendered = id.to_string();
        assert!(rendered.starts_with("rootfs_"));
        assert_eq!(rendered.len(), "rootfs_".len() + 26);
        assert_eq!(RootfsId::parse(&rendered).unwrap(), id);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let id = RootfsId::new();
        let lower = format!("rootfs_{}", id.ulid().to_string().to_lowercase());
        assert_eq!(lower.parse::<RootfsId>().unwrap(), id);
    }

    #[test]
    fn test_fresh_ids_are_distinct() {
        let ids: HashSet<_> = (0..1000).map(|_| RootfsId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_parse_errors() {
        assert!(RootfsId::parse("").unwrap_err().is_empty());
        assert!(matches!(
            RootfsId::parse("layer_01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err(),
            IdError::NotRootfs(_)
        ));
        assert!(matches!(
            RootfsId::parse("rootfs01HV4Z2WQXKJNM8GPQY6VBKC3D").unwrap_err(),
            IdError::NotRootfs(_)
        ));
        assert!(matches!(
            RootfsId::parse("rootfs_nope").unwrap_err(),
            IdError::MalformedUlid { .. }
        ));
    }

    #[test]
    fn test_json() {
        let id = RootfsId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        assert_eq!(serde_json::from_str::<RootfsId>(&json).unwrap(), id);
    }
}
