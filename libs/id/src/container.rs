//! Container identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::IdError;

/// Separator between ancestry levels in the display form of a [`ContainerId`].
pub const NESTING_SEPARATOR: char = '.';

/// Identifies a container, possibly nested inside a parent container.
///
/// Each level's value is used verbatim as a directory name, so values are
/// restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContainerId {
    parent: Option<Box<ContainerId>>,
    value: String,
}

impl ContainerId {
    /// Creates a top-level container ID.
    pub fn new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        validate_component(&value)?;
        Ok(Self {
            parent: None,
            value,
        })
    }

    /// Creates a container ID nested under `parent`.
    pub fn nested(parent: ContainerId, value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        validate_component(&value)?;
        Ok(Self {
            parent: Some(Box::new(parent)),
            value,
        })
    }

    /// This level's value (the last path component).
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The direct parent, if this container is nested.
    pub fn parent(&self) -> Option<&ContainerId> {
        self.parent.as_deref()
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    /// Nesting level: 0 for a top-level container.
    pub fn depth(&self) -> usize {
        self.parent().map_or(0, |p| p.depth() + 1)
    }

    /// All levels from the top-level ancestor down to `self`.
    pub fn ancestry(&self) -> Vec<&ContainerId> {
        let mut chain = Vec::with_capacity(self.depth() + 1);
        let mut current = Some(self);
        while let Some(id) = current {
            chain.push(id);
            current = id.parent();
        }
        chain.reverse();
        chain
    }

    /// Parses the display form `top.child.grandchild`.
    pub fn parse(s: &str) -> Result<Self, IdError> {
        if s.is_empty() {
            return Err(IdError::Empty);
        }

        let mut parts = s.split(NESTING_SEPARATOR);
        // split always yields at least one item
        let mut id = Self::new(parts.next().unwrap_or_default())?;
        for part in parts {
            id = Self::nested(id, part)?;
        }
        Ok(id)
    }
}

fn validate_component(value: &str) -> Result<(), IdError> {
    if value.is_empty() {
        return Err(IdError::Empty);
    }

    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        let reason = match bad {
            '/' => "contains a path separator",
            NESTING_SEPARATOR => "contains the nesting separator",
            _ => "only [A-Za-z0-9_-] is allowed",
        };
        return Err(IdError::InvalidComponent {
            value: value.to_string(),
            reason,
        });
    }

    Ok(())
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(parent) = &self.parent {
            write!(f, "{}{}", parent, NESTING_SEPARATOR)?;
        }
        f.write_str(&self.value)
    }
}

impl FromStr for ContainerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContainerId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ContainerId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Tests
// =============================================================================
