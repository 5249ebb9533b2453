//! Logical artifact identity

use crate::error::{DepotError, DepotResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifies a versioned artifact irrespective of its representation
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    /// Artifact type (e.g. `osgi.bundle`)
    #[serde(rename = "type")]
    pub kind: String,
    /// Artifact identifier
    pub id: String,
    /// Artifact version
    pub version: String,
}

impl ArtifactKey {
    /// Create a new key
    pub fn new(kind: impl Into<String>, id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            version: version.into(),
        }
    }

    /// Parse a key written as `type:id:version`
    pub fn parse(s: &str) -> DepotResult<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(id), Some(version)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(DepotError::InvalidKey {
                key: s.to_string(),
                reason: "expected type:id:version".to_string(),
            });
        };

        let key = Self::new(kind, id, version);
        key.validate()?;
        Ok(key)
    }

    /// Check that every segment can be used as a path component
    pub fn validate(&self) -> DepotResult<()> {
        for (name, value) in [
            ("type", &self.kind),
            ("id", &self.id),
            ("version", &self.version),
        ] {
            if let Some(reason) = invalid_segment(value) {
                return Err(DepotError::InvalidKey {
                    key: self.to_string(),
                    reason: format!("{} {}", name, reason),
                });
            }
        }
        Ok(())
    }
}

/// Returns why a key segment is unusable in the on-disk layout, if it is
pub(crate) fn invalid_segment(value: &str) -> Option<&'static str> {
    if value.is_empty() {
        Some("is empty")
    } else if value == "." || value == ".." {
        Some("is a relative path component")
    } else if value.contains(['/', '\\']) {
        Some("contains a path separator")
    } else if value.chars().any(char::is_control) {
        Some("contains control characters")
    } else {
        None
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.id, self.version)
    }
}

impl FromStr for ArtifactKey {
    type Err = DepotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
