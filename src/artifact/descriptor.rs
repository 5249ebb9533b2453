//! Artifact descriptors: a key plus a concrete transfer format

use super::key::ArtifactKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Processing step that reverses the packed transform
pub const UNPACK_STEP: &str = "unpack.gz";

/// Representation an artifact is transferred in
///
/// Parsing normalizes: an empty name and `"canonical"` both map to
/// [`FormatTag::Canonical`], so `Other` never holds the canonical name.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FormatTag {
    /// Untransformed, directly usable bytes
    #[default]
    Canonical,
    /// Compressed representation
    Packed,
    /// Any other named transform
    Other(String),
}

impl FormatTag {
    pub const CANONICAL: &'static str = "canonical";
    pub const PACKED: &'static str = "packed";

    /// Parse a format name
    pub fn parse(name: &str) -> Self {
        match name.trim() {
            "" | Self::CANONICAL => Self::Canonical,
            Self::PACKED => Self::Packed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Whether this is the canonical representation
    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical)
    }

    /// Format name as written in the index
    pub fn as_str(&self) -> &str {
        match self {
            Self::Canonical => Self::CANONICAL,
            Self::Packed => Self::PACKED,
            Self::Other(name) => name,
        }
    }

    /// Suffix appended to the canonical file name, `None` for canonical
    pub fn file_suffix(&self) -> Option<&str> {
        match self {
            Self::Canonical => None,
            Self::Packed => Some("pack.gz"),
            Self::Other(name) => Some(name),
        }
    }
}

impl From<String> for FormatTag {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<FormatTag> for String {
    fn from(tag: FormatTag) -> Self {
        tag.as_str().to_string()
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit repository coordinates that replace the ones derived from the key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gav {
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl Gav {
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            artifact: artifact.into(),
            version: version.into(),
        }
    }
}

/// An artifact key plus a specific format and processing-step chain
///
/// Equality and hashing consider only `(key, format)`: two descriptors
/// describing the same representation are interchangeable regardless of
/// which component built them or which properties they carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDescriptor {
    pub key: ArtifactKey,

    #[serde(default, skip_serializing_if = "FormatTag::is_canonical")]
    pub format: FormatTag,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processing_steps: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gav: Option<Gav>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ArtifactDescriptor {
    /// Canonical descriptor for a key
    pub fn canonical(key: ArtifactKey) -> Self {
        Self::with_format(key, FormatTag::Canonical)
    }

    /// Packed descriptor for a key, with its unpack step
    pub fn packed(key: ArtifactKey) -> Self {
        let mut descriptor = Self::with_format(key, FormatTag::Packed);
        descriptor.processing_steps.push(UNPACK_STEP.to_string());
        descriptor
    }

    /// Descriptor for a key in an arbitrary format
    pub fn with_format(key: ArtifactKey, format: FormatTag) -> Self {
        Self {
            key,
            format: FormatTag::parse(format.as_str()),
            processing_steps: Vec::new(),
            gav: None,
            classifier: None,
            extension: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_gav(mut self, gav: Gav) -> Self {
        self.gav = Some(gav);
        self
    }

    pub fn with_classifier(mut self, classifier: impl Into<String>) -> Self {
        self.classifier = Some(classifier.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn is_canonical(&self) -> bool {
        self.format.is_canonical()
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }
}

impl PartialEq for ArtifactDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.format == other.format
    }
}

impl Eq for ArtifactDescriptor {}

impl Hash for ArtifactDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
        self.format.hash(state);
    }
}

impl fmt::Display for ArtifactDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_canonical() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{} [{}]", self.key, self.format)
        }
    }
}
