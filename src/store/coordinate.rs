//! Mapping from descriptors to paths in the on-disk layout
//!
//! Canonical files live at
//! `<group as dirs>/<artifact>/<version>/<artifact>-<version>[-<classifier>].<ext>`
//! and derived formats append a format suffix to that file name. The group
//! defaults to `p2.<type>`, the artifact and version to the key's id and
//! version, and the extension to the per-type default.

use crate::artifact::key::invalid_segment;
use crate::artifact::{ArtifactDescriptor, FormatTag, Gav};
use crate::error::{DepotError, DepotResult};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Group prefix for coordinates derived from a key
pub const DEFAULT_GROUP_PREFIX: &str = "p2";

const FALLBACK_EXTENSION: &str = "jar";

/// Fully resolved repository coordinate of a descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub group: String,
    pub artifact: String,
    pub version: String,
    pub classifier: Option<String>,
    pub extension: String,
    /// Suffix of a derived format, appended after the extension
    pub format_suffix: Option<String>,
}

impl Coordinate {
    /// File name of this coordinate
    pub fn file_name(&self) -> String {
        let mut name = format!("{}-{}", self.artifact, self.version);
        if let Some(classifier) = &self.classifier {
            name.push('-');
            name.push_str(classifier);
        }
        name.push('.');
        name.push_str(&self.extension);
        if let Some(suffix) = &self.format_suffix {
            name.push('.');
            name.push_str(suffix);
        }
        name
    }

    /// Relative path of this coordinate inside a store root
    pub fn relative_path(&self) -> PathBuf {
        let mut path: PathBuf = self.group.split('.').collect();
        path.push(&self.artifact);
        path.push(&self.version);
        path.push(self.file_name());
        path
    }

    fn validate(&self) -> DepotResult<()> {
        let mut segments: Vec<(&str, &str)> = self.group.split('.').map(|s| ("group", s)).collect();
        segments.push(("artifact", &self.artifact));
        segments.push(("version", &self.version));
        segments.push(("extension", &self.extension));
        if let Some(classifier) = &self.classifier {
            segments.push(("classifier", classifier));
        }
        if let Some(suffix) = &self.format_suffix {
            segments.push(("format", suffix));
        }

        for (name, value) in segments {
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

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{}", classifier)?;
        }
        write!(f, ":{}", self.extension)
    }
}

/// Deterministic descriptor-to-path function
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    extensions: BTreeMap<String, String>,
}

impl Default for CoordinateMapper {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
        }
    }
}

/// Built-in per-type default extensions
pub fn default_extensions() -> BTreeMap<String, String> {
    [
        ("osgi.bundle", "jar"),
        ("org.eclipse.update.feature", "jar"),
        ("bundle", "jar"),
        ("binary", "zip"),
    ]
    .into_iter()
    .map(|(kind, ext)| (kind.to_string(), ext.to_string()))
    .collect()
}

impl CoordinateMapper {
    /// Mapper with the built-in extension table plus overrides
    pub fn with_extensions(overrides: &BTreeMap<String, String>) -> Self {
        let mut extensions = default_extensions();
        for (kind, ext) in overrides {
            extensions.insert(kind.clone(), ext.trim_start_matches('.').to_string());
        }
        Self { extensions }
    }

    /// Default file extension for an artifact type
    pub fn default_extension(&self, kind: &str) -> &str {
        self.extensions
            .get(kind)
            .map(String::as_str)
            .unwrap_or(FALLBACK_EXTENSION)
    }

    /// Coordinates implied by the key alone
    pub fn default_gav(&self, descriptor: &ArtifactDescriptor) -> Gav {
        let key = &descriptor.key;
        Gav::new(
            format!("{}.{}", DEFAULT_GROUP_PREFIX, key.kind),
            &key.id,
            &key.version,
        )
    }

    /// Collapse explicitly defaulted layout fields to their omitted form
    ///
    /// Two descriptors that differ only by spelling out defaults normalize
    /// to identical values, so they share a coordinate and an index entry.
    pub fn normalize(&self, descriptor: &ArtifactDescriptor) -> ArtifactDescriptor {
        let mut normalized = descriptor.clone();
        normalized.format = FormatTag::parse(descriptor.format.as_str());

        normalized.classifier = descriptor
            .classifier
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        let default_ext = self.default_extension(&descriptor.key.kind);
        normalized.extension = descriptor
            .extension
            .as_deref()
            .map(|e| e.trim().trim_start_matches('.'))
            .filter(|e| !e.is_empty() && *e != default_ext)
            .map(str::to_string);

        if normalized.gav.as_ref() == Some(&self.default_gav(descriptor)) {
            normalized.gav = None;
        }

        normalized
    }

    /// Resolve the coordinate of a descriptor
    pub fn coordinate(&self, descriptor: &ArtifactDescriptor) -> DepotResult<Coordinate> {
        let descriptor = self.normalize(descriptor);
        let gav = descriptor
            .gav
            .clone()
            .unwrap_or_else(|| self.default_gav(&descriptor));

        let coordinate = Coordinate {
            group: gav.group,
            artifact: gav.artifact,
            version: gav.version,
            extension: descriptor
                .extension
                .clone()
                .unwrap_or_else(|| self.default_extension(&descriptor.key.kind).to_string()),
            classifier: descriptor.classifier.clone(),
            format_suffix: descriptor.format.file_suffix().map(str::to_string),
        };
        coordinate.validate()?;
        Ok(coordinate)
    }

    /// Relative path of a descriptor inside a store root
    pub fn relative_path(&self, descriptor: &ArtifactDescriptor) -> DepotResult<PathBuf> {
        Ok(self.coordinate(descriptor)?.relative_path())
    }
}
