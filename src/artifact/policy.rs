//! Format selection for remote transfers

use super::descriptor::{ArtifactDescriptor, FormatTag};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Decides which representations of an artifact to fetch, and in which order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferPolicy {
    /// Fetch the cheapest derived format first, then the canonical one
    #[default]
    PreferDerived,
    /// Only ever fetch the canonical format
    RequireCanonical,
}

impl TransferPolicy {
    /// Ordered formats to fetch from the descriptors a remote offers
    ///
    /// `PreferDerived` yields at most one derived descriptor (packed wins
    /// over other transforms) followed by the canonical one. Neither policy
    /// ever substitutes a derived descriptor for a missing canonical one.
    pub fn candidates<'a>(&self, available: &'a [ArtifactDescriptor]) -> Vec<&'a ArtifactDescriptor> {
        let canonical = find_canonical(available);

        match self {
            Self::RequireCanonical => canonical.into_iter().collect(),
            Self::PreferDerived => {
                let derived = available
                    .iter()
                    .filter(|d| !d.is_canonical())
                    .min_by(|a, b| derived_rank(&a.format).cmp(&derived_rank(&b.format)));
                derived.into_iter().chain(canonical).collect()
            }
        }
    }

    /// Whether a descriptor of this format may be fetched under this policy
    pub fn accepts(&self, descriptor: &ArtifactDescriptor) -> bool {
        match self {
            Self::RequireCanonical => descriptor.is_canonical(),
            Self::PreferDerived => true,
        }
    }
}

fn derived_rank(format: &FormatTag) -> (u8, &str) {
    match format {
        FormatTag::Packed => (0, ""),
        other => (1, other.as_str()),
    }
}

/// Find the canonical descriptor in a set, if any
pub fn find_canonical(descriptors: &[ArtifactDescriptor]) -> Option<&ArtifactDescriptor> {
    descriptors.iter().find(|d| d.is_canonical())
}

impl fmt::Display for TransferPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PreferDerived => write!(f, "prefer-derived"),
            Self::RequireCanonical => write!(f, "require-canonical"),
        }
    }
}
