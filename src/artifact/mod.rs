//! Artifact identity and representation
//!
//! An [`ArtifactKey`] names a logical artifact. An [`ArtifactDescriptor`]
//! names one representation of it: the canonical bytes, or a derived
//! (transformed) form such as a packed archive. [`TransferPolicy`] decides
//! which representations a mirror fetches.

pub mod descriptor;
pub mod key;
pub mod policy;

pub use descriptor::{ArtifactDescriptor, FormatTag, Gav, UNPACK_STEP};
pub use key::ArtifactKey;
pub use policy::{find_canonical, TransferPolicy};
