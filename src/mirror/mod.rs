//! Remote sources and on-demand mirroring into the local store

pub mod http;
pub mod provider;
pub mod remote;

pub use http::HttpSource;
pub use provider::{MirrorOptions, MirroringProvider, Retrieval};
pub use remote::{DirectorySource, FetchStatus, RemoteArtifactSource};
