//! CLI command implementations

pub mod add;
pub mod completions;
pub mod config;
pub mod fetch;
pub mod get;
pub mod list;
pub mod path;
pub mod remove;
pub mod verify;

pub use add::execute as add;
pub use completions::execute as completions;
pub use config::execute as config;
pub use fetch::execute as fetch;
pub use get::execute as get;
pub use list::execute as list;
pub use path::execute as path;
pub use remove::execute as remove;
pub use verify::execute as verify;

use crate::artifact::{ArtifactDescriptor, ArtifactKey, FormatTag, TransferPolicy};
use crate::config::{Config, RemoteConfig};
use crate::error::{DepotError, DepotResult};
use crate::mirror::{MirrorOptions, MirroringProvider};
use crate::store::LocalArtifactStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Open the configured local store
pub(crate) fn open_store(config: &Config) -> DepotResult<Arc<LocalArtifactStore>> {
    let store = LocalArtifactStore::open_with(config.store_root(), config.coordinate_mapper())?;
    Ok(Arc::new(store))
}

/// Provider over the local store with configured remotes plus `extra` ones
pub(crate) fn build_provider(
    config: &Config,
    store: Arc<LocalArtifactStore>,
    extra: &[String],
    policy: Option<TransferPolicy>,
) -> DepotResult<MirroringProvider> {
    let mut options: MirrorOptions = config.mirror_options();
    if let Some(policy) = policy {
        options.policy = policy;
    }

    let timeout = Duration::from_secs(config.mirror.timeout_secs);
    let extra_remotes = extra.iter().map(|location| RemoteConfig::from_location(location));

    let mut provider = MirroringProvider::new(store, options);
    for remote in config.remotes.iter().cloned().chain(extra_remotes) {
        debug!("Using remote {}", remote.name);
        provider = provider.with_remote(remote.to_source(timeout)?);
    }
    Ok(provider)
}

/// Descriptor for a key in the format named on the command line
pub(crate) fn descriptor_for(key: &ArtifactKey, format: Option<&str>) -> ArtifactDescriptor {
    match format.map(FormatTag::parse).unwrap_or_default() {
        FormatTag::Packed => ArtifactDescriptor::packed(key.clone()),
        format => ArtifactDescriptor::with_format(key.clone(), format),
    }
}

/// Run blocking store or network work off the async runtime
pub(crate) async fn blocking<T, F>(work: F) -> DepotResult<T>
where
    F: FnOnce() -> DepotResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DepotError::Internal(format!("worker task failed: {}", e)))?
}
