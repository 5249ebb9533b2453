//! Remote artifact sources

use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::error::{DepotError, DepotResult};
use crate::store::index::ArtifactIndex;
use crate::store::local::{INDEX_FILE, META_DIR};
use crate::store::sink::{pump, RawArtifactSink};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Outcome of a fetch that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStatus {
    /// Bytes were streamed and the sink committed
    Transferred,
    /// The source does not have the descriptor; the sink was aborted
    NotFound,
}

/// A repository artifacts can be mirrored from
///
/// `fetch_into` must end with exactly one terminal call on the sink:
/// commit after a complete transfer, abort otherwise.
pub trait RemoteArtifactSource: Send + Sync {
    /// Human-readable source name for logs and errors
    fn name(&self) -> &str;

    /// Every format this source offers for a key, with declared checksums
    fn descriptors(&self, key: &ArtifactKey) -> DepotResult<Vec<ArtifactDescriptor>>;

    fn contains_key(&self, key: &ArtifactKey) -> DepotResult<bool> {
        Ok(!self.descriptors(key)?.is_empty())
    }

    /// Stream one descriptor into a sink
    fn fetch_into(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut dyn RawArtifactSink,
    ) -> DepotResult<FetchStatus>;
}

/// Lazily loaded, then shared, remote index
#[derive(Default)]
pub(crate) struct CachedIndex {
    inner: Mutex<Option<Arc<ArtifactIndex>>>,
}

impl CachedIndex {
    pub(crate) fn get_or_load<F>(&self, load: F) -> DepotResult<Arc<ArtifactIndex>>
    where
        F: FnOnce() -> DepotResult<ArtifactIndex>,
    {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = slot.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(load()?);
        *slot = Some(Arc::clone(&index));
        Ok(index)
    }
}

pub(crate) fn abort_not_found(sink: &mut dyn RawArtifactSink) -> DepotResult<FetchStatus> {
    sink.abort_write()?;
    Ok(FetchStatus::NotFound)
}

/// Another store layout on a local or mounted filesystem
pub struct DirectorySource {
    name: String,
    root: PathBuf,
    index: CachedIndex,
}

impl DirectorySource {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            index: CachedIndex::default(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index(&self) -> DepotResult<Arc<ArtifactIndex>> {
        self.index.get_or_load(|| {
            debug!("Loading index of {} from {}", self.name, self.root.display());
            ArtifactIndex::load(&self.root.join(META_DIR).join(INDEX_FILE), &self.root)
                .map_err(|e| DepotError::remote(&self.name, e.to_string()))
        })
    }
}

impl RemoteArtifactSource for DirectorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn descriptors(&self, key: &ArtifactKey) -> DepotResult<Vec<ArtifactDescriptor>> {
        Ok(self.index()?.descriptors(key))
    }

    fn fetch_into(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut dyn RawArtifactSink,
    ) -> DepotResult<FetchStatus> {
        let index = self.index()?;
        let Some(entry) = index.get(descriptor) else {
            return abort_not_found(sink);
        };

        let path = self.root.join(&entry.path);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return abort_not_found(sink),
            Err(e) => {
                sink.abort_write()?;
                return Err(DepotError::remote(
                    &self.name,
                    format!("opening {}: {}", path.display(), e),
                ));
            }
        };

        let bytes = pump(&mut file, sink)?;
        debug!("Fetched {} ({} bytes) from {}", descriptor, bytes, self.name);
        Ok(FetchStatus::Transferred)
    }
}
