//! Local store fronted by remote sources
//!
//! Queries (`contains`, `descriptors`) only look at the local store. Reads
//! (`get_artifact`, `artifact_file`, ...) mirror missing artifacts first.
//! A mirror attempt for a key runs under a per-key lock and walks the remotes
//! in priority order. From each remote that lists the key it fetches the
//! formats the transfer policy selects, stopping at the first one that leaves
//! the canonical format local. A remote that lists a format and then fails to
//! deliver it ends the attempt. Formats already present locally are skipped,
//! so a retry after a failure only fetches what is still missing.

use super::remote::{FetchStatus, RemoteArtifactSource};
use crate::artifact::{ArtifactDescriptor, ArtifactKey, TransferPolicy};
use crate::error::{DepotError, DepotResult};
use crate::store::checksum::Expectations;
use crate::store::local::LocalArtifactStore;
use crate::store::sink::{ArtifactSink, RawArtifactSink};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

/// Mirroring behavior switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorOptions {
    pub policy: TransferPolicy,
    /// Never consult remote sources
    pub offline: bool,
    /// Compare local canonical files with remote-declared checksums on every hit
    pub revalidate: bool,
}

/// Outcome of a read that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retrieval {
    /// The sink received and committed this many bytes
    Served(u64),
    /// Neither the local store nor any remote has the artifact
    NotFound,
}

/// Local store plus remote sources, mirroring on demand
pub struct MirroringProvider {
    local: Arc<LocalArtifactStore>,
    remotes: Vec<Box<dyn RemoteArtifactSource>>,
    options: MirrorOptions,
    download_locks: Mutex<HashMap<ArtifactKey, Arc<Mutex<()>>>>,
}

impl MirroringProvider {
    pub fn new(local: Arc<LocalArtifactStore>, options: MirrorOptions) -> Self {
        Self {
            local,
            remotes: Vec::new(),
            options,
            download_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Append a remote source; earlier sources take priority
    pub fn with_remote(mut self, remote: Box<dyn RemoteArtifactSource>) -> Self {
        self.remotes.push(remote);
        self
    }

    pub fn local(&self) -> &Arc<LocalArtifactStore> {
        &self.local
    }

    pub fn options(&self) -> MirrorOptions {
        self.options
    }

    pub fn remote_names(&self) -> Vec<&str> {
        self.remotes.iter().map(|r| r.name()).collect()
    }

    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.local.contains_key(key)
    }

    pub fn contains(&self, descriptor: &ArtifactDescriptor) -> bool {
        self.local.contains(descriptor)
    }

    pub fn descriptors(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.local.descriptors(key)
    }

    /// Whether canonical bytes for a key are local or offered by a remote
    ///
    /// Queries remotes but never writes to the local store.
    pub fn is_available(&self, key: &ArtifactKey) -> DepotResult<bool> {
        if self.local.contains(&ArtifactDescriptor::canonical(key.clone())) {
            return Ok(true);
        }
        if self.options.offline {
            return Ok(false);
        }
        Ok(self.find_offer(key, ArtifactDescriptor::is_canonical)?.is_some())
    }

    /// Mirror a key if needed; returns whether its canonical format is now local
    pub fn ensure_available(&self, key: &ArtifactKey) -> DepotResult<bool> {
        key.validate()?;
        let canonical = ArtifactDescriptor::canonical(key.clone());
        if self.local_hit(&canonical)? {
            return Ok(true);
        }
        if self.options.offline || self.remotes.is_empty() {
            debug!("{} is not local and no remote may be consulted", key);
            return Ok(false);
        }

        self.with_download_lock(key, || {
            if self.local.contains(&canonical) {
                return Ok(true);
            }
            self.mirror_key(key, &canonical)
        })
    }

    /// Serve canonical bytes for the sink's key, mirroring on a miss
    pub fn get_artifact(&self, sink: &mut dyn ArtifactSink) -> DepotResult<Retrieval> {
        if !sink.can_begin_write() {
            return Err(DepotError::SinkUnavailable(sink.artifact_to_be_written().to_string()));
        }
        let key = sink.artifact_to_be_written().clone();

        let available = self.ensure_available(&key).inspect_err(|_| release(sink))?;
        if !available {
            release(sink);
            return Ok(Retrieval::NotFound);
        }
        self.serve(&ArtifactDescriptor::canonical(key), sink)
    }

    /// Serve bytes of exactly the sink's descriptor, mirroring on a miss
    ///
    /// The requested format is never substituted by another one.
    pub fn get_raw_artifact(&self, sink: &mut dyn RawArtifactSink) -> DepotResult<Retrieval> {
        let descriptor = sink.descriptor_to_be_written().clone();
        if !sink.can_begin_write() {
            return Err(DepotError::SinkUnavailable(descriptor.to_string()));
        }

        let available = self.ensure_descriptor(&descriptor).inspect_err(|_| {
            if let Err(e) = sink.abort_write() {
                warn!("Failed to release sink: {}", e);
            }
        })?;
        if !available {
            sink.abort_write()?;
            return Ok(Retrieval::NotFound);
        }
        self.serve(&descriptor, sink)
    }

    /// Canonical file of a key, mirroring on a miss
    pub fn artifact_file(&self, key: &ArtifactKey) -> DepotResult<Option<PathBuf>> {
        if self.ensure_available(key)? {
            Ok(self.local.file_for_key(key))
        } else {
            Ok(None)
        }
    }

    /// File of an exact descriptor, mirroring on a miss
    pub fn artifact_file_for(&self, descriptor: &ArtifactDescriptor) -> DepotResult<Option<PathBuf>> {
        if self.ensure_descriptor(descriptor)? {
            Ok(self.local.file_for(descriptor))
        } else {
            Ok(None)
        }
    }

    fn serve<S: ArtifactSink + ?Sized>(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut S,
    ) -> DepotResult<Retrieval> {
        match self.local.read_into(descriptor, sink) {
            Ok(bytes) => Ok(Retrieval::Served(bytes)),
            Err(DepotError::ArtifactNotFound(_)) => Ok(Retrieval::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Mirror one exact descriptor; returns whether it is now local
    fn ensure_descriptor(&self, descriptor: &ArtifactDescriptor) -> DepotResult<bool> {
        descriptor.key.validate()?;
        if self.local.contains(descriptor) {
            return Ok(true);
        }
        if self.options.offline || self.remotes.is_empty() {
            return Ok(false);
        }

        self.with_download_lock(&descriptor.key, || {
            if self.local.contains(descriptor) {
                return Ok(true);
            }
            let offer = self.find_offer(&descriptor.key, |d| d == descriptor)?;
            let Some((remote, offered)) = offer else {
                debug!("No remote offers {}", descriptor);
                return Ok(false);
            };
            self.mirror_descriptor(remote, &offered)?;
            Ok(self.local.contains(descriptor))
        })
    }

    /// Mirror the policy's formats of a key, remote by remote, until canonical is local
    fn mirror_key(&self, key: &ArtifactKey, canonical: &ArtifactDescriptor) -> DepotResult<bool> {
        for remote in &self.remotes {
            let offered = remote.descriptors(key)?;
            if offered.is_empty() {
                continue;
            }
            debug!("{} offers {} format(s) of {}", remote.name(), offered.len(), key);

            for descriptor in self.options.policy.candidates(&offered) {
                self.mirror_descriptor(&**remote, descriptor)?;
            }
            if self.local.contains(canonical) {
                return Ok(true);
            }
            debug!(
                "{} has no canonical {} allowed by {}, trying the next remote",
                remote.name(),
                key,
                self.options.policy
            );
        }
        debug!("No remote offers canonical {}", key);
        Ok(false)
    }

    /// Local canonical hit, optionally revalidated against the remote
    fn local_hit(&self, canonical: &ArtifactDescriptor) -> DepotResult<bool> {
        let Some(path) = self.local.file_for(canonical) else {
            return Ok(false);
        };
        if !self.options.revalidate || self.options.offline {
            return Ok(true);
        }

        let offer = self.find_offer(&canonical.key, ArtifactDescriptor::is_canonical)?;
        let Some((remote, declared)) = offer else {
            return Ok(true);
        };
        let expected = Expectations::from_properties(&declared);
        if expected.is_empty() || expected.matches_file(&path) {
            return Ok(true);
        }

        warn!(
            "Local copy of {} does not match {}, fetching again",
            canonical.key,
            remote.name()
        );
        self.local.remove(canonical)?;
        Ok(false)
    }

    /// First remote, in priority order, offering a descriptor of the key that `wanted` accepts
    fn find_offer<F>(
        &self,
        key: &ArtifactKey,
        wanted: F,
    ) -> DepotResult<Option<(&dyn RemoteArtifactSource, ArtifactDescriptor)>>
    where
        F: Fn(&ArtifactDescriptor) -> bool,
    {
        for remote in &self.remotes {
            if let Some(found) = remote.descriptors(key)?.into_iter().find(|d| wanted(d)) {
                debug!("{} offers {}", remote.name(), found);
                return Ok(Some((&**remote, found)));
            }
        }
        Ok(None)
    }

    /// Run `work` holding the download lock of a key
    ///
    /// The lock entry is dropped again once no other caller holds or awaits it.
    fn with_download_lock<T>(
        &self,
        key: &ArtifactKey,
        work: impl FnOnce() -> DepotResult<T>,
    ) -> DepotResult<T> {
        let lock = {
            let mut locks = self.download_locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            work()
        };

        let mut locks = self.download_locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the map and this caller reference it; new clones need the map lock
        if Arc::strong_count(&lock) == 2 {
            locks.remove(key);
        }
        result
    }

    /// Fetch one remote descriptor into the local store unless already there
    fn mirror_descriptor(
        &self,
        remote: &dyn RemoteArtifactSource,
        offered: &ArtifactDescriptor,
    ) -> DepotResult<()> {
        if self.local.contains(offered) {
            debug!("{} already local, not fetching again", offered);
            return Ok(());
        }

        let expected = Expectations::from_properties(offered);
        if self.local.adopt_orphan(offered, &expected)? {
            return Ok(());
        }
        self.local.discard_orphan(offered)?;

        let mut sink = match self.local.new_write_sink(offered) {
            Ok(sink) => sink.expecting(expected),
            Err(DepotError::ArtifactExists(_)) => return Ok(()),
            Err(e) => return Err(e),
        };

        debug!("Fetching {} from {}", offered, remote.name());
        let outcome = remote.fetch_into(offered, &mut sink);
        let written = sink.written().cloned();
        drop(sink);

        match outcome {
            Ok(FetchStatus::Transferred) => {
                self.local.check_outcome(offered, true)?;
                info!("Mirrored {} from {}", offered, remote.name());
                Ok(())
            }
            Ok(FetchStatus::NotFound) => {
                self.local.check_outcome(offered, false)?;
                Err(DepotError::mirroring_failed(
                    &offered.key,
                    DepotError::remote(
                        remote.name(),
                        format!("lists {} but could not deliver it", offered),
                    ),
                ))
            }
            Err(DepotError::ArtifactExists(_)) => {
                // Lost a commit race: keep the winner's copy if it holds the same bytes
                let adopted = self.local.contains(offered)
                    || match &written {
                        Some(sums) => self.local.adopt_orphan(offered, &Expectations::from(sums))?,
                        None => false,
                    };
                if adopted {
                    debug!("{} was stored concurrently, using that copy", offered);
                    Ok(())
                } else {
                    Err(DepotError::mirroring_failed(
                        &offered.key,
                        DepotError::ArtifactExists(offered.to_string()),
                    ))
                }
            }
            Err(e) => {
                self.local.check_outcome(offered, false)?;
                warn!("Mirroring {} from {} failed: {}", offered, remote.name(), e);
                Err(DepotError::mirroring_failed(&offered.key, e))
            }
        }
    }
}

/// Give a consumer sink its terminal call when nothing will be served
fn release(sink: &mut dyn ArtifactSink) {
    if let Err(e) = sink.abort_write() {
        warn!("Failed to release sink: {}", e);
    }
}
