//! On-disk artifact store
//!
//! Files live under the store root in the coordinate layout; the index sits
//! at `<root>/.meta/index.json`. Writes go through [`StoreWriteSink`], which
//! stages bytes in a temp file next to the destination and publishes them
//! with a no-clobber rename, so readers never see a partial file and a
//! committed descriptor is never overwritten.

use super::checksum::{file_checksums, Checksums, Expectations, HashingWriter, PROP_SHA256};
use super::coordinate::CoordinateMapper;
use super::index::{ArtifactIndex, IndexedDescriptor};
use super::sink::{pump, ArtifactSink, Lifecycle, RawArtifactSink, SinkState};
use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::error::{DepotError, DepotResult};
use chrono::Utc;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Directory under the store root holding store metadata
pub const META_DIR: &str = ".meta";

/// Index file name inside [`META_DIR`]
pub const INDEX_FILE: &str = "index.json";

const STAGING_PREFIX: &str = ".depot-";
const STAGING_SUFFIX: &str = ".part";

/// Local store of artifact files plus their index
pub struct LocalArtifactStore {
    root: PathBuf,
    index_path: PathBuf,
    mapper: CoordinateMapper,
    index: Mutex<ArtifactIndex>,
}

/// Result of checking the index against the files on disk
#[derive(Debug, Default)]
pub struct ConsistencyReport {
    /// Number of indexed descriptors examined
    pub checked: usize,
    /// Indexed descriptors whose file is gone
    pub missing: Vec<IndexedDescriptor>,
    /// Indexed descriptors whose file no longer matches the recorded checksum
    pub corrupt: Vec<IndexedDescriptor>,
    /// Files under the root that no index entry accounts for
    pub orphans: Vec<PathBuf>,
}

impl ConsistencyReport {
    /// True when every indexed descriptor is backed by an intact file
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.corrupt.is_empty()
    }
}

impl LocalArtifactStore {
    /// Open (or create) a store rooted at `root` with the default layout
    pub fn open(root: impl Into<PathBuf>) -> DepotResult<Self> {
        Self::open_with(root, CoordinateMapper::default())
    }

    /// Open (or create) a store with a custom coordinate mapper
    ///
    /// The index is loaded and reconciled against the filesystem once, here.
    pub fn open_with(root: impl Into<PathBuf>, mapper: CoordinateMapper) -> DepotResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| DepotError::io(format!("creating store root {}", root.display()), e))?;

        let index_path = root.join(META_DIR).join(INDEX_FILE);
        let index = ArtifactIndex::load(&index_path, &root)?;
        debug!(
            "Opened store at {} with {} descriptors",
            root.display(),
            index.len()
        );

        Ok(Self {
            root,
            index_path,
            mapper,
            index: Mutex::new(index),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    fn lock(&self) -> MutexGuard<'_, ArtifactIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.lock().contains_key(key)
    }

    /// Whether a descriptor's `(key, format)` is present
    pub fn contains(&self, descriptor: &ArtifactDescriptor) -> bool {
        self.lock().contains(&self.mapper.normalize(descriptor))
    }

    /// All formats held for a key
    pub fn descriptors(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.lock().descriptors(key)
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.lock().keys().cloned().collect()
    }

    /// Snapshot of every index entry
    pub fn entries(&self) -> Vec<IndexedDescriptor> {
        self.lock().iter().cloned().collect()
    }

    /// Existing backing file of a descriptor
    pub fn file_for(&self, descriptor: &ArtifactDescriptor) -> Option<PathBuf> {
        let relative = self.lock().get(&self.mapper.normalize(descriptor))?.path.clone();
        let path = self.root.join(relative);
        if path.is_file() {
            Some(path)
        } else {
            debug!("{} is indexed but {} is missing", descriptor, path.display());
            None
        }
    }

    /// Existing backing file of a key's canonical format
    pub fn file_for_key(&self, key: &ArtifactKey) -> Option<PathBuf> {
        self.file_for(&ArtifactDescriptor::canonical(key.clone()))
    }

    /// Where a descriptor's file lives (or would live) in this store
    pub fn storage_location(&self, descriptor: &ArtifactDescriptor) -> DepotResult<PathBuf> {
        Ok(self.root.join(self.mapper.relative_path(descriptor)?))
    }

    /// Create a sink that writes a new descriptor into the store
    ///
    /// Fails with `ArtifactExists` before any byte is written if the
    /// descriptor is already present.
    pub fn new_write_sink(&self, descriptor: &ArtifactDescriptor) -> DepotResult<StoreWriteSink<'_>> {
        let descriptor = self.mapper.normalize(descriptor);
        let relative = self.mapper.relative_path(&descriptor)?;

        if self.lock().contains(&descriptor) {
            return Err(DepotError::ArtifactExists(descriptor.to_string()));
        }

        debug!("Opened write sink for {}", descriptor);
        Ok(StoreWriteSink {
            store: self,
            lifecycle: Lifecycle::new(&descriptor),
            descriptor,
            relative,
            staging: None,
            expected: Expectations::default(),
            written: None,
        })
    }

    /// Stream a stored descriptor into a sink
    pub fn read_into<S: ArtifactSink + ?Sized>(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut S,
    ) -> DepotResult<u64> {
        let not_found = || DepotError::ArtifactNotFound(descriptor.to_string());
        let path = self.file_for(descriptor).ok_or_else(not_found)?;

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(e) => return Err(DepotError::io(format!("opening {}", path.display()), e)),
        };
        pump(&mut file, sink)
    }

    /// Remove one descriptor; a no-op when it is absent
    pub fn remove(&self, descriptor: &ArtifactDescriptor) -> DepotResult<bool> {
        let removed = self.lock().remove(&self.mapper.normalize(descriptor));
        match removed {
            Some(entry) => {
                self.delete_files(std::slice::from_ref(&entry))?;
                info!("Removed {}", entry.descriptor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove every descriptor of a key at once; returns how many were removed
    pub fn remove_key(&self, key: &ArtifactKey) -> DepotResult<usize> {
        let removed = self.lock().remove_key(key);
        self.delete_files(&removed)?;
        if !removed.is_empty() {
            info!("Removed {} descriptor(s) of {}", removed.len(), key);
        }
        Ok(removed.len())
    }

    /// Remove every artifact in the store
    pub fn remove_all(&self) -> DepotResult<usize> {
        let removed: Vec<IndexedDescriptor> = {
            let mut index = self.lock();
            let keys: Vec<ArtifactKey> = index.keys().cloned().collect();
            keys.iter().flat_map(|k| index.remove_key(k)).collect()
        };
        self.delete_files(&removed)?;
        Ok(removed.len())
    }

    // Entries are already out of the index, so readers see the removal as a
    // whole even if a file delete fails below.
    fn delete_files(&self, entries: &[IndexedDescriptor]) -> DepotResult<()> {
        let mut first_error = None;
        for entry in entries {
            let path = self.root.join(&entry.path);
            match fs::remove_file(&path) {
                Ok(()) => self.prune_empty_dirs(&path),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    first_error
                        .get_or_insert_with(|| DepotError::io(format!("deleting {}", path.display()), e));
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn prune_empty_dirs(&self, file: &Path) {
        let mut dir = file.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }

    /// Persist the index
    pub fn save(&self) -> DepotResult<()> {
        self.lock().save(&self.index_path)
    }

    /// Whether the index has changes not yet saved
    pub fn is_dirty(&self) -> bool {
        self.lock().is_dirty()
    }

    /// Index a file already at a descriptor's location if it matches `expected`
    ///
    /// Returns false when there is no such file or it does not match.
    pub fn adopt_orphan(
        &self,
        descriptor: &ArtifactDescriptor,
        expected: &Expectations,
    ) -> DepotResult<bool> {
        let mut descriptor = self.mapper.normalize(descriptor);
        let relative = self.mapper.relative_path(&descriptor)?;
        let path = self.root.join(&relative);

        if expected.is_empty() || self.contains(&descriptor) || !path.is_file() {
            return Ok(false);
        }

        // The index lock is not held while hashing
        let actual = match file_checksums(&path) {
            Ok(actual) => actual,
            Err(e) => {
                debug!("Cannot adopt {}: {}", path.display(), e);
                return Ok(false);
            }
        };
        if !expected.matches(&actual) {
            return Ok(false);
        }
        actual.record(&mut descriptor);

        let mut index = self.lock();
        if index.contains(&descriptor) {
            return Ok(false);
        }
        info!("Adopted existing file for {}", descriptor);
        index.insert(IndexedDescriptor {
            descriptor,
            path: relative,
            added_at: Utc::now(),
        });
        Ok(true)
    }

    /// Delete a file at a descriptor's location that the index does not own
    pub fn discard_orphan(&self, descriptor: &ArtifactDescriptor) -> DepotResult<bool> {
        let descriptor = self.mapper.normalize(descriptor);
        let path = self.storage_location(&descriptor)?;

        let index = self.lock();
        if index.contains(&descriptor) {
            return Ok(false);
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                warn!("Discarded unindexed file {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(DepotError::io(format!("deleting {}", path.display()), e)),
        }
    }

    /// Check every indexed descriptor against its file
    pub fn verify(&self) -> DepotResult<ConsistencyReport> {
        let entries = self.entries();
        let mut report = ConsistencyReport {
            checked: entries.len(),
            ..Default::default()
        };

        let indexed: HashSet<PathBuf> = entries.iter().map(|e| e.path.clone()).collect();
        for entry in entries {
            let path = self.root.join(&entry.path);
            if !path.is_file() {
                report.missing.push(entry);
                continue;
            }
            if let Some(recorded) = entry.descriptor.property(PROP_SHA256) {
                if file_checksums(&path)?.sha256 != recorded {
                    report.corrupt.push(entry);
                }
            }
        }

        self.collect_orphans(&self.root, &indexed, &mut report.orphans)?;
        report.orphans.sort();
        Ok(report)
    }

    fn collect_orphans(
        &self,
        dir: &Path,
        indexed: &HashSet<PathBuf>,
        orphans: &mut Vec<PathBuf>,
    ) -> DepotResult<()> {
        let read_dir = fs::read_dir(dir)
            .map_err(|e| DepotError::io(format!("listing {}", dir.display()), e))?;

        for entry in read_dir {
            let entry = entry.map_err(|e| DepotError::io(format!("listing {}", dir.display()), e))?;
            let path = entry.path();
            if dir == self.root && entry.file_name() == META_DIR {
                continue;
            }
            if path.is_dir() {
                self.collect_orphans(&path, indexed, orphans)?;
            } else if let Ok(relative) = path.strip_prefix(&self.root) {
                if !indexed.contains(relative) {
                    orphans.push(relative.to_path_buf());
                }
            }
        }
        Ok(())
    }

    /// Drop missing and corrupt descriptors found by [`verify`](Self::verify)
    pub fn repair(&self, report: &ConsistencyReport) -> DepotResult<usize> {
        let mut repaired = 0;
        {
            let mut index = self.lock();
            for entry in &report.missing {
                if index.remove(&entry.descriptor).is_some() {
                    repaired += 1;
                }
            }
        }
        for entry in &report.corrupt {
            if self.remove(&entry.descriptor)? {
                repaired += 1;
            }
        }
        if repaired > 0 {
            info!("Repaired {} index entries", repaired);
        }
        Ok(repaired)
    }

    /// Assert that a descriptor's presence agrees with a reported outcome
    pub fn check_outcome(&self, descriptor: &ArtifactDescriptor, committed: bool) -> DepotResult<()> {
        let present = self.file_for(descriptor).is_some();
        match (committed, present) {
            (true, false) => Err(DepotError::Inconsistent(format!(
                "{} was reported stored but is absent",
                descriptor
            ))),
            (false, true) => Err(DepotError::Inconsistent(format!(
                "{} was reported failed but is present",
                descriptor
            ))),
            _ => Ok(()),
        }
    }
}

/// Write sink that publishes into a [`LocalArtifactStore`] on commit
pub struct StoreWriteSink<'a> {
    store: &'a LocalArtifactStore,
    descriptor: ArtifactDescriptor,
    relative: PathBuf,
    lifecycle: Lifecycle,
    staging: Option<HashingWriter<NamedTempFile>>,
    expected: Expectations,
    written: Option<Checksums>,
}

impl StoreWriteSink<'_> {
    /// Require the committed bytes to match these checksums
    pub fn expecting(mut self, expected: Expectations) -> Self {
        self.expected = expected;
        self
    }

    /// Final destination of the committed file
    pub fn destination(&self) -> PathBuf {
        self.store.root.join(&self.relative)
    }

    /// Checksums of the bytes handed to the last commit attempt
    pub fn written(&self) -> Option<&Checksums> {
        self.written.as_ref()
    }

    fn fail(&mut self, err: DepotError) -> DepotError {
        self.lifecycle.aborted();
        debug!("Commit of {} failed: {}", self.descriptor, err);
        err
    }

    fn publish(&mut self, staged: NamedTempFile, checksums: Checksums) -> DepotResult<()> {
        let mut descriptor = self.descriptor.clone();
        checksums.record(&mut descriptor);
        let destination = self.destination();

        let mut index = self.store.lock();
        if index.contains(&descriptor) {
            return Err(DepotError::ArtifactExists(descriptor.to_string()));
        }
        match staged.persist_noclobber(&destination) {
            Ok(_) => {}
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                return Err(DepotError::ArtifactExists(descriptor.to_string()));
            }
            Err(e) => {
                return Err(DepotError::io(
                    format!("publishing {}", destination.display()),
                    e.error,
                ));
            }
        }
        index.insert(IndexedDescriptor {
            descriptor,
            path: self.relative.clone(),
            added_at: Utc::now(),
        });
        Ok(())
    }
}

impl ArtifactSink for StoreWriteSink<'_> {
    fn artifact_to_be_written(&self) -> &ArtifactKey {
        &self.descriptor.key
    }

    fn begin_write(&mut self) -> DepotResult<&mut dyn Write> {
        self.lifecycle.begin()?;
        self.staging = None;

        let destination = self.destination();
        let dir = destination
            .parent()
            .ok_or_else(|| DepotError::Internal(format!("{} has no parent", destination.display())))?;
        fs::create_dir_all(dir).map_err(|e| DepotError::io(format!("creating {}", dir.display()), e))?;

        let staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| DepotError::io(format!("staging write in {}", dir.display()), e))?;
        Ok(self.staging.insert(HashingWriter::new(staged)))
    }

    fn commit_write(&mut self) -> DepotResult<()> {
        self.lifecycle.check_commit()?;
        let Some(staging) = self.staging.take() else {
            return Err(self.fail(DepotError::Internal("no staged write".to_string())));
        };

        let checksums = staging.checksums();
        self.written = Some(checksums.clone());
        let staged = staging.into_inner();

        if let Err(e) = staged.as_file().sync_all() {
            return Err(self.fail(DepotError::io("syncing staged write", e)));
        }
        if let Err(e) = self.expected.verify(&self.descriptor, &checksums) {
            return Err(self.fail(e));
        }
        if let Err(e) = self.publish(staged, checksums.clone()) {
            return Err(self.fail(e));
        }

        self.lifecycle.committed();
        info!("Stored {} ({} bytes)", self.descriptor, checksums.size);

        let destination = self.destination();
        if !destination.is_file() {
            return Err(DepotError::Inconsistent(format!(
                "{} committed but {} is missing",
                self.descriptor,
                destination.display()
            )));
        }
        Ok(())
    }

    fn abort_write(&mut self) -> DepotResult<()> {
        if self.lifecycle.check_abort()? {
            self.staging = None;
            self.lifecycle.aborted();
            debug!("Aborted write of {}", self.descriptor);
        }
        Ok(())
    }

    fn state(&self) -> SinkState {
        self.lifecycle.state()
    }
}

impl RawArtifactSink for StoreWriteSink<'_> {
    fn descriptor_to_be_written(&self) -> &ArtifactDescriptor {
        &self.descriptor
    }
}

impl Drop for StoreWriteSink<'_> {
    fn drop(&mut self) {
        if self.lifecycle.state() == SinkState::Writing {
            debug!("Discarding uncommitted write of {}", self.descriptor);
        }
    }
}
