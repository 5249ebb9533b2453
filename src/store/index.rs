//! Persistent record of the descriptors a store holds
//!
//! The index is a cache of what should be on disk; the filesystem is
//! authoritative. Loading drops entries whose file is gone and marks the
//! index dirty so the next [`ArtifactIndex::save`] rewrites it. An
//! unreadable or corrupt index file is treated as empty.

use crate::artifact::{ArtifactDescriptor, ArtifactKey};
use crate::error::{DepotError, DepotResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Current index file format version
pub const INDEX_VERSION: u32 = 1;

/// A descriptor together with where its bytes live
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedDescriptor {
    #[serde(flatten)]
    pub descriptor: ArtifactDescriptor,
    /// Path relative to the store root
    pub path: PathBuf,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    #[serde(default)]
    artifacts: Vec<IndexedDescriptor>,
}

/// In-memory index keyed by artifact key
#[derive(Debug, Default)]
pub struct ArtifactIndex {
    entries: BTreeMap<ArtifactKey, Vec<IndexedDescriptor>>,
    dirty: bool,
}

impl ArtifactIndex {
    /// Parse index file contents
    ///
    /// Unknown fields are ignored. Entries that cannot be trusted (invalid
    /// key, path escaping the root, duplicate descriptor) are dropped and
    /// the index is marked dirty.
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::default();
        }

        let file: IndexFile = match serde_json::from_slice(bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!("Ignoring corrupt artifact index: {}", e);
                return Self {
                    entries: BTreeMap::new(),
                    dirty: true,
                };
            }
        };

        if file.version > INDEX_VERSION {
            debug!(
                "Index version {} is newer than {}, reading known fields",
                file.version, INDEX_VERSION
            );
        }

        let mut index = Self::default();
        let mut dropped = false;
        for entry in file.artifacts {
            if let Err(e) = entry.descriptor.key.validate() {
                warn!("Dropping index entry: {}", e);
                dropped = true;
                continue;
            }
            if !is_contained(&entry.path) {
                warn!(
                    "Dropping index entry for {} with unsafe path {}",
                    entry.descriptor,
                    entry.path.display()
                );
                dropped = true;
                continue;
            }
            if !index.insert(entry) {
                dropped = true;
            }
        }
        index.dirty = dropped;
        index
    }

    /// Load the index at `path` and reconcile it against files under `root`
    pub fn load(path: &Path, root: &Path) -> DepotResult<Self> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No index at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(DepotError::io(format!("reading index {}", path.display()), e));
            }
        };

        let mut index = Self::parse(&bytes);
        index.reconcile(root);
        Ok(index)
    }

    /// Drop entries whose backing file no longer exists
    ///
    /// Returns the dropped entries.
    pub fn reconcile(&mut self, root: &Path) -> Vec<IndexedDescriptor> {
        let mut dropped = Vec::new();

        self.entries.retain(|_, descriptors| {
            descriptors.retain(|entry| {
                if root.join(&entry.path).is_file() {
                    true
                } else {
                    warn!(
                        "Dropping {} from index: {} is missing",
                        entry.descriptor,
                        entry.path.display()
                    );
                    dropped.push(entry.clone());
                    false
                }
            });
            !descriptors.is_empty()
        });

        if !dropped.is_empty() {
            self.dirty = true;
        }
        dropped
    }

    /// Write the index to `path` atomically
    pub fn save(&mut self, path: &Path) -> DepotResult<()> {
        let parent = path
            .parent()
            .ok_or_else(|| DepotError::Internal(format!("index path {} has no parent", path.display())))?;
        std::fs::create_dir_all(parent)
            .map_err(|e| DepotError::io(format!("creating {}", parent.display()), e))?;

        let file = IndexFile {
            version: INDEX_VERSION,
            artifacts: self.iter().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|e| DepotError::io(format!("creating temp file in {}", parent.display()), e))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.as_file().sync_all())
            .map_err(|e| DepotError::io(format!("writing index {}", path.display()), e))?;
        tmp.persist(path)
            .map_err(|e| DepotError::io(format!("replacing index {}", path.display()), e.error))?;

        self.dirty = false;
        info!("Saved index with {} descriptors to {}", file.artifacts.len(), path.display());
        Ok(())
    }

    pub fn contains_key(&self, key: &ArtifactKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn contains(&self, descriptor: &ArtifactDescriptor) -> bool {
        self.get(descriptor).is_some()
    }

    pub fn get(&self, descriptor: &ArtifactDescriptor) -> Option<&IndexedDescriptor> {
        self.entries
            .get(&descriptor.key)?
            .iter()
            .find(|entry| entry.descriptor == *descriptor)
    }

    /// All descriptors known for a key, empty for an unknown key
    pub fn descriptors(&self, key: &ArtifactKey) -> Vec<ArtifactDescriptor> {
        self.entries
            .get(key)
            .map(|entries| entries.iter().map(|e| e.descriptor.clone()).collect())
            .unwrap_or_default()
    }

    /// Add an entry; returns false if the descriptor is already indexed
    pub fn insert(&mut self, entry: IndexedDescriptor) -> bool {
        let descriptors = self.entries.entry(entry.descriptor.key.clone()).or_default();
        if descriptors.iter().any(|e| e.descriptor == entry.descriptor) {
            return false;
        }
        descriptors.push(entry);
        self.dirty = true;
        true
    }

    pub fn remove(&mut self, descriptor: &ArtifactDescriptor) -> Option<IndexedDescriptor> {
        let descriptors = self.entries.get_mut(&descriptor.key)?;
        let pos = descriptors.iter().position(|e| e.descriptor == *descriptor)?;
        let removed = descriptors.remove(pos);
        if descriptors.is_empty() {
            self.entries.remove(&descriptor.key);
        }
        self.dirty = true;
        Some(removed)
    }

    pub fn remove_key(&mut self, key: &ArtifactKey) -> Vec<IndexedDescriptor> {
        match self.entries.remove(key) {
            Some(removed) => {
                self.dirty = true;
                removed
            }
            None => Vec::new(),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArtifactKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedDescriptor> {
        self.entries.values().flatten()
    }

    /// Number of indexed descriptors
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether in-memory state differs from what was last loaded or saved
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }
}

/// Whether a relative path stays inside the directory it is joined to
fn is_contained(path: &Path) -> bool {
    let mut components = path.components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}
