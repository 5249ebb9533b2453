//! Mirroring from remote sources into a local store

use depot::artifact::{ArtifactDescriptor, ArtifactKey, TransferPolicy};
use depot::mirror::{
    DirectorySource, FetchStatus, MirrorOptions, MirroringProvider, RemoteArtifactSource, Retrieval,
};
use depot::store::{ArtifactSink, LocalArtifactStore, RawArtifactSink, RawStreamSink, StreamSink};
use depot::{DepotError, DepotResult};
use std::fs;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const CANONICAL_BYTES: &[u8] = b"canonical bundle bytes";
const PACKED_BYTES: &[u8] = b"packed";

fn key() -> ArtifactKey {
    ArtifactKey::new("bundle", "K", "1.0")
}

/// Directory source that records every fetch it serves
struct CountingSource {
    inner: DirectorySource,
    fetched: Arc<Mutex<Vec<ArtifactDescriptor>>>,
}

impl CountingSource {
    fn new(root: &std::path::Path) -> (Self, Arc<Mutex<Vec<ArtifactDescriptor>>>) {
        let fetched = Arc::new(Mutex::new(Vec::new()));
        let source = Self {
            inner: DirectorySource::new("remote", root),
            fetched: Arc::clone(&fetched),
        };
        (source, fetched)
    }
}

impl RemoteArtifactSource for CountingSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn descriptors(&self, key: &ArtifactKey) -> DepotResult<Vec<ArtifactDescriptor>> {
        self.inner.descriptors(key)
    }

    fn fetch_into(
        &self,
        descriptor: &ArtifactDescriptor,
        sink: &mut dyn RawArtifactSink,
    ) -> DepotResult<FetchStatus> {
        self.fetched.lock().unwrap().push(descriptor.clone());
        self.inner.fetch_into(descriptor, sink)
    }
}

/// A remote store holding the given descriptors
fn remote_with(entries: &[(ArtifactDescriptor, &[u8])]) -> TempDir {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    for (descriptor, bytes) in entries {
        let mut sink = store.new_write_sink(descriptor).unwrap();
        sink.begin_write().unwrap().write_all(bytes).unwrap();
        sink.commit_write().unwrap();
    }
    store.save().unwrap();
    temp
}

/// Overwrite a remote file so it no longer matches its declared checksum
fn corrupt(remote: &TempDir, descriptor: &ArtifactDescriptor) {
    let store = LocalArtifactStore::open(remote.path()).unwrap();
    fs::write(store.file_for(descriptor).unwrap(), b"garbage").unwrap();
}

fn restore(remote: &TempDir, descriptor: &ArtifactDescriptor, bytes: &[u8]) {
    let store = LocalArtifactStore::open(remote.path()).unwrap();
    fs::write(store.file_for(descriptor).unwrap(), bytes).unwrap();
}

struct Fixture {
    _local_dir: TempDir,
    local: Arc<LocalArtifactStore>,
    provider: MirroringProvider,
    fetched: Arc<Mutex<Vec<ArtifactDescriptor>>>,
}

fn fixture(remote: &TempDir, options: MirrorOptions) -> Fixture {
    let local_dir = TempDir::new().unwrap();
    let local = Arc::new(LocalArtifactStore::open(local_dir.path()).unwrap());
    let (source, fetched) = CountingSource::new(remote.path());
    let provider = MirroringProvider::new(Arc::clone(&local), options).with_remote(Box::new(source));
    Fixture {
        _local_dir: local_dir,
        local,
        provider,
        fetched,
    }
}

fn fetch_count(fixture: &Fixture, descriptor: &ArtifactDescriptor) -> usize {
    fixture
        .fetched
        .lock()
        .unwrap()
        .iter()
        .filter(|d| *d == descriptor)
        .count()
}

#[test]
fn mirrors_derived_and_canonical_on_miss() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES), (packed.clone(), PACKED_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    assert!(!fx.provider.contains_key(&key()));
    assert!(fx.provider.ensure_available(&key()).unwrap());

    assert!(fx.local.contains(&canonical));
    assert!(fx.local.contains(&packed));
    assert_eq!(fs::read(fx.local.file_for(&canonical).unwrap()).unwrap(), CANONICAL_BYTES);
    let order: Vec<ArtifactDescriptor> = fx.fetched.lock().unwrap().clone();
    assert_eq!(order, vec![packed, canonical]);
}

#[test]
fn local_hit_does_not_touch_remote() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    assert!(fx.provider.ensure_available(&key()).unwrap());
    assert!(fx.provider.ensure_available(&key()).unwrap());

    let mut sink = StreamSink::new(key(), Vec::new());
    assert_eq!(
        fx.provider.get_artifact(&mut sink).unwrap(),
        Retrieval::Served(CANONICAL_BYTES.len() as u64)
    );
    assert_eq!(sink.into_inner(), CANONICAL_BYTES);
    assert_eq!(fetch_count(&fx, &canonical), 1);
}

#[test]
fn corrupt_derived_without_canonical_fails_and_leaves_nothing() {
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(packed.clone(), PACKED_BYTES)]);
    corrupt(&remote, &packed);
    let fx = fixture(&remote, MirrorOptions::default());

    let err = fx.provider.ensure_available(&key()).unwrap_err();
    match err {
        DepotError::MirroringFailed { ref key, .. } => assert_eq!(key, "bundle:K:1.0"),
        ref other => panic!("expected MirroringFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("bundle:K:1.0"));

    assert!(!fx.provider.contains_key(&key()));
    assert!(!fx.local.contains(&packed));
    assert!(fx.local.verify().unwrap().orphans.is_empty());
}

#[test]
fn get_artifact_surfaces_mirroring_failure() {
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(packed.clone(), PACKED_BYTES)]);
    corrupt(&remote, &packed);
    let fx = fixture(&remote, MirrorOptions::default());

    let mut sink = StreamSink::new(key(), Vec::new());
    assert!(matches!(
        fx.provider.get_artifact(&mut sink),
        Err(DepotError::MirroringFailed { .. })
    ));
    assert!(sink.into_inner().is_empty());
}

#[test]
fn retry_fetches_only_what_is_missing() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES), (packed.clone(), PACKED_BYTES)]);
    corrupt(&remote, &canonical);
    let fx = fixture(&remote, MirrorOptions::default());

    let err = fx.provider.ensure_available(&key()).unwrap_err();
    assert!(matches!(err, DepotError::MirroringFailed { .. }));
    assert!(err.is_retryable());
    assert!(fx.local.contains(&packed));
    assert!(!fx.local.contains(&canonical));

    // The remote gets fixed; the retry only transfers the canonical bytes
    restore(&remote, &canonical, CANONICAL_BYTES);
    assert!(fx.provider.ensure_available(&key()).unwrap());

    assert!(fx.local.contains(&packed));
    assert!(fx.local.contains(&canonical));
    assert_eq!(fetch_count(&fx, &packed), 1);
    assert_eq!(fetch_count(&fx, &canonical), 2);
}

#[test]
fn unknown_key_is_not_found_without_writes() {
    let remote = remote_with(&[(ArtifactDescriptor::canonical(key()), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());
    let missing = ArtifactKey::new("bundle", "Missing", "9.9");

    assert!(!fx.provider.ensure_available(&missing).unwrap());
    let mut sink = StreamSink::new(missing.clone(), Vec::new());
    assert_eq!(fx.provider.get_artifact(&mut sink).unwrap(), Retrieval::NotFound);
    assert_eq!(fx.provider.artifact_file(&missing).unwrap(), None);

    assert!(fx.fetched.lock().unwrap().is_empty());
    assert!(fx.local.entries().is_empty());
    assert!(fx.local.verify().unwrap().orphans.is_empty());
}

#[test]
fn require_canonical_never_substitutes_derived() {
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(packed, PACKED_BYTES)]);
    let options = MirrorOptions {
        policy: TransferPolicy::RequireCanonical,
        ..Default::default()
    };
    let fx = fixture(&remote, options);

    assert!(!fx.provider.ensure_available(&key()).unwrap());
    assert!(fx.fetched.lock().unwrap().is_empty());
    assert!(!fx.local.contains_key(&key()));
}

#[test]
fn require_canonical_skips_derived_fetch() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES), (packed.clone(), PACKED_BYTES)]);
    let options = MirrorOptions {
        policy: TransferPolicy::RequireCanonical,
        ..Default::default()
    };
    let fx = fixture(&remote, options);

    assert!(fx.provider.ensure_available(&key()).unwrap());
    assert!(!fx.local.contains(&packed));
    assert_eq!(fetch_count(&fx, &packed), 0);
}

#[test]
fn raw_read_serves_exact_format() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES), (packed.clone(), PACKED_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    let mut sink = RawStreamSink::new(packed.clone(), Vec::new());
    assert_eq!(
        fx.provider.get_raw_artifact(&mut sink).unwrap(),
        Retrieval::Served(PACKED_BYTES.len() as u64)
    );
    assert_eq!(sink.into_inner(), PACKED_BYTES);
    assert!(fx.local.contains(&packed));
    assert!(!fx.local.contains(&canonical));
}

#[test]
fn offline_never_consults_remote() {
    let remote = remote_with(&[(ArtifactDescriptor::canonical(key()), CANONICAL_BYTES)]);
    let options = MirrorOptions {
        offline: true,
        ..Default::default()
    };
    let fx = fixture(&remote, options);

    assert!(!fx.provider.ensure_available(&key()).unwrap());
    assert!(!fx.provider.is_available(&key()).unwrap());
    assert!(fx.fetched.lock().unwrap().is_empty());
}

#[test]
fn availability_query_does_not_write() {
    let remote = remote_with(&[(ArtifactDescriptor::canonical(key()), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    assert!(fx.provider.is_available(&key()).unwrap());
    assert!(!fx.provider.contains_key(&key()));
    assert!(fx.provider.descriptors(&key()).is_empty());
    assert!(fx.fetched.lock().unwrap().is_empty());
}

#[test]
fn matching_unindexed_file_is_adopted_without_download() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    let destination = fx.local.storage_location(&canonical).unwrap();
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, CANONICAL_BYTES).unwrap();

    assert!(fx.provider.ensure_available(&key()).unwrap());
    assert_eq!(fetch_count(&fx, &canonical), 0);
    assert!(fx.local.contains(&canonical));
}

#[test]
fn mismatching_unindexed_file_is_replaced() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    let destination = fx.local.storage_location(&canonical).unwrap();
    fs::create_dir_all(destination.parent().unwrap()).unwrap();
    fs::write(&destination, b"stale leftovers").unwrap();

    assert!(fx.provider.ensure_available(&key()).unwrap());
    assert_eq!(fetch_count(&fx, &canonical), 1);
    assert_eq!(fs::read(&destination).unwrap(), CANONICAL_BYTES);
}

#[test]
fn revalidation_replaces_drifted_local_copy() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);

    for (revalidate, expected) in [(false, &b"locally built"[..]), (true, CANONICAL_BYTES)] {
        let options = MirrorOptions {
            revalidate,
            ..Default::default()
        };
        let fx = fixture(&remote, options);
        let mut sink = fx.local.new_write_sink(&canonical).unwrap();
        sink.begin_write().unwrap().write_all(b"locally built").unwrap();
        sink.commit_write().unwrap();
        drop(sink);

        assert!(fx.provider.ensure_available(&key()).unwrap());
        let path = fx.local.file_for(&canonical).unwrap();
        assert_eq!(fs::read(path).unwrap(), expected);
    }
}

#[test]
fn empty_remote_is_skipped() {
    let canonical = ArtifactDescriptor::canonical(key());
    let empty = remote_with(&[]);
    let full = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);

    let local_dir = TempDir::new().unwrap();
    let local = Arc::new(LocalArtifactStore::open(local_dir.path()).unwrap());
    let provider = MirroringProvider::new(Arc::clone(&local), MirrorOptions::default())
        .with_remote(Box::new(DirectorySource::new("empty", empty.path())))
        .with_remote(Box::new(DirectorySource::new("full", full.path())));

    assert_eq!(provider.remote_names(), vec!["empty", "full"]);
    assert_eq!(
        provider.artifact_file(&key()).unwrap(),
        local.file_for(&canonical)
    );
    assert!(local.contains(&canonical));
}

#[test]
fn concurrent_requests_fetch_once() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    std::thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| {
                assert!(fx.provider.ensure_available(&key()).unwrap());
            });
        }
    });

    assert_eq!(fetch_count(&fx, &canonical), 1);
    assert_eq!(fx.local.entries().len(), 1);
}

#[test]
fn mirrored_state_survives_save_and_reopen() {
    let canonical = ArtifactDescriptor::canonical(key());
    let remote = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = fixture(&remote, MirrorOptions::default());

    assert!(fx.provider.ensure_available(&key()).unwrap());
    fx.local.save().unwrap();

    let reopened = LocalArtifactStore::open(fx.local.root()).unwrap();
    assert!(reopened.contains(&canonical));
    let stored = reopened.descriptors(&key());
    assert_eq!(
        stored[0].property("download.size"),
        Some(CANONICAL_BYTES.len().to_string().as_str())
    );
}

#[test]
fn exact_file_request_mirrors_only_that_format() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let remote = remote_with(&[
        (canonical.clone(), CANONICAL_BYTES),
        (packed.clone(), PACKED_BYTES),
    ]);
    let fx = fixture(&remote, MirrorOptions::default());

    let path = fx.provider.artifact_file_for(&packed).unwrap().unwrap();
    assert_eq!(fs::read(path).unwrap(), PACKED_BYTES);
    assert!(!fx.local.contains(&canonical));
    assert_eq!(fetch_count(&fx, &canonical), 0);

    let other = ArtifactDescriptor::packed(ArtifactKey::new("bundle", "Other", "1.0"));
    assert_eq!(fx.provider.artifact_file_for(&other).unwrap(), None);
}

/// Local store fronted by two directory remotes, the first taking priority
fn two_remotes(first: &TempDir, second: &TempDir, options: MirrorOptions) -> Fixture {
    let local_dir = TempDir::new().unwrap();
    let local = Arc::new(LocalArtifactStore::open(local_dir.path()).unwrap());
    let (source, fetched) = CountingSource::new(first.path());
    let provider = MirroringProvider::new(Arc::clone(&local), options)
        .with_remote(Box::new(source))
        .with_remote(Box::new(DirectorySource::new("second", second.path())));
    Fixture {
        _local_dir: local_dir,
        local,
        provider,
        fetched,
    }
}

#[test]
fn canonical_from_lower_priority_remote() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());

    for policy in [TransferPolicy::PreferDerived, TransferPolicy::RequireCanonical] {
        let derived_only = remote_with(&[(packed.clone(), PACKED_BYTES)]);
        let full = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
        let options = MirrorOptions {
            policy,
            ..Default::default()
        };
        let fx = two_remotes(&derived_only, &full, options);

        assert!(fx.provider.is_available(&key()).unwrap(), "{policy}");
        assert!(fx.provider.ensure_available(&key()).unwrap(), "{policy}");
        let path = fx.local.file_for(&canonical).unwrap();
        assert_eq!(fs::read(path).unwrap(), CANONICAL_BYTES);
        assert_eq!(
            fx.local.contains(&packed),
            policy == TransferPolicy::PreferDerived
        );
    }
}

#[test]
fn exact_format_from_lower_priority_remote() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let canonical_only = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let derived_only = remote_with(&[(packed.clone(), PACKED_BYTES)]);
    let fx = two_remotes(&canonical_only, &derived_only, MirrorOptions::default());

    let mut sink = RawStreamSink::new(packed.clone(), Vec::new());
    assert_eq!(
        fx.provider.get_raw_artifact(&mut sink).unwrap(),
        Retrieval::Served(PACKED_BYTES.len() as u64)
    );
    assert_eq!(sink.into_inner(), PACKED_BYTES);
    assert!(!fx.local.contains(&canonical));
}

#[test]
fn failed_delivery_does_not_fall_back() {
    let canonical = ArtifactDescriptor::canonical(key());
    let packed = ArtifactDescriptor::packed(key());
    let broken = remote_with(&[(packed.clone(), PACKED_BYTES)]);
    corrupt(&broken, &packed);
    let full = remote_with(&[(canonical.clone(), CANONICAL_BYTES)]);
    let fx = two_remotes(&broken, &full, MirrorOptions::default());

    assert!(matches!(
        fx.provider.ensure_available(&key()),
        Err(DepotError::MirroringFailed { .. })
    ));
    assert!(!fx.local.contains_key(&key()));
}
