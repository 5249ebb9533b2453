//! Local store behavior through the public API

use depot::artifact::{ArtifactDescriptor, ArtifactKey, FormatTag, Gav};
use depot::store::{ArtifactSink, LocalArtifactStore, SinkState};
use depot::DepotError;
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;

fn bundle_b() -> ArtifactKey {
    ArtifactKey::new("bundle", "B", "2.0")
}

fn write(store: &LocalArtifactStore, descriptor: &ArtifactDescriptor, bytes: &[u8]) {
    let mut sink = store.new_write_sink(descriptor).unwrap();
    sink.begin_write().unwrap().write_all(bytes).unwrap();
    sink.commit_write().unwrap();
}

#[test]
fn committed_artifact_is_visible_with_exact_size() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    write(&store, &canonical, &[7u8; 111]);

    assert!(store.contains_key(&bundle_b()));
    assert!(store.contains(&canonical));
    let path = store.file_for(&canonical).unwrap();
    assert_eq!(fs::metadata(path).unwrap().len(), 111);
}

#[test]
fn second_begin_write_replaces_partial_stream() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    let mut sink = store.new_write_sink(&canonical).unwrap();
    sink.begin_write().unwrap().write_all(&[1u8; 11]).unwrap();
    sink.begin_write().unwrap().write_all(&[2u8; 22]).unwrap();
    sink.commit_write().unwrap();
    drop(sink);

    let bytes = fs::read(store.file_for(&canonical).unwrap()).unwrap();
    assert_eq!(bytes, vec![2u8; 22]);
}

#[test]
fn present_descriptor_is_never_clobbered() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());
    let packed = ArtifactDescriptor::packed(bundle_b());
    write(&store, &canonical, b"original");
    write(&store, &packed, b"packed original");

    for descriptor in [&canonical, &packed] {
        assert!(matches!(
            store.new_write_sink(descriptor),
            Err(DepotError::ArtifactExists(_))
        ));
    }
    // A descriptor built elsewhere with the same (key, format) is the same artifact
    let rebuilt = ArtifactDescriptor::with_format(bundle_b(), FormatTag::parse("canonical"))
        .with_property("origin", "elsewhere");
    assert!(matches!(
        store.new_write_sink(&rebuilt),
        Err(DepotError::ArtifactExists(_))
    ));

    let bytes = fs::read(store.file_for(&canonical).unwrap()).unwrap();
    assert_eq!(bytes, b"original");
}

#[test]
fn visibility_only_after_commit() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    let mut sink = store.new_write_sink(&canonical).unwrap();
    sink.begin_write().unwrap().write_all(b"partial").unwrap();
    assert!(!store.contains(&canonical));
    assert!(store.file_for(&canonical).is_none());

    sink.abort_write().unwrap();
    assert_eq!(sink.state(), SinkState::Aborted);
    drop(sink);
    assert!(!store.contains(&canonical));
    assert!(!store.storage_location(&canonical).unwrap().exists());

    let report = store.verify().unwrap();
    assert!(report.is_clean());
    assert!(report.orphans.is_empty());
}

#[test]
fn dropped_sink_behaves_as_aborted() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    {
        let mut sink = store.new_write_sink(&canonical).unwrap();
        sink.begin_write().unwrap().write_all(b"never committed").unwrap();
    }

    assert!(!store.contains(&canonical));
    assert!(store.verify().unwrap().orphans.is_empty());
    write(&store, &canonical, b"second try");
    assert!(store.contains(&canonical));
}

#[test]
fn explicit_defaults_share_coordinate_and_entry() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let key = ArtifactKey::new("osgi.bundle", "org.example.core", "1.2.3");

    let explicit = ArtifactDescriptor::canonical(key.clone())
        .with_gav(Gav::new("p2.osgi.bundle", "org.example.core", "1.2.3"))
        .with_classifier("")
        .with_extension("jar");
    let omitted = ArtifactDescriptor::canonical(key.clone());

    assert_eq!(
        store.storage_location(&explicit).unwrap(),
        store.storage_location(&omitted).unwrap()
    );

    write(&store, &explicit, b"bytes");
    assert!(store.contains(&omitted));
    assert_eq!(store.file_for(&omitted), store.file_for(&explicit));
    assert!(matches!(
        store.new_write_sink(&omitted),
        Err(DepotError::ArtifactExists(_))
    ));
    assert_eq!(store.entries().len(), 1);
}

#[test]
fn spelled_out_format_names_share_coordinate_and_entry() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());
    let packed = ArtifactDescriptor::packed(bundle_b());
    write(&store, &canonical, b"canonical");
    write(&store, &packed, b"packed");

    for (name, stored) in [("canonical", &canonical), ("", &canonical), ("packed", &packed)] {
        let mut spelled = stored.clone();
        spelled.format = FormatTag::Other(name.to_string());

        assert!(store.contains(&spelled), "{name:?}");
        assert_eq!(
            store.storage_location(&spelled).unwrap(),
            store.storage_location(stored).unwrap()
        );
        assert_eq!(store.file_for(&spelled), store.file_for(stored));
        assert!(matches!(
            store.new_write_sink(&spelled),
            Err(DepotError::ArtifactExists(_))
        ));
    }
    assert_eq!(store.entries().len(), 2);
}

#[test]
fn non_default_layout_fields_get_distinct_paths() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let key = ArtifactKey::new("binary", "launcher", "3.0");

    let plain = ArtifactDescriptor::canonical(key.clone());
    let sources = ArtifactDescriptor::canonical(key.clone()).with_classifier("sources");
    let packed = ArtifactDescriptor::packed(key);

    let paths = [
        store.storage_location(&plain).unwrap(),
        store.storage_location(&sources).unwrap(),
        store.storage_location(&packed).unwrap(),
    ];
    assert_ne!(paths[0], paths[1]);
    assert_ne!(paths[0], paths[2]);
    assert!(paths[0].to_string_lossy().ends_with("launcher-3.0.zip"));
    assert!(paths[2].to_string_lossy().ends_with("launcher-3.0.zip.pack.gz"));
}

#[test]
fn index_heals_after_out_of_band_delete() {
    let temp = TempDir::new().unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());
    let other = ArtifactDescriptor::canonical(ArtifactKey::new("bundle", "C", "1.0"));
    {
        let store = LocalArtifactStore::open(temp.path()).unwrap();
        write(&store, &canonical, b"doomed");
        write(&store, &other, b"kept");
        store.save().unwrap();
        fs::remove_file(store.file_for(&canonical).unwrap()).unwrap();
    }

    let store = LocalArtifactStore::open(temp.path()).unwrap();
    assert!(!store.contains(&canonical));
    assert!(!store.contains_key(&bundle_b()));
    assert!(store.contains(&other));
    assert!(store.is_dirty());

    store.save().unwrap();
    let index = fs::read_to_string(store.index_path()).unwrap();
    assert!(!index.contains("\"B\""));
    assert!(index.contains("\"C\""));

    let reopened = LocalArtifactStore::open(temp.path()).unwrap();
    assert!(!reopened.is_dirty());
    assert_eq!(reopened.entries().len(), 1);
}

#[test]
fn corrupt_index_is_rebuilt_empty() {
    let temp = TempDir::new().unwrap();
    {
        let store = LocalArtifactStore::open(temp.path()).unwrap();
        write(&store, &ArtifactDescriptor::canonical(bundle_b()), b"bytes");
        store.save().unwrap();
        fs::write(store.index_path(), b"{ not json").unwrap();
    }

    let store = LocalArtifactStore::open(temp.path()).unwrap();
    assert!(!store.contains_key(&bundle_b()));
    assert!(store.is_dirty());
    // The file survives as an orphan until adopted or repaired
    assert_eq!(store.verify().unwrap().orphans.len(), 1);
}

#[test]
fn removal_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());
    let packed = ArtifactDescriptor::packed(bundle_b());
    write(&store, &canonical, b"canonical");
    write(&store, &packed, b"packed");

    assert!(store.remove(&packed).unwrap());
    assert!(!store.remove(&packed).unwrap());
    assert!(store.contains(&canonical));

    assert_eq!(store.remove_key(&bundle_b()).unwrap(), 1);
    assert_eq!(store.remove_key(&bundle_b()).unwrap(), 0);
    assert!(store.descriptors(&bundle_b()).is_empty());
}

#[test]
fn commit_race_keeps_first_writer() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    let mut first = store.new_write_sink(&canonical).unwrap();
    let mut second = store.new_write_sink(&canonical).unwrap();
    first.begin_write().unwrap().write_all(b"first").unwrap();
    second.begin_write().unwrap().write_all(b"second").unwrap();

    first.commit_write().unwrap();
    assert!(matches!(
        second.commit_write(),
        Err(DepotError::ArtifactExists(_))
    ));
    assert_eq!(second.state(), SinkState::Aborted);
    drop(first);
    drop(second);

    assert_eq!(fs::read(store.file_for(&canonical).unwrap()).unwrap(), b"first");
    assert_eq!(store.entries().len(), 1);
}

#[test]
fn concurrent_writers_of_distinct_keys() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(LocalArtifactStore::open(temp.path()).unwrap());

    std::thread::scope(|scope| {
        for i in 0..8 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                let key = ArtifactKey::new("bundle", format!("k{}", i), "1.0");
                write(&store, &ArtifactDescriptor::canonical(key), format!("bytes {}", i).as_bytes());
            });
        }
    });
    store.save().unwrap();

    let reopened = LocalArtifactStore::open(temp.path()).unwrap();
    assert_eq!(reopened.keys().len(), 8);
    assert!(reopened.verify().unwrap().is_clean());
}

#[test]
fn outcome_check_agrees_with_presence() {
    let temp = TempDir::new().unwrap();
    let store = LocalArtifactStore::open(temp.path()).unwrap();
    let canonical = ArtifactDescriptor::canonical(bundle_b());

    store.check_outcome(&canonical, false).unwrap();
    write(&store, &canonical, b"bytes");
    store.check_outcome(&canonical, true).unwrap();
    assert!(matches!(
        store.check_outcome(&canonical, false),
        Err(DepotError::Inconsistent(_))
    ));
}
