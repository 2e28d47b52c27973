use std::path::PathBuf;

use anoncast_keystore::{
    BundleManifest, ChannelId, KeyStore, KeyStoreError, StreamKind, BUNDLE_MANIFEST,
};

fn unique_temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "anoncast-ks-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ))
}

#[test]
fn load_creates_missing_root() {
    let root = unique_temp_dir("create").join("keystore");
    let store = KeyStore::load(&root, 64).expect("store should load");
    assert!(store.is_empty());
    assert!(root.is_dir());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&root).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    let _ = std::fs::remove_dir_all(root.parent().unwrap());
}

#[test]
fn cursors_survive_reload() {
    let root = unique_temp_dir("reload");
    let id = ChannelId::new_random();
    {
        let store = KeyStore::load(&root, 1000).unwrap();
        let pack = store.add_key_pack(id).unwrap();
        assert_eq!(pack.payload_out().allocate(300).unwrap(), 0);
        assert_eq!(pack.id_out().allocate(17).unwrap(), 0);
        store.close();
    }

    let store = KeyStore::load(&root, 1000).unwrap();
    let pack = store.get_key_pack(id).expect("pack should be reloaded");
    assert_eq!(pack.payload_out().len(), 1000);
    assert_eq!(pack.payload_out().position(), 300);
    assert_eq!(pack.id_out().position(), 17);
    assert_eq!(pack.payload_out().allocate(1).unwrap(), 300);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn broken_entries_are_skipped() {
    let root = unique_temp_dir("broken");
    let good = ChannelId::new_random();
    {
        let store = KeyStore::load(&root, 32).unwrap();
        store.add_key_pack(good).unwrap();
    }
    let broken = ChannelId::new_random();
    std::fs::create_dir_all(root.join(broken.to_string())).unwrap();
    std::fs::create_dir_all(root.join("not-a-channel")).unwrap();

    let store = KeyStore::load(&root, 32).expect("broken entries must not be fatal");
    assert_eq!(store.channel_ids(), vec![good]);

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn add_refuses_to_overwrite_unregistered_material() {
    let root = unique_temp_dir("overwrite");
    let id = ChannelId::new_random();
    let store = KeyStore::load(&root, 32).unwrap();
    std::fs::create_dir_all(root.join(id.to_string())).unwrap();

    assert!(matches!(
        store.add_key_pack(id),
        Err(KeyStoreError::AlreadyExists(dup)) if dup == id
    ));

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn export_then_import_mirrors_material() {
    let base = unique_temp_dir("exchange");
    let alice = KeyStore::load(base.join("alice"), 512).unwrap();
    let bob = KeyStore::load(base.join("bob"), 512).unwrap();
    let bundle = base.join("bundle");

    let id = ChannelId::new_random();
    let pack = alice.add_key_pack(id).unwrap();
    alice.export_key_pack(id, &bundle).unwrap();
    assert_eq!(BundleManifest::read(&bundle).unwrap().channel, id);
    assert!(bundle.join(BUNDLE_MANIFEST).is_file());

    let imported = bob.import_key_pack(&bundle).unwrap();
    assert_eq!(imported.id(), id);
    for kind in StreamKind::ALL {
        assert_eq!(
            pack.stream(kind).read_at(0, 512).unwrap(),
            imported.stream(kind.mirror()).read_at(0, 512).unwrap(),
        );
    }
    assert_eq!(imported.payload_out().position(), 0);

    let err = bob.import_key_pack(&bundle).unwrap_err();
    assert!(matches!(err, KeyStoreError::AlreadyExists(dup) if dup == id));
    assert_eq!(bob.len(), 1);

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn import_into_memory_store() {
    let base = unique_temp_dir("mem-import");
    let alice = KeyStore::load(base.join("alice"), 64).unwrap();
    let id = ChannelId::new_random();
    alice.add_key_pack(id).unwrap();
    alice.export_key_pack(id, base.join("bundle")).unwrap();

    let bob = KeyStore::in_memory(0);
    let pack = bob.import_key_pack(base.join("bundle")).unwrap();
    assert!(pack.dir().is_none());
    assert_eq!(pack.id_in().len(), 64);

    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn import_rejects_incomplete_bundle() {
    let base = unique_temp_dir("bad-bundle");
    std::fs::create_dir_all(&base).unwrap();
    let store = KeyStore::in_memory(0);
    let err = store.import_key_pack(&base).unwrap_err();
    assert!(matches!(err, KeyStoreError::InvalidBundle { .. }));
    assert!(store.is_empty());
    let _ = std::fs::remove_dir_all(&base);
}

#[test]
fn delete_erases_directory() {
    let root = unique_temp_dir("delete");
    let store = KeyStore::load(&root, 16).unwrap();
    let id = ChannelId::new_random();
    store.add_key_pack(id).unwrap();
    assert!(root.join(id.to_string()).is_dir());

    assert!(store.delete_key_pack(id).unwrap());
    assert!(!store.delete_key_pack(id).unwrap());
    assert!(!root.join(id.to_string()).exists());

    let _ = std::fs::remove_dir_all(&root);
}

#[test]
fn second_open_of_root_is_refused() {
    let root = unique_temp_dir("locked");
    let id = ChannelId::new_random();
    let first = KeyStore::load(&root, 64).unwrap();
    first.add_key_pack(id).unwrap();

    let err = KeyStore::load(&root, 64).unwrap_err();
    assert!(matches!(err, KeyStoreError::Locked { ref path } if *path == root));

    // Only one holder ever reserves from the persisted cursor.
    let pack = first.get_key_pack(id).unwrap();
    assert_eq!(pack.payload_out().allocate(10).unwrap(), 0);
    first.close();

    let second = KeyStore::load(&root, 64).expect("closing releases the root");
    let pack = second.get_key_pack(id).expect("pack should reload");
    assert_eq!(pack.payload_out().allocate(10).unwrap(), 10);

    drop(second);
    assert!(KeyStore::load(&root, 64).is_ok(), "dropping releases the root");
    let _ = std::fs::remove_dir_all(&root);
}
