#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use ditstore::{
    AttrValue, Attribute, CoreSchema, DirError, Entry, IndexConfig, ModOp, Store,
    SystemIndexHandle,
};
use tempfile::tempdir;

fn open_store(dir: &Path) -> Store {
    let store = Store::new(Arc::new(CoreSchema::new()));
    store.set_working_directory(dir.join("partition")).unwrap();
    store.set_suffix_dn("ou=system").unwrap();
    store.add_indexed_attribute(IndexConfig::new("cn")).unwrap();
    store
        .add_indexed_attribute(IndexConfig::new("sn").with_duplicate_limit(2))
        .unwrap();
    store.init().expect("init");
    store
}

fn person(cn: &str, sn: &str) -> Entry {
    let mut entry = Entry::new();
    entry.put(Attribute::new(
        "objectClass",
        vec![AttrValue::from("top"), AttrValue::from("person")],
    ));
    entry.put(Attribute::text("cn", cn));
    entry.put(Attribute::text("sn", sn));
    entry
}

#[test]
fn index_registry_answers_by_name_and_oid() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    assert!(store.has_user_index_on("cn").unwrap());
    assert!(store.has_user_index_on("commonName").unwrap());
    assert!(store.has_user_index_on("2.5.4.3").unwrap());
    assert!(!store.has_user_index_on("ou").unwrap());
    assert!(!store.has_user_index_on("noSuchAttribute").unwrap());

    assert!(store.has_system_index_on("ndn").unwrap());
    assert!(store.has_system_index_on("oneAlias").unwrap());
    assert!(!store.has_system_index_on("cn").unwrap());

    assert!(matches!(
        store.user_index("ou"),
        Err(DirError::IndexNotFound(_))
    ));
    assert!(matches!(
        store.system_index("bogus"),
        Err(DirError::IndexNotFound(_))
    ));

    assert_eq!(store.user_indices().unwrap().len(), 2);
    assert_eq!(store.system_indices().unwrap().len(), 7);
}

#[test]
fn user_index_groups_ids_under_shared_values() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let mut ids = Vec::new();
    for i in 0..5 {
        ids.push(
            store
                .add(&format!("cn=user{i},ou=system"), person(&format!("user{i}"), "Shared"))
                .expect("add"),
        );
    }

    // Five entries share sn=Shared; the duplicate limit for sn is 2, so the
    // id set has crossed into the spilled representation and must still
    // answer correctly.
    let sn_index = store.user_index("sn").expect("sn index");
    let norm = sn_index.norm_key("SHARED");
    assert_eq!(sn_index.list(&norm).unwrap(), ids);
    assert_eq!(sn_index.count_key(&norm).unwrap(), 5);
    assert_eq!(sn_index.forward_lookup(&norm).unwrap(), Some(ids[0]));

    store.delete(ids[2]).expect("delete");
    let mut expected = ids.clone();
    expected.remove(2);
    assert_eq!(sn_index.list(&norm).unwrap(), expected);
}

#[test]
fn forward_and_reverse_stay_in_correspondence() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    for i in 0..10 {
        store
            .add(
                &format!("cn=user{i},ou=system"),
                person(&format!("user{i}"), &format!("sn{}", i % 3)),
            )
            .expect("add");
    }
    store
        .modify(
            "cn=user3,ou=system",
            ModOp::Replace,
            &[Attribute::text("sn", "replaced")],
        )
        .expect("replace");
    let user7 = store.entry_id("cn=user7,ou=system").unwrap().unwrap();
    store.delete(user7).expect("delete");

    for index in store.user_indices().unwrap() {
        // Forward walk: every (key, id) pair must appear in reverse.
        let mut cursor = index.cursor().expect("cursor");
        let mut pairs = 0u64;
        while let Some((key, id)) = cursor.next().expect("next") {
            pairs += 1;
            assert!(
                index.reverse_values(id).expect("reverse").contains(&key),
                "pair ({key}, {id}) missing from reverse table of {}",
                index.name()
            );
        }
        assert_eq!(pairs, index.count(), "pair count drift in {}", index.name());
    }
}

#[test]
fn presence_tracks_indexed_attributes_exactly() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    let presence = match store.system_index("presence").unwrap() {
        SystemIndexHandle::Text(index) => index,
        SystemIndexHandle::Id(_) => panic!("presence is text-keyed"),
    };

    let cn_oid = "2.5.4.3".to_string();
    let sn_oid = "2.5.4.4".to_string();
    assert!(presence.has_value(&cn_oid, id).unwrap());
    assert!(presence.has_value(&sn_oid, id).unwrap());

    // Dropping the last sn value retires the presence tuple.
    store
        .modify("cn=a,ou=system", ModOp::Remove, &[Attribute::new("sn", vec![])])
        .expect("remove sn");
    assert!(!presence.has_value(&sn_oid, id).unwrap());
    assert!(presence.has_value(&cn_oid, id).unwrap());

    // Adding it back restores the tuple.
    store
        .modify("cn=a,ou=system", ModOp::Add, &[Attribute::text("sn", "again")])
        .expect("add sn");
    assert!(presence.has_value(&sn_oid, id).unwrap());
}

#[test]
fn index_snapshot_shows_every_touchpoint() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();
    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");

    let snapshot = store.index_snapshot(id).unwrap();
    let find = |name: &str| {
        snapshot
            .iter()
            .find(|s| s.index == name)
            .unwrap_or_else(|| panic!("no {name} snapshot entry"))
    };

    assert_eq!(find("ndn").keys, vec!["2.5.4.3=a,2.5.4.11=system"]);
    assert_eq!(find("updn").keys, vec!["cn=a,ou=system"]);
    assert_eq!(find("hierarchy").keys, vec![suffix_id.to_string()]);
    assert_eq!(find("2.5.4.3").keys, vec!["a"]);
    assert!(find("presence").keys.contains(&"2.5.4.3".to_string()));

    // The suffix lists its child on the forward side of the hierarchy.
    let suffix_snapshot = store.index_snapshot(suffix_id).unwrap();
    let children = suffix_snapshot
        .iter()
        .find(|s| s.index == "hierarchy.children")
        .expect("children entry");
    assert!(children.keys.contains(&id.to_string()));
}

#[test]
fn normalized_keys_serve_mixed_case_lookups() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store
        .add("cn=Big Box,ou=system", person("Big   Box", "B"))
        .expect("add");
    let cn_index = store.user_index("cn").expect("cn index");

    assert_eq!(cn_index.lookup_value("big box").unwrap(), Some(id));
    assert_eq!(cn_index.lookup_value("BIG    BOX").unwrap(), Some(id));
    assert!(cn_index.has_raw("Big Box", id).unwrap());
    assert_eq!(cn_index.lookup_value("big boxes").unwrap(), None);
}

#[test]
fn tainted_store_fails_mutations_until_reinit() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    // Reach into the working directory and corrupt the cn index file
    // behind the store's back, then force the store to read it.
    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    store.sync().expect("sync");
    let _ = id;

    let cn_file = dir.path().join("partition").join("2.5.4.3.db");
    {
        use std::io::{Seek, SeekFrom, Write};
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .open(&cn_file)
            .expect("open index file");
        file.seek(SeekFrom::Start(8192 + 64)).expect("seek");
        file.write_all(&[0xFF; 16]).expect("scribble");
    }

    // A fresh store over the damaged directory hits the corruption during a
    // mutation, taints itself, and refuses further writes.
    store.destroy().expect("destroy");
    let store = Store::new(Arc::new(CoreSchema::new()));
    store.set_working_directory(dir.path().join("partition")).unwrap();
    store.set_suffix_dn("ou=system").unwrap();
    store.add_indexed_attribute(IndexConfig::new("cn")).unwrap();
    match store.init() {
        // Depending on which page the scribble landed in, the damage can
        // surface at open or at first use; both are acceptable as long as
        // a tainted store stays closed for writes.
        Err(_) => {}
        Ok(()) => {
            let first = store.add("cn=b,ou=system", person("b", "B"));
            if first.is_err() {
                let err = store
                    .add("cn=c,ou=system", person("c", "C"))
                    .expect_err("tainted store must refuse mutations");
                assert!(
                    matches!(err, DirError::IndexInconsistent(_)),
                    "got {err:?}"
                );
            }
        }
    }
}
