#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use ditstore::{
    AttrValue, Attribute, CoreSchema, DirError, Entry, IndexConfig, ModOp, Store,
    ROOT_PARENT_ID,
};
use tempfile::tempdir;

fn open_store(dir: &Path) -> Store {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let store = Store::new(Arc::new(CoreSchema::new()));
    store
        .set_working_directory(dir.join("partition"))
        .expect("working directory");
    store.set_suffix_dn("ou=system").expect("suffix");
    store.set_name("system").expect("name");
    store
        .add_indexed_attribute(IndexConfig::new("cn"))
        .expect("cn index");
    store
        .add_indexed_attribute(IndexConfig::new("ou"))
        .expect("ou index");
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

fn org_unit(ou: &str) -> Entry {
    let mut entry = Entry::new();
    entry.put(Attribute::new(
        "objectClass",
        vec![AttrValue::from("top"), AttrValue::from("organizationalUnit")],
    ));
    entry.put(Attribute::text("ou", ou));
    entry
}

#[test]
fn add_and_lookup_round_trip() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let entry = person("a", "A");
    let id = store.add("cn=a,ou=system", entry.clone()).expect("add");
    assert_ne!(id, 0);

    let found = store
        .entry_id("cn=a,ou=system")
        .expect("entry_id")
        .expect("id resolved");
    assert_eq!(found, id);
    // Lookups normalize: casing and spacing do not matter.
    assert_eq!(store.entry_id("CN=A, OU=SYSTEM").expect("entry_id"), Some(id));

    let loaded = store.lookup(id).expect("lookup").expect("entry present");
    assert_eq!(loaded, entry);
}

#[test]
fn suffix_is_synthesized_with_root_parent_marker() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let suffix_id = store
        .entry_id("ou=system")
        .expect("entry_id")
        .expect("suffix exists");
    assert_eq!(store.parent_id_of(suffix_id).expect("parent"), Some(ROOT_PARENT_ID));
    assert_eq!(store.suffix().expect("suffix"), "2.5.4.11=system");
    assert_eq!(store.up_suffix().expect("up suffix"), "ou=system");
    assert_eq!(store.entry_count().expect("count"), 1);
}

#[test]
fn hierarchy_lists_children() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();
    let child_id = store.add("cn=a,ou=system", person("a", "A")).expect("add");

    assert_eq!(store.list(suffix_id).expect("list"), vec![child_id]);
    assert_eq!(store.child_count(suffix_id).expect("count"), 1);
    assert_eq!(store.parent_id("cn=a,ou=system").expect("parent"), Some(suffix_id));
    assert_eq!(store.child_count(child_id).expect("count"), 0);
}

#[test]
fn add_without_parent_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let err = store
        .add("cn=a,ou=missing,ou=system", person("a", "A"))
        .expect_err("parent is absent");
    assert!(matches!(err, DirError::NoSuchParent(_)), "got {err:?}");
    assert_eq!(store.entry_count().unwrap(), 1, "store unchanged");
}

#[test]
fn add_without_object_class_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let mut entry = Entry::new();
    entry.put(Attribute::text("cn", "a"));
    let err = store.add("cn=a,ou=system", entry).expect_err("no objectClass");
    assert!(matches!(err, DirError::SchemaViolation(_)), "got {err:?}");
    assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), None);
}

#[test]
fn delete_removes_entry_from_every_index() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    store.delete(id).expect("delete");

    assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), None);
    assert_eq!(store.lookup(id).unwrap(), None);
    assert_eq!(store.entry_dn(id).unwrap(), None);
    assert_eq!(store.entry_updn(id).unwrap(), None);
    assert_eq!(store.parent_id_of(id).unwrap(), None);
    assert!(store.index_snapshot(id).unwrap().is_empty());

    // Ids are never reused.
    let next = store.add("cn=b,ou=system", person("b", "B")).expect("add");
    assert!(next > id);
}

#[test]
fn modify_add_appends_values_and_indexes_them() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    store
        .modify(
            "cn=a,ou=system",
            ModOp::Add,
            &[Attribute::text("cn", "alias-name")],
        )
        .expect("modify add");

    let entry = store.lookup(id).unwrap().unwrap();
    assert_eq!(entry.get("cn").unwrap().values.len(), 2);

    let cn_index = store.user_index("cn").expect("cn index");
    assert_eq!(cn_index.lookup_value("alias-name").unwrap(), Some(id));
    assert_eq!(cn_index.lookup_value("a").unwrap(), Some(id));
}

#[test]
fn modify_remove_of_missing_attribute_silently_proceeds() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    store
        .modify(
            "cn=a,ou=system",
            ModOp::Remove,
            &[Attribute::new("description", vec![])],
        )
        .expect("remove of absent attribute is not an error");
    assert_eq!(store.lookup(id).unwrap().unwrap(), person("a", "A"));
}

#[test]
fn modify_remove_value_and_whole_attribute() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let mut entry = person("a", "A");
    entry.get_mut("cn").unwrap().values.push(AttrValue::from("b"));
    let id = store.add("cn=a,ou=system", entry).expect("add");

    // Remove one listed value.
    store
        .modify("cn=a,ou=system", ModOp::Remove, &[Attribute::text("cn", "b")])
        .expect("remove value");
    let entry = store.lookup(id).unwrap().unwrap();
    assert_eq!(entry.get("cn").unwrap().values, vec![AttrValue::from("a")]);
    let cn_index = store.user_index("cn").expect("cn index");
    assert_eq!(cn_index.lookup_value("b").unwrap(), None);
    assert_eq!(cn_index.lookup_value("a").unwrap(), Some(id));

    // Remove the whole attribute: values empty.
    store
        .modify(
            "cn=a,ou=system",
            ModOp::Remove,
            &[Attribute::new("sn", vec![])],
        )
        .expect("remove attribute");
    assert!(store.lookup(id).unwrap().unwrap().get("sn").is_none());
}

#[test]
fn modify_replace_swaps_index_content() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
    store
        .modify(
            "cn=a,ou=system",
            ModOp::Replace,
            &[Attribute::new(
                "cn",
                vec![AttrValue::from("x"), AttrValue::from("y")],
            )],
        )
        .expect("replace");

    let cn_index = store.user_index("cn").expect("cn index");
    assert_eq!(cn_index.lookup_value("a").unwrap(), None);
    assert_eq!(cn_index.lookup_value("x").unwrap(), Some(id));
    assert_eq!(cn_index.lookup_value("y").unwrap(), Some(id));
    let entry = store.lookup(id).unwrap().unwrap();
    assert_eq!(entry.get("cn").unwrap().values.len(), 2);
}

#[test]
fn entries_survive_destroy_and_reopen() {
    let dir = tempdir().expect("temp dir");
    let id;
    {
        let store = open_store(dir.path());
        id = store.add("cn=a,ou=system", person("a", "A")).expect("add");
        store.add("cn=b,ou=system", person("b", "B")).expect("add");
        store.destroy().expect("destroy");
    }
    {
        let store = open_store(dir.path());
        assert_eq!(store.entry_count().expect("count"), 3);
        assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), Some(id));
        assert_eq!(
            store.lookup(id).unwrap().unwrap().get("sn").unwrap().values,
            vec![AttrValue::from("A")]
        );
        // The id counter picks up where it left off.
        let fresh = store.add("cn=c,ou=system", person("c", "C")).expect("add");
        assert!(fresh > id + 1);
    }
}

#[test]
fn sync_on_write_persists_without_destroy() {
    let dir = tempdir().expect("temp dir");
    {
        let store = Store::new(Arc::new(CoreSchema::new()));
        store.set_working_directory(dir.path().join("p")).unwrap();
        store.set_suffix_dn("ou=system").unwrap();
        store.set_sync_on_write(true).unwrap();
        store.init().expect("init");
        store.add("cn=a,ou=system", person("a", "A")).expect("add");
        // No destroy, no explicit sync: the store is dropped cold.
    }
    {
        let store = Store::new(Arc::new(CoreSchema::new()));
        store.set_working_directory(dir.path().join("p")).unwrap();
        store.set_suffix_dn("ou=system").unwrap();
        store.init().expect("reopen");
        assert!(store.entry_id("cn=a,ou=system").unwrap().is_some());
    }
}

#[test]
fn operations_before_init_fail() {
    let store = Store::new(Arc::new(CoreSchema::new()));
    assert!(matches!(
        store.add("cn=a,ou=system", person("a", "A")),
        Err(DirError::NotInitialized)
    ));
    assert!(matches!(store.entry_id("ou=system"), Err(DirError::NotInitialized)));
    assert!(matches!(store.sync(), Err(DirError::NotInitialized)));
    assert!(matches!(store.destroy(), Err(DirError::NotInitialized)));
}

#[test]
fn configuration_is_frozen_after_init() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    assert!(matches!(
        store.set_suffix_dn("ou=other"),
        Err(DirError::AlreadyInitialized)
    ));
    assert!(matches!(
        store.set_working_directory("/elsewhere"),
        Err(DirError::AlreadyInitialized)
    ));
    assert!(matches!(
        store.set_sync_on_write(true),
        Err(DirError::AlreadyInitialized)
    ));
    assert!(matches!(store.init(), Err(DirError::AlreadyInitialized)));

    // After destroy the configuration opens up again.
    store.destroy().expect("destroy");
    store.set_sync_on_write(true).expect("config mutable again");
}

#[test]
fn context_entry_synthesizes_the_suffix() {
    let dir = tempdir().expect("temp dir");
    let store = Store::new(Arc::new(CoreSchema::new()));
    store.set_working_directory(dir.path().join("p")).unwrap();
    store.set_suffix_dn("ou=system").unwrap();
    let mut context = org_unit("system");
    context.put(Attribute::text("description", "the system partition"));
    store.set_context_entry(context.clone()).unwrap();
    store.init().expect("init");

    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();
    assert_eq!(store.lookup(suffix_id).unwrap().unwrap(), context);
}

#[test]
fn duplicate_add_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("cn=a,ou=system", person("a", "A")).expect("add");
    let err = store
        .add("CN=A,ou=system", person("a", "A"))
        .expect_err("same normalized DN");
    assert!(matches!(err, DirError::InvalidArgument(_)), "got {err:?}");
}
