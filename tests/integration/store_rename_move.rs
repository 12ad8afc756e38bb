#![allow(missing_docs)]

use std::path::Path;
use std::sync::Arc;

use ditstore::{
    AttrValue, Attribute, CoreSchema, DirError, Entry, IndexConfig, Store, SystemIndexHandle,
};
use tempfile::tempdir;

fn open_store(dir: &Path) -> Store {
    let store = Store::new(Arc::new(CoreSchema::new()));
    store.set_working_directory(dir.join("partition")).unwrap();
    store.set_suffix_dn("ou=system").unwrap();
    store.add_indexed_attribute(IndexConfig::new("cn")).unwrap();
    store.add_indexed_attribute(IndexConfig::new("ou")).unwrap();
    store.init().expect("init");
    store
}

fn person(cn: &str) -> Entry {
    let mut entry = Entry::new();
    entry.put(Attribute::new(
        "objectClass",
        vec![AttrValue::from("top"), AttrValue::from("person")],
    ));
    entry.put(Attribute::text("cn", cn));
    entry.put(Attribute::text("sn", cn.to_uppercase()));
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

fn alias(cn: &str, target: &str) -> Entry {
    let mut entry = Entry::new();
    entry.put(Attribute::new(
        "objectClass",
        vec![AttrValue::from("top"), AttrValue::from("alias")],
    ));
    entry.put(Attribute::text("cn", cn));
    entry.put(Attribute::text("aliasedObjectName", target));
    entry
}

#[test]
fn rename_rewrites_descendants_recursively() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let parent_id = store.add("ou=a,ou=system", org_unit("a")).expect("add ou");
    let child_id = store
        .add("cn=x,ou=a,ou=system", person("x"))
        .expect("add child");

    store
        .rename("ou=a,ou=system", "ou=b", true)
        .expect("rename");

    assert_eq!(
        store.entry_dn(child_id).unwrap(),
        Some("2.5.4.3=x,2.5.4.11=b,2.5.4.11=system".to_string())
    );
    assert_eq!(store.entry_id("cn=x,ou=a,ou=system").unwrap(), None);
    assert_eq!(store.entry_id("cn=x,ou=b,ou=system").unwrap(), Some(child_id));
    assert_eq!(store.entry_id("ou=b,ou=system").unwrap(), Some(parent_id));
    assert_eq!(store.entry_updn(parent_id).unwrap(), Some("ou=b,ou=system".to_string()));

    // deleteOldRdn retired the old value from the entry and the ou index.
    let entry = store.lookup(parent_id).unwrap().unwrap();
    assert_eq!(entry.get("ou").unwrap().values, vec![AttrValue::from("b")]);
    let ou_index = store.user_index("ou").expect("ou index");
    assert_eq!(ou_index.lookup_value("a").unwrap(), None);
    assert_eq!(ou_index.lookup_value("b").unwrap(), Some(parent_id));
}

#[test]
fn rename_keeping_old_rdn_value() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a")).expect("add");
    store
        .rename("cn=a,ou=system", "cn=b", false)
        .expect("rename");

    let entry = store.lookup(id).unwrap().unwrap();
    assert_eq!(
        entry.get("cn").unwrap().values,
        vec![AttrValue::from("a"), AttrValue::from("b")]
    );
    let cn_index = store.user_index("cn").expect("cn index");
    assert_eq!(cn_index.lookup_value("a").unwrap(), Some(id));
    assert_eq!(cn_index.lookup_value("b").unwrap(), Some(id));
    assert_eq!(store.entry_id("cn=b,ou=system").unwrap(), Some(id));
    assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), None);
}

#[test]
fn rename_to_own_rdn_is_a_no_op() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a")).expect("add");
    let entry_before = store.lookup(id).unwrap().unwrap();
    let snapshot_before = store.index_snapshot(id).unwrap();
    let updn_before = store.entry_updn(id).unwrap();

    store
        .rename("cn=a,ou=system", "cn=a", true)
        .expect("rename to self");

    assert_eq!(store.lookup(id).unwrap().unwrap(), entry_before);
    assert_eq!(store.index_snapshot(id).unwrap(), snapshot_before);
    assert_eq!(store.entry_updn(id).unwrap(), updn_before);
    assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), Some(id));
}

#[test]
fn renaming_the_suffix_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let err = store
        .rename("ou=system", "ou=other", true)
        .expect_err("suffix rename");
    assert!(matches!(err, DirError::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn move_preserves_the_subtree() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let src_id = store.add("ou=src,ou=system", org_unit("src")).expect("src");
    let one_id = store
        .add("cn=1,ou=src,ou=system", person("1"))
        .expect("child 1");
    store
        .add("ou=sub,ou=src,ou=system", org_unit("sub"))
        .expect("sub");
    let three_id = store
        .add("cn=3,ou=sub,ou=src,ou=system", person("3"))
        .expect("child 3");
    let dst_id = store.add("ou=dst,ou=system", org_unit("dst")).expect("dst");
    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();

    store
        .move_entry("ou=src,ou=system", "ou=dst,ou=system")
        .expect("move");

    // Same ids, prefix-rewritten DNs.
    assert_eq!(
        store.entry_id("ou=src,ou=dst,ou=system").unwrap(),
        Some(src_id)
    );
    assert_eq!(
        store.entry_id("cn=1,ou=src,ou=dst,ou=system").unwrap(),
        Some(one_id)
    );
    assert_eq!(
        store
            .entry_id("cn=3,ou=sub,ou=src,ou=dst,ou=system")
            .unwrap(),
        Some(three_id)
    );
    assert_eq!(store.entry_id("ou=src,ou=system").unwrap(), None);
    assert_eq!(store.entry_id("cn=1,ou=src,ou=system").unwrap(), None);

    // Hierarchy rewired.
    assert_eq!(store.parent_id_of(src_id).unwrap(), Some(dst_id));
    assert_eq!(store.list(dst_id).unwrap(), vec![src_id]);
    assert!(!store.list(suffix_id).unwrap().contains(&src_id));
    assert_eq!(store.child_count(src_id).unwrap(), 2);
}

#[test]
fn move_below_own_subtree_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=src,ou=system", org_unit("src")).expect("src");
    store
        .add("ou=sub,ou=src,ou=system", org_unit("sub"))
        .expect("sub");

    let err = store
        .move_entry("ou=src,ou=system", "ou=sub,ou=src,ou=system")
        .expect_err("cycle move");
    assert!(matches!(err, DirError::InvalidArgument(_)), "got {err:?}");
}

#[test]
fn moving_an_alias_target_reindexes_the_alias() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=t,ou=system", org_unit("t")).expect("ou=t");
    let target_id = store
        .add("cn=u,ou=t,ou=system", person("u"))
        .expect("target");
    let alias_id = store
        .add("cn=al,ou=system", alias("al", "cn=u,ou=t,ou=system"))
        .expect("alias");
    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();

    store
        .move_entry("cn=u,ou=t,ou=system", "ou=system")
        .expect("move target");

    let alias_index = match store.system_index("alias").unwrap() {
        SystemIndexHandle::Text(index) => index,
        SystemIndexHandle::Id(_) => panic!("alias is text-keyed"),
    };
    let one_alias = match store.system_index("oneAlias").unwrap() {
        SystemIndexHandle::Id(index) => index,
        SystemIndexHandle::Text(_) => panic!("oneAlias is id-keyed"),
    };

    // The alias record now names the target's post-move DN, and the target
    // still resolves through it.
    let stored_target = alias_index
        .reverse_lookup(alias_id)
        .unwrap()
        .expect("alias still indexed");
    assert_eq!(stored_target, "2.5.4.3=u,2.5.4.11=system");
    assert_eq!(store.entry_id(&stored_target).unwrap(), Some(target_id));

    // Alias and target are siblings now, so the one-level tuple is gone.
    assert!(!one_alias.has_value(&suffix_id, target_id).unwrap());
    assert_eq!(one_alias.count(), 0);
}

#[test]
fn moving_an_alias_rebuilds_its_scope_tuples() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=p,ou=system", org_unit("p")).expect("ou=p");
    store.add("ou=t,ou=system", org_unit("t")).expect("ou=t");
    let target_id = store
        .add("cn=u,ou=t,ou=system", person("u"))
        .expect("target");
    let alias_id = store
        .add("cn=al,ou=system", alias("al", "cn=u,ou=t,ou=system"))
        .expect("alias");
    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();
    let p_id = store.entry_id("ou=p,ou=system").unwrap().unwrap();

    store
        .move_entry("cn=al,ou=system", "ou=p,ou=system")
        .expect("move alias");

    let one_alias = match store.system_index("oneAlias").unwrap() {
        SystemIndexHandle::Id(index) => index,
        SystemIndexHandle::Text(_) => panic!("oneAlias is id-keyed"),
    };
    let sub_alias = match store.system_index("subAlias").unwrap() {
        SystemIndexHandle::Id(index) => index,
        SystemIndexHandle::Text(_) => panic!("subAlias is id-keyed"),
    };

    // Old parent tuple dropped, new parent tuple added.
    assert!(!one_alias.has_value(&suffix_id, target_id).unwrap());
    assert!(one_alias.has_value(&p_id, target_id).unwrap());
    // The alias now sits a level deeper: ou=p does not contain the target,
    // so it carries a subtree tuple; the suffix still does not.
    assert!(sub_alias.has_value(&p_id, target_id).unwrap());
    assert!(!sub_alias.has_value(&suffix_id, target_id).unwrap());

    assert_eq!(
        store.entry_id("cn=al,ou=p,ou=system").unwrap(),
        Some(alias_id)
    );
}

#[test]
fn move_with_new_rdn_renames_first() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store.add("cn=a,ou=system", person("a")).expect("add");
    let dst_id = store.add("ou=dst,ou=system", org_unit("dst")).expect("dst");

    store
        .move_and_rename("cn=a,ou=system", "ou=dst,ou=system", "cn=b", true)
        .expect("move and rename");

    assert_eq!(store.entry_id("cn=b,ou=dst,ou=system").unwrap(), Some(id));
    assert_eq!(store.entry_id("cn=a,ou=system").unwrap(), None);
    assert_eq!(store.parent_id_of(id).unwrap(), Some(dst_id));
    let entry = store.lookup(id).unwrap().unwrap();
    assert_eq!(entry.get("cn").unwrap().values, vec![AttrValue::from("b")]);
}

#[test]
fn updn_preserves_caller_casing() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let id = store
        .add("cn=Alice Smith, ou=system", person("Alice Smith"))
        .expect("add");
    assert_eq!(
        store.entry_updn(id).unwrap(),
        Some("cn=Alice Smith,ou=system".to_string())
    );
    assert_eq!(
        store.entry_dn(id).unwrap(),
        Some("2.5.4.3=alice smith,2.5.4.11=system".to_string())
    );
}
