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

fn one_alias_index(store: &Store) -> Arc<ditstore::Index<u64>> {
    match store.system_index("oneAlias").expect("oneAlias") {
        SystemIndexHandle::Id(index) => index,
        SystemIndexHandle::Text(_) => panic!("oneAlias is id-keyed"),
    }
}

fn sub_alias_index(store: &Store) -> Arc<ditstore::Index<u64>> {
    match store.system_index("subAlias").expect("subAlias") {
        SystemIndexHandle::Id(index) => index,
        SystemIndexHandle::Text(_) => panic!("subAlias is id-keyed"),
    }
}

fn alias_index(store: &Store) -> Arc<ditstore::Index<String>> {
    match store.system_index("alias").expect("alias") {
        SystemIndexHandle::Text(index) => index,
        SystemIndexHandle::Id(_) => panic!("alias is text-keyed"),
    }
}

#[test]
fn alias_to_itself_is_rejected_without_side_effects() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let err = store
        .add("cn=x,ou=system", alias("x", "cn=x,ou=system"))
        .expect_err("self alias");
    assert!(matches!(err, DirError::AliasToSelf(_)), "got {err:?}");

    assert_eq!(store.entry_id("cn=x,ou=system").unwrap(), None);
    assert_eq!(store.entry_count().unwrap(), 1, "only the suffix exists");
    assert_eq!(alias_index(&store).count(), 0);
    assert_eq!(one_alias_index(&store).count(), 0);
    assert_eq!(sub_alias_index(&store).count(), 0);
}

#[test]
fn alias_chain_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("cn=a,ou=system", person("a")).expect("add target");
    store
        .add("cn=b,ou=system", alias("b", "cn=a,ou=system"))
        .expect("first alias");
    let err = store
        .add("cn=c,ou=system", alias("c", "cn=b,ou=system"))
        .expect_err("alias to an alias");
    assert!(matches!(err, DirError::AliasChain(_)), "got {err:?}");
    assert_eq!(store.entry_id("cn=c,ou=system").unwrap(), None);
}

#[test]
fn alias_below_its_own_target_is_a_cycle() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=t,ou=system", org_unit("t")).expect("add ou");
    let err = store
        .add("cn=x,ou=t,ou=system", alias("x", "ou=t,ou=system"))
        .expect_err("alias under its target");
    assert!(matches!(err, DirError::AliasCycle { .. }), "got {err:?}");
}

#[test]
fn alias_outside_the_suffix_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let err = store
        .add("cn=x,ou=system", alias("x", "dc=example"))
        .expect_err("external target");
    assert!(matches!(err, DirError::AliasExternal { .. }), "got {err:?}");
}

#[test]
fn alias_to_missing_target_is_rejected() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    let err = store
        .add("cn=x,ou=system", alias("x", "cn=ghost,ou=system"))
        .expect_err("missing target");
    assert!(matches!(err, DirError::AliasTargetMissing(_)), "got {err:?}");
}

#[test]
fn alias_scope_tuples_for_shallow_alias() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=t,ou=system", org_unit("t")).expect("add ou");
    let target_id = store
        .add("cn=u,ou=t,ou=system", person("u"))
        .expect("add target");
    let alias_id = store
        .add("cn=al,ou=system", alias("al", "cn=u,ou=t,ou=system"))
        .expect("add alias");
    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();

    // The alias record carries the normalized target DN.
    assert_eq!(
        alias_index(&store).reverse_lookup(alias_id).unwrap(),
        Some("2.5.4.3=u,2.5.4.11=t,2.5.4.11=system".to_string())
    );

    // Target is not a sibling of the alias, so the parent gets a one-level
    // scope tuple.
    assert!(one_alias_index(&store)
        .has_value(&suffix_id, target_id)
        .unwrap());

    // The ancestor walk stops below the suffix, and every legal target is a
    // descendant of the suffix, so no subtree tuple exists for this shape.
    assert_eq!(sub_alias_index(&store).count(), 0);
}

#[test]
fn alias_scope_tuples_for_deep_alias() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=p,ou=system", org_unit("p")).expect("add ou");
    let target_id = store.add("cn=a,ou=system", person("a")).expect("add target");
    let alias_id = store
        .add("cn=al,ou=p,ou=system", alias("al", "cn=a,ou=system"))
        .expect("add alias");
    let p_id = store.entry_id("ou=p,ou=system").unwrap().unwrap();
    let suffix_id = store.entry_id("ou=system").unwrap().unwrap();

    // The target is not a descendant of ou=p, so ou=p carries a subtree
    // tuple; the suffix never does.
    let sub = sub_alias_index(&store);
    assert!(sub.has_value(&p_id, target_id).unwrap());
    assert!(!sub.has_value(&suffix_id, target_id).unwrap());
    assert_eq!(sub.count(), 1);

    // One-level tuple for the alias's own parent.
    assert!(one_alias_index(&store).has_value(&p_id, target_id).unwrap());

    let _ = alias_id;
}

#[test]
fn deleting_an_alias_clears_every_tuple() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=p,ou=system", org_unit("p")).expect("add ou");
    store.add("cn=a,ou=system", person("a")).expect("add target");
    let alias_id = store
        .add("cn=al,ou=p,ou=system", alias("al", "cn=a,ou=system"))
        .expect("add alias");

    store.delete(alias_id).expect("delete alias");

    assert_eq!(alias_index(&store).count(), 0);
    assert_eq!(one_alias_index(&store).count(), 0);
    assert_eq!(sub_alias_index(&store).count(), 0);
    assert_eq!(store.entry_id("cn=al,ou=p,ou=system").unwrap(), None);
}

#[test]
fn removing_aliased_object_name_drops_alias_state() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=p,ou=system", org_unit("p")).expect("add ou");
    store.add("cn=a,ou=system", person("a")).expect("add target");
    let alias_id = store
        .add("cn=al,ou=p,ou=system", alias("al", "cn=a,ou=system"))
        .expect("add alias");

    store
        .modify(
            "cn=al,ou=p,ou=system",
            ditstore::ModOp::Remove,
            &[Attribute::new("aliasedObjectName", vec![])],
        )
        .expect("strip alias target");

    assert_eq!(alias_index(&store).reverse_lookup(alias_id).unwrap(), None);
    assert_eq!(one_alias_index(&store).count(), 0);
    assert_eq!(sub_alias_index(&store).count(), 0);
}

#[test]
fn replacing_aliased_object_name_reindexes() {
    let dir = tempdir().expect("temp dir");
    let store = open_store(dir.path());

    store.add("ou=p,ou=system", org_unit("p")).expect("add ou");
    store.add("cn=a,ou=system", person("a")).expect("target a");
    store.add("cn=b,ou=system", person("b")).expect("target b");
    let alias_id = store
        .add("cn=al,ou=p,ou=system", alias("al", "cn=a,ou=system"))
        .expect("add alias");

    store
        .modify(
            "cn=al,ou=p,ou=system",
            ditstore::ModOp::Replace,
            &[Attribute::text("aliasedObjectName", "cn=b,ou=system")],
        )
        .expect("retarget alias");

    assert_eq!(
        alias_index(&store).reverse_lookup(alias_id).unwrap(),
        Some("2.5.4.3=b,2.5.4.11=system".to_string())
    );
    let b_id = store.entry_id("cn=b,ou=system").unwrap().unwrap();
    let a_id = store.entry_id("cn=a,ou=system").unwrap().unwrap();
    let p_id = store.entry_id("ou=p,ou=system").unwrap().unwrap();
    let one = one_alias_index(&store);
    assert!(one.has_value(&p_id, b_id).unwrap());
    assert!(!one.has_value(&p_id, a_id).unwrap());
}
