//! Tests for the versioned multi-key session store.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use scriptlet::{ClearEvent, ClearKind, DynamicStore, Key, StoreError, Transform, Value};

fn keys(names: &[&str]) -> Vec<Key> {
    names.iter().map(|&name| Key::from(name)).collect()
}

// ============================================================================
// Single-key access
// ============================================================================

#[test]
fn absent_key_reads_null() {
    let store = DynamicStore::new();
    assert_eq!(store.get("missing"), Value::Null);
    assert!(store.is_empty(), "reading must not create entries");
}

#[test]
fn null_key_is_a_regular_key() {
    let store = DynamicStore::new();
    store.set(Key::Null, 1);
    assert_eq!(store.get(Key::Null), Value::Int(1));
    assert!(store.contains(&Key::Null));
}

#[test]
fn every_write_bumps_the_version() {
    let store = DynamicStore::new();
    assert_eq!(store.version(), 0);
    store.set("a", 1);
    store.set("b", 2);
    store.set("a", 3);
    assert_eq!(store.version(), 3);
    assert_eq!(store.version_of(&Key::from("a")), Some(3));
    assert_eq!(store.version_of(&Key::from("b")), Some(2));
    assert_eq!(store.len(), 2);
}

#[test]
fn entries_bypass_read_interceptors() {
    let store = DynamicStore::new();
    store.set("b", 2);
    store.set("a", 1);
    store.on_get(|_, _| Value::Null);
    assert_eq!(
        store.entries(),
        vec![(Key::from("b"), Value::Int(2)), (Key::from("a"), Value::Int(1))]
    );
}

#[test]
fn hashable_values_convert_to_keys() {
    assert_eq!(
        Key::try_from(Value::Tuple(vec![Value::Int(1), Value::from("a")])),
        Ok(Key::Tuple(vec![Key::Int(1), Key::from("a")]))
    );
    assert_eq!(Key::try_from(Value::Null), Ok(Key::Null));
    assert_eq!(
        Key::try_from(Value::List(vec![Value::Int(1)])),
        Err(StoreError::UnhashableKey("List".to_owned()))
    );
    assert_eq!(
        Key::try_from(Value::Tuple(vec![Value::Float(0.5)])),
        Err(StoreError::UnhashableKey("double".to_owned())),
        "tuple keys need hashable elements"
    );
}

// ============================================================================
// Multi-key access
// ============================================================================

#[test]
fn composite_value_is_distributed_positionally() {
    let store = DynamicStore::new();
    store
        .set_many(&keys(&["x", "y"]), Value::Tuple(vec![Value::Int(1), Value::Int(2)]))
        .expect("matching arity");
    assert_eq!(store.get("x"), Value::Int(1));
    assert_eq!(store.get("y"), Value::Int(2));
}

#[test]
fn scalar_value_is_broadcast_to_every_key() {
    let store = DynamicStore::new();
    store.set_many(&keys(&["x", "y", "z"]), "same").expect("broadcast");
    for name in ["x", "y", "z"] {
        assert_eq!(store.get(name), Value::from("same"), "key {name}");
    }
}

#[test]
fn arity_mismatch_writes_nothing() {
    let store = DynamicStore::new();
    store.set("x", 0);
    let err = store
        .set_many(&keys(&["x", "y"]), Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
        .expect_err("three values for two keys");
    assert_eq!(err, StoreError::ArityMismatch { values: 3, keys: 2 });
    assert_eq!(store.get("x"), Value::Int(0), "existing entry must be untouched");
    assert!(!store.contains(&Key::from("y")));
    assert_eq!(store.version(), 1);
}

#[test]
fn multi_key_read_builds_an_ordered_map() {
    let store = DynamicStore::new();
    store.set("b", 2);
    store.set("a", 1);
    let Value::Map(map) = store.get_many(&keys(&["a", "b", "c"])) else {
        panic!("expected a map");
    };
    let pairs: Vec<(Key, Value)> = map.into_iter().collect();
    assert_eq!(
        pairs,
        vec![
            (Key::from("a"), Value::Int(1)),
            (Key::from("b"), Value::Int(2)),
            (Key::from("c"), Value::Null),
        ]
    );
}

#[test]
fn plain_multi_key_read_stays_a_map() {
    let store = DynamicStore::new();
    store.set("a", 1);
    let single = Value::Map(std::iter::once((Key::from("a"), Value::Int(1))).collect());
    assert_eq!(store.get_many(&keys(&["a"])), single);
    assert_eq!(store.get_many(&keys(&["a", "a"])), single, "repeated keys collapse into one entry");
}

#[test]
fn single_entry_transform_result_is_unwrapped() {
    let store = DynamicStore::new();
    store.set("a", 1);
    let as_map = Transform::new("map", Value::Map);
    assert_eq!(store.get_many_as(&as_map, &keys(&["a"])), Value::Int(1));
}

#[test]
fn transforms_reshape_multi_key_reads() {
    let store = DynamicStore::new();
    store.set_many(&keys(&["a", "b"]), Value::Array(vec![Value::Int(1), Value::Int(2)])).expect("arity");
    let wanted = keys(&["a", "b"]);
    assert_eq!(
        store.get_many_as(&Transform::values_array(), &wanted),
        Value::Array(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(
        store.get_many_as(&Transform::values_tuple(), &wanted),
        Value::Tuple(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(Transform::values_array().name(), "varr");
}

// ============================================================================
// Interceptors
// ============================================================================

#[test]
fn interceptors_chain_in_registration_order() {
    let store = DynamicStore::new();
    store.on_set(|_, value| match value {
        Value::Int(i) => Value::Int(i + 1),
        other => other,
    });
    store.on_set(|_, value| match value {
        Value::Int(i) => Value::Int(i * 10),
        other => other,
    });
    store.set("n", 1);
    assert_eq!(store.get("n"), Value::Int(20));
}

#[test]
fn get_interceptor_sees_the_key() {
    let store = DynamicStore::new();
    store.on_get(|key, value| if *key == Key::from("secret") { Value::from("***") } else { value });
    store.set("secret", "hunter2");
    store.set("plain", "text");
    assert_eq!(store.get("secret"), Value::from("***"));
    assert_eq!(store.get("plain"), Value::from("text"));
}

#[test]
fn removing_interceptors_restores_raw_access() {
    let store = DynamicStore::new();
    store.on_get(|_, _| Value::Null);
    store.set("a", 1);
    assert!(store.remove_interceptors(false));
    assert_eq!(store.get("a"), Value::Int(1));
}

// ============================================================================
// Clearing
// ============================================================================

#[test]
fn veto_blocks_clear_unless_forced() {
    let store = DynamicStore::new();
    let consulted = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&consulted);
    store.on_clear(move |_| {
        seen.fetch_add(1, Ordering::SeqCst);
        false
    });
    store.set("a", 1);

    assert!(!store.clear(false));
    assert_eq!(store.len(), 1);
    assert!(store.clear(true));
    assert!(store.is_empty());
    assert_eq!(consulted.load(Ordering::SeqCst), 2, "hooks run even when forced");
}

#[test]
fn observers_see_every_clear_outcome() {
    let store = DynamicStore::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    store.after_clear(move |event| sink.lock().push(*event));
    store.on_remove_interceptors(|_| false);

    store.clear(false);
    store.remove_interceptors(false);
    assert_eq!(
        *events.lock(),
        vec![
            ClearEvent {
                kind: ClearKind::Entries,
                force: false,
                performed: true
            },
            ClearEvent {
                kind: ClearKind::Interceptors,
                force: false,
                performed: false
            },
        ]
    );
}

#[test]
fn version_counter_survives_clear() {
    let store = DynamicStore::new();
    store.set("a", 1);
    store.set("b", 2);
    store.clear(false);
    store.set("c", 3);
    assert_eq!(store.version_of(&Key::from("c")), Some(3));
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn show_lists_entries_by_version() {
    let store = DynamicStore::new();
    store.set("a", 1);
    store.set("b", true);
    store.set("a", 3);
    assert_eq!(store.show(true), "[2] b = True\n[3] a = 3");
}

#[test]
fn show_without_all_keeps_recent_versions_only() {
    let store = DynamicStore::with_recent_versions(2);
    store.set("old", 1);
    store.set("mid", 2);
    store.set("new", 3);
    assert_eq!(store.show(false), "[2] mid = 2\n[3] new = 3");
    assert_eq!(store.show(true).lines().count(), 3);
}
