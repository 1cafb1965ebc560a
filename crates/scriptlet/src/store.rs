//! Versioned multi-key scratch store available to script code.
//!
//! Every write bumps a store-wide version counter and stamps the written
//! entry with it, which gives `show` a cheap "most recent writes" view.
//! Reads and writes can be rewritten by interceptors, and bulk clearing can
//! be vetoed by pre-hooks unless forced.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::{
    error::StoreError,
    value::{Key, Value},
};

/// Default number of most recent versions shown by [`DynamicStore::show`].
pub const DEFAULT_RECENT_VERSIONS: u64 = 10;

/// Rewrites a value on its way into or out of the store.
pub type Interceptor = Arc<dyn Fn(&Key, Value) -> Value + Send + Sync>;
/// Pre-hook consulted before a bulk clear; returning `false` vetoes it.
/// Receives the `force` flag.
pub type ClearHook = Arc<dyn Fn(bool) -> bool + Send + Sync>;
/// Post-hook observing the outcome of a bulk clear.
pub type ClearObserver = Arc<dyn Fn(&ClearEvent) + Send + Sync>;

/// What a bulk clear targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearKind {
    /// All entries.
    Entries,
    /// All get/set interceptors.
    Interceptors,
}

/// Outcome of a bulk clear, passed to [`ClearObserver`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearEvent {
    pub kind: ClearKind,
    pub force: bool,
    /// Whether the clear actually happened.
    pub performed: bool,
}

/// A first-class function reshaping a multi-key lookup result.
#[derive(Clone)]
pub struct Transform {
    name: &'static str,
    apply: Arc<dyn Fn(IndexMap<Key, Value>) -> Value + Send + Sync>,
}

impl Transform {
    /// Wraps an arbitrary map-to-value function.
    pub fn new(name: &'static str, apply: impl Fn(IndexMap<Key, Value>) -> Value + Send + Sync + 'static) -> Self {
        Self {
            name,
            apply: Arc::new(apply),
        }
    }

    /// Flattens the looked-up values, in key order, into an array.
    #[must_use]
    pub fn values_array() -> Self {
        Self::new("varr", |map| Value::Array(map.into_values().collect()))
    }

    /// Flattens the looked-up values, in key order, into a list.
    #[must_use]
    pub fn values_list() -> Self {
        Self::new("vlist", |map| Value::List(map.into_values().collect()))
    }

    /// Packs the looked-up values, in key order, into a tuple.
    #[must_use]
    pub fn values_tuple() -> Self {
        Self::new("vtuple", |map| Value::Tuple(map.into_values().collect()))
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn apply(&self, map: IndexMap<Key, Value>) -> Value {
        (self.apply)(map)
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    version: u64,
}

#[derive(Debug, Default)]
struct Entries {
    map: IndexMap<Key, Entry>,
    version: u64,
}

impl Entries {
    fn write(&mut self, key: Key, value: Value) {
        self.version += 1;
        let version = self.version;
        self.map.insert(key, Entry { value, version });
    }
}

#[derive(Default)]
struct Hooks {
    on_get: Vec<Interceptor>,
    on_set: Vec<Interceptor>,
    on_clear: Vec<ClearHook>,
    on_remove_interceptors: Vec<ClearHook>,
    after_clear: Vec<ClearObserver>,
}

/// Ordered associative store with versioned entries.
///
/// The store is internally synchronized: it is shared by reference between a
/// session's globals object and any number of concurrent evaluations.
/// Interceptors and hooks run outside the entry lock, so they may call back
/// into the store.
pub struct DynamicStore {
    entries: Mutex<Entries>,
    hooks: RwLock<Hooks>,
    recent_versions: u64,
}

impl Default for DynamicStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_recent_versions(DEFAULT_RECENT_VERSIONS)
    }

    /// Creates a store whose `show(false)` covers the given number of versions.
    #[must_use]
    pub fn with_recent_versions(recent_versions: u64) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            hooks: RwLock::new(Hooks::default()),
            recent_versions,
        }
    }

    /// Reads a single key; absent keys read as [`Value::Null`].
    pub fn get(&self, key: impl Into<Key>) -> Value {
        let key = key.into();
        let value = self.raw_get(&key);
        self.intercept_get(&key, value)
    }

    /// Writes a single key, stamping it with the next version.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) {
        let key = key.into();
        let value = self.intercept_set(&key, value.into());
        self.entries.lock().write(key, value);
    }

    /// Reads several keys into a key-to-value map, even when they collapse
    /// to a single entry.
    pub fn get_many(&self, keys: &[Key]) -> Value {
        Value::Map(self.collect(keys))
    }

    /// Reads several keys and passes the resulting map through `transform`.
    ///
    /// A transform yielding a single-entry map is unwrapped to the bare value.
    pub fn get_many_as(&self, transform: &Transform, keys: &[Key]) -> Value {
        unwrap_single(transform.apply(self.collect(keys)))
    }

    /// Writes several keys at once.
    ///
    /// A composite value (list, array, tuple) is distributed positionally and
    /// must have exactly one element per key; anything else is broadcast to
    /// every key. On an arity mismatch nothing is written.
    pub fn set_many(&self, keys: &[Key], value: impl Into<Value>) -> Result<(), StoreError> {
        let values = match value.into().into_elements() {
            Ok(elements) if elements.len() == keys.len() => elements,
            Ok(elements) => {
                return Err(StoreError::ArityMismatch {
                    values: elements.len(),
                    keys: keys.len(),
                });
            }
            Err(single) => vec![single; keys.len()],
        };

        let writes: Vec<(Key, Value)> = keys
            .iter()
            .zip(values)
            .map(|(key, value)| (key.clone(), self.intercept_set(key, value)))
            .collect();
        let mut entries = self.entries.lock();
        for (key, value) in writes {
            entries.write(key, value);
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, key: &Key) -> bool {
        self.entries.lock().map.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the version stamped by the most recent write (0 before any).
    #[must_use]
    pub fn version(&self) -> u64 {
        self.entries.lock().version
    }

    /// Returns the version an entry was last written at.
    #[must_use]
    pub fn version_of(&self, key: &Key) -> Option<u64> {
        self.entries.lock().map.get(key).map(|entry| entry.version)
    }

    /// Copies every entry out in insertion order, bypassing interceptors.
    #[must_use]
    pub fn entries(&self) -> Vec<(Key, Value)> {
        self.entries
            .lock()
            .map
            .iter()
            .map(|(key, entry)| (key.clone(), entry.value.clone()))
            .collect()
    }

    /// Renders entries ordered by version, one `[version] key = value` per line.
    ///
    /// Unless `all` is set only entries written within the most recent
    /// `recent_versions` versions are included.
    #[must_use]
    pub fn show(&self, all: bool) -> String {
        let entries = self.entries.lock();
        let mut rows: Vec<(&Key, &Entry)> = entries
            .map
            .iter()
            .filter(|(_, entry)| all || entries.version - entry.version < self.recent_versions)
            .collect();
        rows.sort_by_key(|(_, entry)| entry.version);
        rows.iter()
            .map(|(key, entry)| format!("[{}] {key} = {}", entry.version, entry.value))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Removes every entry unless a pre-hook vetoes and `force` is unset.
    ///
    /// The version counter keeps counting across clears.
    pub fn clear(&self, force: bool) -> bool {
        let performed = self.may_clear(ClearKind::Entries, force);
        if performed {
            self.entries.lock().map.clear();
        }
        self.observe(ClearKind::Entries, force, performed);
        performed
    }

    /// Drops every get/set interceptor unless a pre-hook vetoes and `force`
    /// is unset.
    pub fn remove_interceptors(&self, force: bool) -> bool {
        let performed = self.may_clear(ClearKind::Interceptors, force);
        if performed {
            let mut hooks = self.hooks.write();
            hooks.on_get.clear();
            hooks.on_set.clear();
        }
        self.observe(ClearKind::Interceptors, force, performed);
        performed
    }

    /// Clears entries and/or interceptors; stops at the first vetoed step.
    pub fn reset(&self, clear_entries: bool, clear_interceptors: bool, force: bool) -> bool {
        (!clear_entries || self.clear(force)) && (!clear_interceptors || self.remove_interceptors(force))
    }

    /// Appends an interceptor applied to every read, after earlier ones.
    pub fn on_get(&self, interceptor: impl Fn(&Key, Value) -> Value + Send + Sync + 'static) {
        self.hooks.write().on_get.push(Arc::new(interceptor));
    }

    /// Appends an interceptor applied to every write, after earlier ones.
    pub fn on_set(&self, interceptor: impl Fn(&Key, Value) -> Value + Send + Sync + 'static) {
        self.hooks.write().on_set.push(Arc::new(interceptor));
    }

    pub fn on_clear(&self, hook: impl Fn(bool) -> bool + Send + Sync + 'static) {
        self.hooks.write().on_clear.push(Arc::new(hook));
    }

    pub fn on_remove_interceptors(&self, hook: impl Fn(bool) -> bool + Send + Sync + 'static) {
        self.hooks.write().on_remove_interceptors.push(Arc::new(hook));
    }

    pub fn after_clear(&self, observer: impl Fn(&ClearEvent) + Send + Sync + 'static) {
        self.hooks.write().after_clear.push(Arc::new(observer));
    }

    fn raw_get(&self, key: &Key) -> Value {
        self.entries
            .lock()
            .map
            .get(key)
            .map_or(Value::Null, |entry| entry.value.clone())
    }

    fn collect(&self, keys: &[Key]) -> IndexMap<Key, Value> {
        let mut map = IndexMap::with_capacity(keys.len());
        for key in keys {
            map.insert(key.clone(), self.get(key.clone()));
        }
        map
    }

    fn intercept_get(&self, key: &Key, value: Value) -> Value {
        let interceptors = self.hooks.read().on_get.clone();
        interceptors.iter().fold(value, |value, f| f(key, value))
    }

    fn intercept_set(&self, key: &Key, value: Value) -> Value {
        let interceptors = self.hooks.read().on_set.clone();
        interceptors.iter().fold(value, |value, f| f(key, value))
    }

    fn may_clear(&self, kind: ClearKind, force: bool) -> bool {
        let hooks = {
            let hooks = self.hooks.read();
            match kind {
                ClearKind::Entries => hooks.on_clear.clone(),
                ClearKind::Interceptors => hooks.on_remove_interceptors.clone(),
            }
        };
        // hooks always run, even when forced
        let allowed = hooks.iter().fold(true, |allowed, hook| hook(force) && allowed);
        allowed || force
    }

    fn observe(&self, kind: ClearKind, force: bool, performed: bool) {
        let observers = self.hooks.read().after_clear.clone();
        let event = ClearEvent { kind, force, performed };
        for observer in &observers {
            observer(&event);
        }
    }
}

impl fmt::Display for DynamicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.show(false))
    }
}

impl fmt::Debug for DynamicStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("DynamicStore")
            .field("len", &entries.map.len())
            .field("version", &entries.version)
            .finish_non_exhaustive()
    }
}

fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Map(map) if map.len() == 1 => map.into_values().next().unwrap_or_default(),
        other => other,
    }
}
