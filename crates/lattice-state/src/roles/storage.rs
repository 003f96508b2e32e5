#![forbid(unsafe_code)]

//! `StorageProp`: state synchronized write-through with a storage backend.
//!
//! # Design
//!
//! A storage prop is a [`LocalState`](crate::roles::LocalState) whose value
//! survives the component: at construction it seeds from the backend under
//! its key (falling back to, and persisting, the supplied default), and
//! every change writes back. Deep mutations count — when the value is an
//! observed aggregate (object or list), the prop watches it and re-persists
//! on every element write, detaching from a replaced aggregate so a stale
//! handle can no longer trigger writes.
//!
//! Backends are deliberately infallible at the trait seam: a backend that
//! can fail (the file backend) logs and degrades to "key absent" / "write
//! dropped" rather than poisoning state updates that already happened in
//! memory.

use std::fmt;
use std::rc::{Rc, Weak};

use crate::cell::BackingCell;
use crate::engine::{Engine, ScopeId};
use crate::error::StateError;
use crate::node::DependencyNode;
use crate::observed::observe;
use crate::roles::Bindable;
use crate::value::Value;
use crate::watch::WatchRegistry;

// ─── Backend seam ────────────────────────────────────────────────────────────

/// Key/value persistence seam for [`StorageProp`].
///
/// Implementations must hand out *isolated* values: a loaded value mutated
/// by the caller must not change what a later `load` returns.
pub trait StorageBackend {
    /// The persisted value under `key`, if any.
    fn load(&self, key: &str) -> Option<Value>;

    /// Persist `value` under `key`, replacing any previous entry.
    fn store(&self, key: &str, value: &Value);
}

/// In-process backend. Cloning shares the same store, so props constructed
/// at different times (or in different engines) see each other's writes.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    entries: Rc<std::cell::RefCell<ahash::AHashMap<String, Value>>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Whether nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn load(&self, key: &str) -> Option<Value> {
        self.entries.borrow().get(key).map(Value::deep_copy)
    }

    fn store(&self, key: &str, value: &Value) {
        self.entries
            .borrow_mut()
            .insert(key.to_owned(), value.deep_copy());
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("keys", &self.len())
            .finish()
    }
}

// ─── StorageProp ─────────────────────────────────────────────────────────────

struct StorageInner {
    engine: Engine,
    owner: ScopeId,
    name: String,
    key: String,
    backend: Rc<dyn StorageBackend>,
    cell: BackingCell,
    watch: WatchRegistry,
    deep_watch_id: u64,
    self_weak: Weak<StorageInner>,
}

impl StorageInner {
    fn read(&self) -> Value {
        self.cell
            .get(&self.engine, self.engine.should_record(self.owner))
    }

    fn persist(&self) {
        self.backend.store(&self.key, &self.cell.peek());
    }

    /// Re-persist on deep mutations of the held observed aggregate.
    fn attach_deep_watch(&self, value: &Value) {
        let weak = self.self_weak.clone();
        let on_change = move |_: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.persist();
            }
        };
        match value {
            Value::Observed(obj) => obj.watch(self.deep_watch_id, on_change),
            Value::ObservedList(list) => list.watch(self.deep_watch_id, on_change),
            _ => {}
        }
    }

    fn detach_deep_watch(&self, value: &Value) {
        match value {
            Value::Observed(obj) => obj.unwatch(self.deep_watch_id),
            Value::ObservedList(list) => list.unwatch(self.deep_watch_id),
            _ => {}
        }
    }

    fn write(&self, value: Value) -> Result<bool, StateError> {
        self.engine.ensure_writable(&self.name)?;
        let wrapped = observe(&self.engine, &self.name, value);
        let old = self.cell.peek();
        let changed = self.cell.set(wrapped.clone());
        if changed {
            self.detach_deep_watch(&old);
            self.attach_deep_watch(&wrapped);
            self.persist();
            self.watch.notify(&self.name);
        }
        Ok(changed)
    }
}

impl Bindable for StorageInner {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> Value {
        self.read()
    }

    fn set_value(&self, value: Value) -> Result<bool, StateError> {
        self.write(value)
    }

    fn is_writable(&self) -> bool {
        true
    }
}

/// State variable persisted under a key in a [`StorageBackend`].
///
/// Cloning produces another handle to the same variable.
#[derive(Clone)]
pub struct StorageProp {
    inner: Rc<StorageInner>,
}

impl StorageProp {
    /// Declare a persisted variable. Seeds from the backend's value under
    /// `key` when present; otherwise starts at `default` and persists it
    /// immediately, so a later construction against the same backend finds
    /// it.
    #[must_use]
    pub fn new(
        engine: &Engine,
        owner: ScopeId,
        name: impl Into<String>,
        key: impl Into<String>,
        backend: Rc<dyn StorageBackend>,
        default: Value,
    ) -> Self {
        let name = name.into();
        let key = key.into();
        let loaded = backend.load(&key);
        let seeded_from_default = loaded.is_none();
        let initial = observe(engine, &name, loaded.unwrap_or(default));

        let inner = Rc::new_cyclic(|weak| StorageInner {
            engine: engine.clone(),
            owner,
            cell: BackingCell::new(name.clone(), initial),
            name,
            key,
            backend,
            watch: WatchRegistry::new(),
            deep_watch_id: engine.next_id(),
            self_weak: weak.clone(),
        });
        inner.attach_deep_watch(&inner.cell.peek());
        if seeded_from_default {
            inner.persist();
        }
        Self { inner }
    }

    /// Tracked read.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.read()
    }

    /// Write. Persists to the backend on every real change.
    pub fn set(&self, value: Value) -> Result<bool, StateError> {
        self.inner.write(value)
    }

    /// Register a watch callback fired with this variable's name on change.
    pub fn watch(&self, id: u64, callback: impl Fn(&str) + 'static) {
        self.inner.watch.add_subscriber(id, callback);
    }

    /// Remove a watch callback.
    pub fn unwatch(&self, id: u64) {
        self.inner.watch.remove_subscriber(id);
    }

    /// The variable's node, for diagnostics.
    #[must_use]
    pub fn node(&self) -> DependencyNode {
        self.inner.cell.node().clone()
    }

    /// The variable's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The backend key this variable persists under.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Handle usable as the source of a link.
    #[must_use]
    pub fn as_bindable(&self) -> Rc<dyn Bindable> {
        Rc::clone(&self.inner) as Rc<dyn Bindable>
    }
}

impl fmt::Debug for StorageProp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageProp")
            .field("name", &self.inner.name)
            .field("key", &self.inner.key)
            .field("value", &self.inner.cell.peek())
            .finish()
    }
}

// ─── File backend ────────────────────────────────────────────────────────────

/// JSON-file backend: one file holding an object of key → value.
///
/// Load and store failures (missing file aside) are logged and degrade to
/// "absent" / "dropped"; the in-memory state is never blocked on disk.
#[cfg(feature = "state-persistence")]
pub struct FileStorage {
    path: std::path::PathBuf,
}

#[cfg(feature = "state-persistence")]
impl FileStorage {
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn read_all(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let text = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            Ok(_) | Err(_) => {
                tracing::warn!(path = %self.path.display(), "malformed storage file, treating as empty");
                None
            }
        }
    }
}

#[cfg(feature = "state-persistence")]
impl StorageBackend for FileStorage {
    fn load(&self, key: &str) -> Option<Value> {
        self.read_all()?.get(key).map(json_to_value)
    }

    fn store(&self, key: &str, value: &Value) {
        let mut map = self.read_all().unwrap_or_default();
        map.insert(key.to_owned(), value_to_json(value));
        match serde_json::to_string_pretty(&serde_json::Value::Object(map)) {
            Ok(text) => {
                if let Err(err) = std::fs::write(&self.path, text) {
                    tracing::warn!(path = %self.path.display(), %err, "storage write failed");
                }
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "storage serialization failed");
            }
        }
    }
}

#[cfg(feature = "state-persistence")]
impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage")
            .field("path", &self.path)
            .finish()
    }
}

/// Lower a state value to JSON. Observed objects flatten to plain JSON
/// objects; non-finite floats have no JSON form and lower to null.
#[cfg(feature = "state-persistence")]
fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(x) => serde_json::Number::from_f64(*x).map_or(Json::Null, Json::Number),
        Value::Str(s) => Json::String(s.to_string()),
        Value::List(items) => Json::Array(items.borrow().iter().map(value_to_json).collect()),
        Value::Map(fields) => Json::Object(
            fields
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::Observed(obj) => Json::Object(
            obj.snapshot()
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect(),
        ),
        Value::ObservedList(list) => {
            Json::Array(list.snapshot().iter().map(value_to_json).collect())
        }
    }
}

/// Lift JSON to a plain state value; observability is reapplied by whoever
/// stores the result.
#[cfg(feature = "state-persistence")]
fn json_to_value(json: &serde_json::Value) -> Value {
    use serde_json::Value as Json;
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Float))
            .unwrap_or(Value::Null),
        Json::String(s) => Value::from(s.as_str()),
        Json::Array(items) => Value::list_from(items.iter().map(json_to_value)),
        Json::Object(map) => {
            Value::map_from(map.iter().map(|(k, v)| (k.clone(), json_to_value(v))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::RenderConsumer;

    fn backend() -> Rc<MemoryStorage> {
        Rc::new(MemoryStorage::new())
    }

    #[test]
    fn seeds_from_backend_when_key_exists() {
        let engine = Engine::new();
        let storage = backend();
        storage.store("volume", &Value::from(7));

        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "volume",
            "volume",
            storage,
            Value::from(0),
        );
        assert_eq!(prop.get(), Value::from(7));
    }

    #[test]
    fn missing_key_seeds_and_persists_the_default() {
        let engine = Engine::new();
        let storage = backend();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "volume",
            "volume",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::from(3),
        );

        assert_eq!(prop.get(), Value::from(3));
        assert_eq!(storage.load("volume"), Some(Value::from(3)));
    }

    #[test]
    fn set_writes_through_to_the_backend() {
        let engine = Engine::new();
        let storage = backend();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "volume",
            "volume",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::from(0),
        );

        assert!(prop.set(Value::from(11)).unwrap());
        assert_eq!(storage.load("volume"), Some(Value::from(11)));
    }

    #[test]
    fn value_survives_reconstruction() {
        let engine = Engine::new();
        let storage = backend();
        {
            let prop = StorageProp::new(
                &engine,
                engine.root_scope(),
                "volume",
                "volume",
                Rc::clone(&storage) as Rc<dyn StorageBackend>,
                Value::from(0),
            );
            prop.set(Value::from(5)).unwrap();
        }
        let revived = StorageProp::new(
            &engine,
            engine.root_scope(),
            "volume",
            "volume",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::from(0),
        );
        assert_eq!(revived.get(), Value::from(5));
    }

    #[test]
    fn deep_field_mutation_persists() {
        let engine = Engine::new();
        let storage = backend();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "settings",
            "settings",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::map_from([("dark", Value::from(false))]),
        );

        let obj = prop.get().as_observed().unwrap().clone();
        obj.set("dark", Value::from(true)).unwrap();

        let persisted = storage.load("settings").unwrap();
        assert_eq!(
            persisted.as_observed().unwrap().get("dark"),
            Some(Value::from(true))
        );
    }

    #[test]
    fn deep_list_mutation_persists() {
        let engine = Engine::new();
        let storage = backend();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "recent",
            "recent",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::list_from([Value::from("a"), Value::from("b")]),
        );

        let list = prop.get().as_observed_list().unwrap().clone();
        list.push(Value::from("c")).unwrap();
        let persisted = storage.load("recent").unwrap();
        assert_eq!(persisted.as_observed_list().unwrap().snapshot().len(), 3);

        list.set(0, Value::from("z")).unwrap();
        let persisted = storage.load("recent").unwrap();
        assert_eq!(
            persisted.as_observed_list().unwrap().get(0),
            Some(Value::from("z"))
        );
    }

    #[test]
    fn replaced_object_no_longer_persists() {
        let engine = Engine::new();
        let storage = backend();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "settings",
            "settings",
            Rc::clone(&storage) as Rc<dyn StorageBackend>,
            Value::map_from([("n", Value::from(1))]),
        );

        let stale = prop.get().as_observed().unwrap().clone();
        prop.set(Value::map_from([("n", Value::from(2))])).unwrap();

        // A mutation through the stale handle must not clobber the backend.
        stale.set("n", Value::from(99)).unwrap();
        let persisted = storage.load("settings").unwrap();
        assert_eq!(
            persisted.as_observed().unwrap().get("n"),
            Some(Value::from(2))
        );
    }

    #[test]
    fn loaded_values_are_isolated_from_the_store() {
        let storage = MemoryStorage::new();
        storage.store("k", &Value::map_from([("x", Value::from(1))]));

        let loaded = storage.load("k").unwrap();
        loaded
            .as_map()
            .unwrap()
            .borrow_mut()
            .insert("x".into(), Value::from(99));

        let reloaded = storage.load("k").unwrap();
        assert_eq!(
            reloaded.as_map().unwrap().borrow().get("x"),
            Some(&Value::from(1))
        );
    }

    #[test]
    fn reads_track_like_any_state() {
        let engine = Engine::new();
        let prop = StorageProp::new(
            &engine,
            engine.root_scope(),
            "volume",
            "volume",
            backend(),
            Value::from(0),
        );
        let consumer = RenderConsumer::new(&engine, "view");
        consumer.render(|| {
            let _ = prop.get();
        });
        prop.set(Value::from(1)).unwrap();
        assert!(consumer.is_dirty());
    }
}
