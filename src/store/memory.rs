//! In-memory reference store.

use super::{ChangeFeedHandle, ChangeSink, ModelStore};
use crate::error::StoreError;
use crate::types::{CollectionQuery, Entity, EntityKey, Scope};
use parking_lot::RwLock;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

type Authorizer = Box<dyn Fn(&Scope) -> bool + Send + Sync>;

/// An in-memory model store with a live change feed.
///
/// Queries support:
/// - `filter`: a JSON object; every field must equal the entity's field
/// - `order`: a field name, prefixed with `-` for descending
/// - `skip` / `top` pagination, applied after ordering
pub struct MemoryStore {
    primary_key: String,
    rows: RwLock<BTreeMap<EntityKey, Entity>>,
    watchers: Arc<RwLock<HashMap<u64, ChangeSink>>>,
    next_watcher: AtomicU64,
    authorizer: Option<Authorizer>,
    fail_queries: AtomicBool,
    queries: AtomicU64,
}

impl MemoryStore {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            rows: RwLock::new(BTreeMap::new()),
            watchers: Arc::new(RwLock::new(HashMap::new())),
            next_watcher: AtomicU64::new(1),
            authorizer: None,
            fail_queries: AtomicBool::new(false),
            queries: AtomicU64::new(0),
        }
    }

    /// Deny every read whose scope the authorizer rejects.
    pub fn with_authorizer(mut self, authorizer: impl Fn(&Scope) -> bool + Send + Sync + 'static) -> Self {
        self.authorizer = Some(Box::new(authorizer));
        self
    }

    /// Make every subsequent `find` fail (for exercising failure paths).
    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Number of `find` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn watcher_count(&self) -> usize {
        self.watchers.read().len()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Insert (or replace) an entity and publish it as added.
    pub fn insert(&self, entity: Entity) -> Result<EntityKey, StoreError> {
        let key = EntityKey::of(&entity, &self.primary_key).ok_or_else(|| {
            StoreError::Query(format!("entity has no usable '{}' field", self.primary_key))
        })?;
        self.rows.write().insert(key.clone(), entity.clone());
        self.publish(|sink| sink.added(entity.clone()));
        Ok(key)
    }

    /// Merge `change` into an existing entity and publish the partial update.
    pub fn update(&self, key: &EntityKey, change: Entity) -> Result<(), StoreError> {
        {
            let mut rows = self.rows.write();
            let row = rows
                .get_mut(key)
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            for (field, value) in &change {
                row.insert(field.clone(), value.clone());
            }
        }
        self.publish(|sink| sink.updated(key.clone(), change.clone()));
        Ok(())
    }

    /// Remove an entity and publish the removal.
    pub fn remove(&self, key: &EntityKey) -> Result<Entity, StoreError> {
        let removed = self
            .rows
            .write()
            .remove(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        self.publish(|sink| sink.removed(key.clone()));
        Ok(removed)
    }

    fn publish<F>(&self, send: F)
    where
        F: Fn(&ChangeSink) -> bool,
    {
        let mut closed = Vec::new();
        {
            let watchers = self.watchers.read();
            for (id, sink) in watchers.iter() {
                if !send(sink) {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut watchers = self.watchers.write();
            for id in closed {
                watchers.remove(&id);
            }
        }
    }

    fn authorize(&self, scope: &Scope) -> Result<(), StoreError> {
        match &self.authorizer {
            Some(allow) if !allow(scope) => Err(StoreError::Unauthorized(format!("{:?}", scope))),
            _ => Ok(()),
        }
    }

    fn matches(entity: &Entity, filter: &Option<Value>) -> Result<bool, StoreError> {
        match filter {
            None | Some(Value::Null) => Ok(true),
            Some(Value::Object(fields)) => {
                Ok(fields.iter().all(|(name, want)| entity.get(name) == Some(want)))
            }
            Some(other) => Err(StoreError::Query(format!("unsupported filter: {}", other))),
        }
    }

    fn sort(rows: &mut [Entity], order: &Option<Value>) -> Result<(), StoreError> {
        let spec = match order {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::String(spec)) => spec,
            Some(other) => return Err(StoreError::Query(format!("unsupported order: {}", other))),
        };
        let (field, descending) = match spec.strip_prefix('-') {
            Some(field) => (field, true),
            None => (spec.as_str(), false),
        };

        rows.sort_by(|a, b| {
            let ord = compare_values(a.get(field), b.get(field));
            if descending {
                ord.reverse()
            } else {
                ord
            }
        });
        Ok(())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(CmpOrdering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}

impl ModelStore for MemoryStore {
    fn get(&self, scope: &Scope, key: &EntityKey) -> Result<Option<Entity>, StoreError> {
        self.authorize(scope)?;
        Ok(self.rows.read().get(key).cloned())
    }

    fn find(&self, scope: &Scope, query: &CollectionQuery) -> Result<Vec<Entity>, StoreError> {
        self.authorize(scope)?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Query("store unavailable".to_string()));
        }

        let mut rows = Vec::new();
        for entity in self.rows.read().values() {
            if Self::matches(entity, &query.filter)? {
                rows.push(entity.clone());
            }
        }
        Self::sort(&mut rows, &query.order)?;

        let skip = query.skip.unwrap_or(0);
        let top = query.top.unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(skip).take(top).collect())
    }

    fn watch(&self, sink: ChangeSink) -> Result<ChangeFeedHandle, StoreError> {
        let id = self.next_watcher.fetch_add(1, Ordering::SeqCst);
        self.watchers.write().insert(id, sink);

        let watchers = Arc::clone(&self.watchers);
        Ok(ChangeFeedHandle::new(move || {
            watchers.write().remove(&id);
        }))
    }
}
