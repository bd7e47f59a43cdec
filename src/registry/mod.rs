//! Registered models: sequence counters, changelogs and change feeds.

mod changelog;

pub use changelog::Changelog;

use crate::config::ModelOptions;
use crate::error::{Result, SyncError};
use crate::store::{ChangeFeedHandle, ChangeSink, FeedEvent, ModelStore, RawChange};
use crate::types::{ChangeEntry, Sequence, Timestamp, Version};
use crossbeam_channel::Sender;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// A model type with a fixed wire name and primary key.
pub trait Model: 'static {
    const NAME: &'static str;
    const PRIMARY_KEY: &'static str;
}

/// Everything the engine tracks for one model.
pub struct ModelRegistration {
    name: Arc<str>,
    type_id: TypeId,
    type_name: &'static str,
    primary_key: String,
    current_seq: Sequence,
    changelog: Changelog,
    options: ModelOptions,
    store: Arc<dyn ModelStore>,
    feed: Option<ChangeFeedHandle>,
}

impl ModelRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn current_seq(&self) -> Sequence {
        self.current_seq
    }

    pub fn changelog(&self) -> &Changelog {
        &self.changelog
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    pub fn store(&self) -> &Arc<dyn ModelStore> {
        &self.store
    }

    /// Version describing the model as of now, without advancing it.
    pub fn version_at(&self, timestamp: Timestamp) -> Version {
        Version {
            seq: self.current_seq,
            timestamp,
        }
    }

    /// Stamp a raw change, append it to the changelog and prune stale entries.
    pub fn record(&mut self, change: RawChange, now: Timestamp) -> ChangeEntry {
        self.current_seq = self.current_seq.next();
        let version = Version {
            seq: self.current_seq,
            timestamp: now,
        };

        let entry = match change {
            RawChange::Added(entity) => ChangeEntry::Added { entity, version },
            RawChange::Updated { id, change } => ChangeEntry::Updated {
                id,
                change,
                version,
            },
            RawChange::Removed(id) => ChangeEntry::Removed { id, version },
        };
        self.changelog.append(entry.clone());

        let retention = self.options.retention.as_micros().min(i64::MAX as u128) as i64;
        let cutoff = now.saturating_sub_micros(retention);
        self.changelog.prune(cutoff, self.options.changelog_capacity);

        entry
    }

    fn release_feed(&mut self) {
        if let Some(feed) = self.feed.take() {
            feed.release();
        }
    }
}

/// Registry of all models, keyed by wire name.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<Arc<str>, ModelRegistration>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` for the Rust type `T` and subscribe to the store's feed.
    ///
    /// Returns `Ok(false)` when the same type was already registered under
    /// `name`; a different type under the same name is a conflict.
    pub fn register<T: 'static>(
        &mut self,
        name: &str,
        primary_key: &str,
        store: Arc<dyn ModelStore>,
        options: ModelOptions,
        feed_sender: &Sender<FeedEvent>,
    ) -> Result<bool> {
        let type_id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();

        if let Some(existing) = self.models.get(name) {
            if existing.type_id == type_id {
                return Ok(false);
            }
            return Err(SyncError::RegistrationConflict {
                model: name.to_string(),
                existing: existing.type_name,
                attempted: type_name,
            });
        }

        let name: Arc<str> = Arc::from(name);
        let feed = store.watch(ChangeSink::new(Arc::clone(&name), feed_sender.clone()))?;

        debug!(model = %name, primary_key, "registered model");

        self.models.insert(
            Arc::clone(&name),
            ModelRegistration {
                name,
                type_id,
                type_name,
                primary_key: primary_key.to_string(),
                current_seq: Sequence(0),
                changelog: Changelog::new(),
                options,
                store,
                feed: Some(feed),
            },
        );
        Ok(true)
    }

    pub fn get(&self, name: &str) -> Option<&ModelRegistration> {
        self.models.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut ModelRegistration> {
        self.models.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Release every change feed and forget all models.
    pub fn dispose(&mut self) {
        for (_, mut registration) in self.models.drain() {
            registration.release_feed();
            debug!(model = %registration.name, "released change feed");
        }
    }
}

impl Drop for ModelRegistry {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::EntityKey;
    use serde_json::json;
    use std::time::Duration;

    struct Order;
    struct Invoice;

    fn registry_with_order() -> (ModelRegistry, Arc<MemoryStore>, Sender<FeedEvent>) {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let store = Arc::new(MemoryStore::new("id"));
        let mut registry = ModelRegistry::new();
        registry
            .register::<Order>("Order", "id", store.clone(), ModelOptions::default(), &tx)
            .unwrap();
        (registry, store, tx)
    }

    #[test]
    fn test_reregister_same_type_is_noop() {
        let (mut registry, store, tx) = registry_with_order();
        let added = registry
            .register::<Order>("Order", "id", store.clone(), ModelOptions::default(), &tx)
            .unwrap();
        assert!(!added);
        assert_eq!(registry.len(), 1);
        assert_eq!(store.watcher_count(), 1);
    }

    #[test]
    fn test_register_conflicting_type() {
        let (mut registry, store, tx) = registry_with_order();
        let result =
            registry.register::<Invoice>("Order", "id", store, ModelOptions::default(), &tx);
        assert!(matches!(result, Err(SyncError::RegistrationConflict { .. })));
    }

    #[test]
    fn test_record_stamps_consecutive_sequences() {
        let (mut registry, _store, _tx) = registry_with_order();
        let model = registry.get_mut("Order").unwrap();

        for expected in 1..=3u64 {
            let entry = model.record(
                RawChange::Added(json!({"id": expected}).as_object().cloned().unwrap()),
                Timestamp(expected as i64),
            );
            assert_eq!(entry.seq(), Sequence(expected));
        }
        assert_eq!(model.current_seq(), Sequence(3));
        assert_eq!(model.changelog().len(), 3);
    }

    #[test]
    fn test_record_prunes_by_retention() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let mut registry = ModelRegistry::new();
        registry
            .register::<Order>(
                "Order",
                "id",
                Arc::new(MemoryStore::new("id")),
                ModelOptions::default().with_retention(Duration::from_micros(100)),
                &tx,
            )
            .unwrap();
        let model = registry.get_mut("Order").unwrap();

        model.record(RawChange::Removed(EntityKey::Int(1)), Timestamp(1_000));
        model.record(RawChange::Removed(EntityKey::Int(2)), Timestamp(1_050));
        model.record(RawChange::Removed(EntityKey::Int(3)), Timestamp(1_200));

        assert_eq!(model.changelog().oldest_seq(), Some(Sequence(3)));
        assert_eq!(model.current_seq(), Sequence(3));
    }

    #[test]
    fn test_dispose_releases_feeds() {
        let (mut registry, store, _tx) = registry_with_order();
        registry.dispose();
        assert!(registry.is_empty());
        assert_eq!(store.watcher_count(), 0);
    }
}
