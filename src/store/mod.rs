//! Store adapter boundary.
//!
//! The engine never touches storage directly. Each registered model is backed
//! by a [`ModelStore`] that can:
//! - fetch one entity by key under a [`Scope`]
//! - run a filtered/sorted/paginated query under a [`Scope`]
//! - push raw add/update/remove notifications into a [`ChangeSink`]

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::{CollectionQuery, Entity, EntityKey, Scope};
use crossbeam_channel::Sender;
use std::fmt;
use std::sync::Arc;

/// Capability set the engine needs from the backing store of one model.
pub trait ModelStore: Send + Sync {
    /// Fetch a single entity. `Ok(None)` when it does not exist.
    fn get(&self, scope: &Scope, key: &EntityKey) -> Result<Option<Entity>, StoreError>;

    /// Run a collection query.
    fn find(&self, scope: &Scope, query: &CollectionQuery) -> Result<Vec<Entity>, StoreError>;

    /// Start publishing changes into `sink` until the returned handle is released.
    fn watch(&self, sink: ChangeSink) -> Result<ChangeFeedHandle, StoreError>;
}

/// A raw notification from the store, before it is versioned.
#[derive(Clone, Debug, PartialEq)]
pub enum RawChange {
    Added(Entity),
    Updated { id: EntityKey, change: Entity },
    Removed(EntityKey),
}

/// A raw change tagged with the model it belongs to.
#[derive(Clone, Debug)]
pub struct FeedEvent {
    pub model: Arc<str>,
    pub change: RawChange,
}

/// Where a store pushes the changes of one model.
#[derive(Clone)]
pub struct ChangeSink {
    model: Arc<str>,
    sender: Sender<FeedEvent>,
}

impl ChangeSink {
    pub(crate) fn new(model: Arc<str>, sender: Sender<FeedEvent>) -> Self {
        Self { model, sender }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Publish a change. Returns false once the receiving engine is gone.
    pub fn publish(&self, change: RawChange) -> bool {
        self.sender
            .send(FeedEvent {
                model: Arc::clone(&self.model),
                change,
            })
            .is_ok()
    }

    pub fn added(&self, entity: Entity) -> bool {
        self.publish(RawChange::Added(entity))
    }

    pub fn updated(&self, id: EntityKey, change: Entity) -> bool {
        self.publish(RawChange::Updated { id, change })
    }

    pub fn removed(&self, id: EntityKey) -> bool {
        self.publish(RawChange::Removed(id))
    }
}

impl fmt::Debug for ChangeSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSink").field("model", &self.model).finish()
    }
}

/// Owned registration into a store's change feed.
///
/// The release callback runs exactly once, on [`release`](Self::release) or drop.
pub struct ChangeFeedHandle {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ChangeFeedHandle {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// A handle with nothing to release.
    pub fn detached() -> Self {
        Self { release: None }
    }

    pub fn release(mut self) {
        self.run_release();
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for ChangeFeedHandle {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for ChangeFeedHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedHandle")
            .field("active", &self.release.is_some())
            .finish()
    }
}
