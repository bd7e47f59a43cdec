//! Ownership of live subscriptions and their secondary indexes.

use super::types::Subscription;
use crate::types::{ConnectionId, SubscriptionId};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// All live subscriptions, plus reverse indexes by connection and by model.
///
/// Index entries are removed as soon as they become empty.
pub struct SubscriptionTable {
    subscriptions: HashMap<SubscriptionId, Subscription>,
    by_connection: HashMap<ConnectionId, BTreeSet<SubscriptionId>>,
    by_model: HashMap<Arc<str>, BTreeSet<SubscriptionId>>,
    next_id: u64,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            subscriptions: HashMap::new(),
            by_connection: HashMap::new(),
            by_model: HashMap::new(),
            next_id: 1,
        }
    }

    /// Reserve a fresh id. Ids are never reused.
    pub fn next_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn insert(&mut self, subscription: Subscription) {
        let id = subscription.id();
        self.by_connection
            .entry(subscription.connection_id())
            .or_default()
            .insert(id);
        self.by_model
            .entry(Arc::clone(subscription.model()))
            .or_default()
            .insert(id);
        self.subscriptions.insert(id, subscription);
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<Subscription> {
        let subscription = self.subscriptions.remove(&id)?;

        let connection = subscription.connection_id();
        if let Some(ids) = self.by_connection.get_mut(&connection) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_connection.remove(&connection);
            }
        }

        if let Some(ids) = self.by_model.get_mut(subscription.model()) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_model.remove(subscription.model());
            }
        }

        Some(subscription)
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.subscriptions.get(&id)
    }

    pub fn get_mut(&mut self, id: SubscriptionId) -> Option<&mut Subscription> {
        self.subscriptions.get_mut(&id)
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.subscriptions.contains_key(&id)
    }

    pub fn ids_for_connection(&self, connection: ConnectionId) -> Vec<SubscriptionId> {
        self.by_connection
            .get(&connection)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ids_for_model(&self, model: &str) -> Vec<SubscriptionId> {
        self.by_model
            .get(model)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.subscriptions.keys().copied().collect()
    }

    pub fn has_connection(&self, connection: ConnectionId) -> bool {
        self.by_connection.contains_key(&connection)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.by_connection.len()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}
