//! Live subscription state.

use crate::delivery::Connection;
use crate::protocol::SubscribeMode;
use crate::types::{
    CollectionQuery, ConnectionId, Entity, EntityKey, Scope, Sequence, SubscriptionId, Version,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Subscription to one entity, addressed by primary key.
pub struct EntitySubscription {
    pub id: SubscriptionId,
    pub connection: Arc<dyn Connection>,
    pub scope: Scope,
    pub model: Arc<str>,
    pub key: EntityKey,
    pub last_delivered_seq: Sequence,
}

/// Subscription to a filtered, ordered, paginated collection.
pub struct CollectionSubscription {
    pub id: SubscriptionId,
    pub connection: Arc<dyn Connection>,
    pub scope: Scope,
    pub model: Arc<str>,
    pub query: CollectionQuery,
    pub last_delivered_seq: Sequence,
    /// Exactly what the subscriber was last told, keyed by primary key.
    pub observed: HashMap<EntityKey, Entity>,
}

pub enum Subscription {
    Entity(EntitySubscription),
    Collection(CollectionSubscription),
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        match self {
            Subscription::Entity(s) => s.id,
            Subscription::Collection(s) => s.id,
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        match self {
            Subscription::Entity(s) => &s.connection,
            Subscription::Collection(s) => &s.connection,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection().id()
    }

    pub fn model(&self) -> &Arc<str> {
        match self {
            Subscription::Entity(s) => &s.model,
            Subscription::Collection(s) => &s.model,
        }
    }

    pub fn last_delivered_seq(&self) -> Sequence {
        match self {
            Subscription::Entity(s) => s.last_delivered_seq,
            Subscription::Collection(s) => s.last_delivered_seq,
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Subscription::Collection(_))
    }
}

/// What a successful subscribe returns to the caller.
#[derive(Clone, Debug, PartialEq)]
pub struct SubscriptionDescriptor {
    pub id: SubscriptionId,
    pub model: String,
    pub mode: SubscribeMode,
    pub version: Version,
}
