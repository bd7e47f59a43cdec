//! Diffing of collection query results against a subscriber's observed set.

use crate::protocol::ServerMessage;
use crate::types::{Entity, EntityKey, SubscriptionId, Version};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// Index query rows by primary key. Rows without a usable key are skipped.
pub fn index_by_key(rows: &[Entity], primary_key: &str) -> HashMap<EntityKey, Entity> {
    let mut indexed = HashMap::with_capacity(rows.len());
    for row in rows {
        match EntityKey::of(row, primary_key) {
            Some(key) => {
                indexed.insert(key, row.clone());
            }
            None => warn!(primary_key, "query returned a row without a usable primary key"),
        }
    }
    indexed
}

/// Top-level fields whose values differ between `old` and `new`.
///
/// Fields dropped from `new` are reported as `null`. Returns `None` when
/// every field is equal.
pub fn shallow_diff(old: &Entity, new: &Entity) -> Option<Entity> {
    let mut change = Entity::new();

    for (field, value) in new {
        if old.get(field) != Some(value) {
            change.insert(field.clone(), value.clone());
        }
    }
    for field in old.keys() {
        if !new.contains_key(field) {
            change.insert(field.clone(), Value::Null);
        }
    }

    if change.is_empty() {
        None
    } else {
        Some(change)
    }
}

/// Compute the messages that move a subscriber from `observed` to `fresh`.
///
/// Removals come first, then additions and updates. Every message carries the
/// same `version`: an evaluation may summarize several changes at once.
pub fn diff(
    subscription_id: SubscriptionId,
    observed: &HashMap<EntityKey, Entity>,
    fresh: &HashMap<EntityKey, Entity>,
    version: Version,
) -> Vec<ServerMessage> {
    let mut messages = Vec::new();

    let mut removed: Vec<&EntityKey> = observed.keys().filter(|k| !fresh.contains_key(*k)).collect();
    removed.sort();
    for key in removed {
        messages.push(ServerMessage::EntityRemoved {
            subscription_id,
            id: key.clone(),
            version,
        });
    }

    let mut current: Vec<(&EntityKey, &Entity)> = fresh.iter().collect();
    current.sort_by(|a, b| a.0.cmp(b.0));
    for (key, entity) in current {
        match observed.get(key) {
            None => messages.push(ServerMessage::EntityAdded {
                subscription_id,
                entity: entity.clone(),
                version,
            }),
            Some(previous) => {
                if let Some(change) = shallow_diff(previous, entity) {
                    messages.push(ServerMessage::EntityUpdated {
                        subscription_id,
                        id: key.clone(),
                        change,
                        version,
                    });
                }
            }
        }
    }

    messages
}
