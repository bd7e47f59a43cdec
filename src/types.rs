//! Core types shared by the sync engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// A stored entity: a flat JSON record.
pub type Entity = Map<String, Value>;

/// Position in a model's change stream.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Sequence(pub u64);

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sequence {
    pub fn next(self) -> Self {
        Sequence(self.0 + 1)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }

    /// Timestamp shifted back by `micros`, saturating at zero.
    pub fn saturating_sub_micros(self, micros: i64) -> Self {
        Timestamp(self.0.saturating_sub(micros).max(0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Version stamped on every dispatched change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub seq: Sequence,
    pub timestamp: Timestamp,
}

/// Primary-key value identifying an entity within its model.
///
/// Only integer and string keys are addressable; they serialize untagged so
/// the wire carries the same JSON value the entity holds.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    Int(i64),
    Text(String),
}

impl EntityKey {
    /// Interpret a JSON value as a key.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(EntityKey::Int),
            Value::String(s) => Some(EntityKey::Text(s.clone())),
            _ => None,
        }
    }

    /// Read the key stored under `primary_key` in `entity`.
    pub fn of(entity: &Entity, primary_key: &str) -> Option<Self> {
        entity.get(primary_key).and_then(Self::from_value)
    }

    pub fn to_value(&self) -> Value {
        match self {
            EntityKey::Int(i) => Value::from(*i),
            EntityKey::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Debug for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(i) => write!(f, "Key({})", i),
            EntityKey::Text(s) => write!(f, "Key({:?})", s),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Int(i) => write!(f, "{}", i),
            EntityKey::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityKey {
    fn from(value: i64) -> Self {
        EntityKey::Int(value)
    }
}

impl From<&str> for EntityKey {
    fn from(value: &str) -> Self {
        EntityKey::Text(value.to_string())
    }
}

impl From<String> for EntityKey {
    fn from(value: String) -> Self {
        EntityKey::Text(value)
    }
}

/// Unique identifier for a subscription, never reused within a process.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Debug for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SubscriptionId({})", self.0)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a client connection, assigned by the transport.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Opaque per-connection authorization context.
///
/// The engine never inspects it; it is handed unchanged to every store call.
#[derive(Clone)]
pub struct Scope(Option<Arc<dyn Any + Send + Sync>>);

impl Scope {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Scope(Some(Arc::new(value)))
    }

    /// A scope carrying no credentials.
    pub fn anonymous() -> Self {
        Scope(None)
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.is_none()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::anonymous()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_anonymous() {
            write!(f, "Scope(anonymous)")
        } else {
            write!(f, "Scope(..)")
        }
    }
}

/// Filter, ordering and pagination of a collection subscription.
///
/// `filter` and `order` are opaque to the engine and interpreted by the store.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Value>,
}

/// One entry of a model's changelog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEntry {
    Added {
        entity: Entity,
        version: Version,
    },
    Updated {
        id: EntityKey,
        /// Only the fields that changed.
        change: Entity,
        version: Version,
    },
    Removed {
        id: EntityKey,
        version: Version,
    },
}

impl ChangeEntry {
    pub fn version(&self) -> Version {
        match self {
            ChangeEntry::Added { version, .. }
            | ChangeEntry::Updated { version, .. }
            | ChangeEntry::Removed { version, .. } => *version,
        }
    }

    pub fn seq(&self) -> Sequence {
        self.version().seq
    }

    /// Identity of the entity this entry pertains to.
    pub fn key(&self, primary_key: &str) -> Option<EntityKey> {
        match self {
            ChangeEntry::Added { entity, .. } => EntityKey::of(entity, primary_key),
            ChangeEntry::Updated { id, .. } | ChangeEntry::Removed { id, .. } => Some(id.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_entity_key_from_value() {
        assert_eq!(EntityKey::from_value(&json!(7)), Some(EntityKey::Int(7)));
        assert_eq!(
            EntityKey::from_value(&json!("a-1")),
            Some(EntityKey::Text("a-1".into()))
        );
        assert_eq!(EntityKey::from_value(&json!(1.5)), None);
        assert_eq!(EntityKey::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_entity_key_serializes_untagged() {
        assert_eq!(serde_json::to_value(EntityKey::Int(2)).unwrap(), json!(2));
        assert_eq!(
            serde_json::to_value(EntityKey::from("x")).unwrap(),
            json!("x")
        );
        let key: EntityKey = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(key, EntityKey::Int(3));
    }

    #[test]
    fn test_change_entry_wire_shape() {
        let entry = ChangeEntry::Added {
            entity: json!({"id": 2, "total": 20}).as_object().cloned().unwrap(),
            version: Version {
                seq: Sequence(2),
                timestamp: Timestamp(10),
            },
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "type": "added",
                "entity": {"id": 2, "total": 20},
                "version": {"seq": 2, "timestamp": 10}
            })
        );
        assert_eq!(entry.key("id"), Some(EntityKey::Int(2)));
    }

    #[test]
    fn test_scope_downcast() {
        let scope = Scope::new(String::from("alice"));
        assert_eq!(scope.downcast_ref::<String>().map(|s| s.as_str()), Some("alice"));
        assert!(scope.downcast_ref::<u32>().is_none());
        assert!(Scope::anonymous().is_anonymous());
    }
}
