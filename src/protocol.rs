//! Wire messages exchanged with clients.
//!
//! Both directions are JSON objects tagged by `"type"` with camelCase fields:
//!
//! ```text
//! -> {"type":"subscribe-entity","requestId":"r1","model":"Order","key":2,"lastSeq":1}
//! <- {"type":"subscribed","requestId":"r1","subscriptionId":7,"model":"Order",
//!     "mode":"delta","changes":[...],"version":{"seq":2,"timestamp":...}}
//! <- {"type":"entity-updated","subscriptionId":7,"id":2,"change":{"total":25},"version":{...}}
//! ```

use crate::error::{Result, SyncError};
use crate::types::{
    ChangeEntry, CollectionQuery, Entity, EntityKey, Sequence, SubscriptionId, Version,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request sent by a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientRequest {
    #[serde(rename_all = "camelCase")]
    SubscribeEntity {
        request_id: String,
        model: String,
        key: EntityKey,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_seq: Option<Sequence>,
    },

    #[serde(rename_all = "camelCase")]
    SubscribeCollection {
        request_id: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        top: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        order: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    Unsubscribe { subscription_id: SubscriptionId },
}

impl ClientRequest {
    /// Parse a request from its JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| SyncError::InvalidRequest(e.to_string()))
    }

    /// Best-effort recovery of `requestId` from text that failed to parse.
    pub fn salvage_request_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        match value.get("requestId")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientRequest::SubscribeEntity { request_id, .. }
            | ClientRequest::SubscribeCollection { request_id, .. } => Some(request_id),
            ClientRequest::Unsubscribe { .. } => None,
        }
    }

    pub(crate) fn collection_query(
        filter: Option<Value>,
        top: Option<usize>,
        skip: Option<usize>,
        order: Option<Value>,
    ) -> CollectionQuery {
        CollectionQuery {
            filter,
            top,
            skip,
            order,
        }
    }
}

/// How a `subscribed` response carries its initial state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscribeMode {
    Snapshot,
    Delta,
}

/// A message pushed to a client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    Subscribed {
        request_id: String,
        subscription_id: SubscriptionId,
        model: String,
        mode: SubscribeMode,
        /// Entity (or `null`) for entity snapshots, entity array for collections.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        changes: Option<Vec<ChangeEntry>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        primary_key: Option<String>,
        version: Version,
    },

    #[serde(rename_all = "camelCase")]
    EntityAdded {
        subscription_id: SubscriptionId,
        entity: Entity,
        version: Version,
    },

    #[serde(rename_all = "camelCase")]
    EntityUpdated {
        subscription_id: SubscriptionId,
        id: EntityKey,
        change: Entity,
        version: Version,
    },

    #[serde(rename_all = "camelCase")]
    EntityRemoved {
        subscription_id: SubscriptionId,
        id: EntityKey,
        version: Version,
    },

    #[serde(rename_all = "camelCase")]
    SubscriptionError { request_id: String, error: String },
}

impl ServerMessage {
    /// Outbound message for a changelog entry on an entity subscription.
    pub fn from_change(subscription_id: SubscriptionId, entry: &ChangeEntry) -> Self {
        match entry.clone() {
            ChangeEntry::Added { entity, version } => ServerMessage::EntityAdded {
                subscription_id,
                entity,
                version,
            },
            ChangeEntry::Updated {
                id,
                change,
                version,
            } => ServerMessage::EntityUpdated {
                subscription_id,
                id,
                change,
                version,
            },
            ChangeEntry::Removed { id, version } => ServerMessage::EntityRemoved {
                subscription_id,
                id,
                version,
            },
        }
    }

    pub fn error(request_id: impl Into<String>, error: &SyncError) -> Self {
        ServerMessage::SubscriptionError {
            request_id: request_id.into(),
            error: error.to_string(),
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            ServerMessage::Subscribed { version, .. }
            | ServerMessage::EntityAdded { version, .. }
            | ServerMessage::EntityUpdated { version, .. }
            | ServerMessage::EntityRemoved { version, .. } => Some(*version),
            ServerMessage::SubscriptionError { .. } => None,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe_entity() {
        let request = ClientRequest::parse(
            r#"{"type":"subscribe-entity","requestId":"r1","model":"Order","key":2,"lastSeq":1}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            ClientRequest::SubscribeEntity {
                request_id: "r1".into(),
                model: "Order".into(),
                key: EntityKey::Int(2),
                last_seq: Some(Sequence(1)),
            }
        );
    }

    #[test]
    fn test_parse_subscribe_collection_defaults() {
        let request = ClientRequest::parse(
            r#"{"type":"subscribe-collection","requestId":"r2","model":"Order","top":10}"#,
        )
        .unwrap();
        match request {
            ClientRequest::SubscribeCollection {
                top, skip, filter, ..
            } => {
                assert_eq!(top, Some(10));
                assert_eq!(skip, None);
                assert_eq!(filter, None);
            }
            other => panic!("unexpected request {:?}", other),
        }
    }

    #[test]
    fn test_salvage_request_id() {
        let text = r#"{"type":"subscribe-entity","requestId":"r9","model":"Order"}"#;
        assert!(ClientRequest::parse(text).is_err());
        assert_eq!(ClientRequest::salvage_request_id(text), Some("r9".into()));
        assert_eq!(ClientRequest::salvage_request_id("not json"), None);
    }

    #[test]
    fn test_entity_updated_wire_shape() {
        let message = ServerMessage::EntityUpdated {
            subscription_id: SubscriptionId(4),
            id: EntityKey::Int(1),
            change: json!({"total": 15}).as_object().cloned().unwrap(),
            version: Version {
                seq: Sequence(3),
                timestamp: Timestamp(99),
            },
        };
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({
                "type": "entity-updated",
                "subscriptionId": 4,
                "id": 1,
                "change": {"total": 15},
                "version": {"seq": 3, "timestamp": 99}
            })
        );
    }

    #[test]
    fn test_subscribed_skips_absent_fields() {
        let message = ServerMessage::Subscribed {
            request_id: "r1".into(),
            subscription_id: SubscriptionId(1),
            model: "Order".into(),
            mode: SubscribeMode::Snapshot,
            data: Some(Value::Null),
            changes: None,
            primary_key: None,
            version: Version {
                seq: Sequence(0),
                timestamp: Timestamp(0),
            },
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["mode"], json!("snapshot"));
        assert_eq!(value["data"], Value::Null);
        assert!(value.get("changes").is_none());
        assert!(value.get("primaryKey").is_none());
    }
}
