//! Live subscriptions and the manager that drives them.
//!
//! A subscription is either:
//! - an entity subscription, fed directly from the model's changelog
//! - a collection subscription, re-evaluated against the store and diffed
//!
//! # Example
//!
//! ```ignore
//! let mut manager = SubscriptionManager::new(EngineConfig::default());
//! manager.register::<Order>("Order", "id", store.clone(), ModelOptions::default())?;
//!
//! let connection: Arc<dyn Connection> = Arc::new(MemoryConnection::new(1));
//! manager.handle_text(&connection, Scope::anonymous(),
//!     r#"{"type":"subscribe-entity","requestId":"r1","model":"Order","key":2}"#);
//!
//! store.update(&EntityKey::Int(2), patch)?;
//! manager.pump(); // connection now holds an entity-updated message
//! ```

mod manager;
mod table;
mod types;

pub use manager::{EngineStats, SubscriptionManager};
pub use table::SubscriptionTable;
pub use types::{
    CollectionSubscription, EntitySubscription, Subscription, SubscriptionDescriptor,
};
