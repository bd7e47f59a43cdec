//! # Live Sync
//!
//! Real-time entity synchronization: clients subscribe to a single entity or
//! to a filtered/sorted/paginated collection and receive an incrementally
//! updated feed of changes.
//!
//! ## Core Concepts
//!
//! - **Models**: Entity types registered with a store adapter and a primary key
//! - **Changelog**: Per-model, time-bounded log of versioned changes
//! - **Delta sync**: Resuming an entity subscription from a client's last sequence
//! - **Collections**: Re-evaluated queries diffed against what the client last saw
//! - **Debouncing**: Bursts of changes coalesced into one delivery or evaluation
//!
//! ## Example
//!
//! ```ignore
//! use livesync::{EngineConfig, MemoryStore, ModelOptions, SubscriptionManager, SyncService};
//!
//! struct Order;
//!
//! let store = Arc::new(MemoryStore::new("id"));
//! let mut manager = SubscriptionManager::new(EngineConfig::default());
//! manager.register::<Order>("Order", "id", store.clone(), ModelOptions::default())?;
//!
//! let service = SyncService::spawn(manager)?;
//! let handle = service.handle();
//!
//! // From a connection's read loop
//! handle.request(connection, scope, text)?;
//!
//! // From its close event
//! handle.connection_closed(connection_id)?;
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod debounce;
pub mod delivery;
pub mod error;
pub mod evaluator;
pub mod protocol;
pub mod registry;
pub mod service;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use cache::QueryCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, ModelOptions};
pub use debounce::{DebounceScheduler, PendingAction};
pub use delivery::{Connection, DeliveryChannel, MemoryConnection};
pub use error::{Result, StoreError, SyncError};
pub use protocol::{ClientRequest, ServerMessage, SubscribeMode};
pub use registry::{Changelog, Model, ModelRegistration, ModelRegistry};
pub use service::{SyncHandle, SyncService};
pub use store::{ChangeFeedHandle, ChangeSink, FeedEvent, MemoryStore, ModelStore, RawChange};
pub use subscriptions::{
    CollectionSubscription, EngineStats, EntitySubscription, Subscription,
    SubscriptionDescriptor, SubscriptionManager, SubscriptionTable,
};
pub use types::*;
