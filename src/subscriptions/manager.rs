//! Subscription manager: registration, subscribe/unsubscribe and change fanout.

use crate::cache::QueryCache;
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, ModelOptions};
use crate::debounce::{DebounceScheduler, PendingAction};
use crate::delivery::{Connection, DeliveryChannel};
use crate::error::{Result, SyncError};
use crate::evaluator::{self, index_by_key};
use crate::protocol::{ClientRequest, ServerMessage, SubscribeMode};
use crate::registry::{Model, ModelRegistry};
use crate::store::{FeedEvent, ModelStore, RawChange};
use crate::types::{
    CollectionQuery, ConnectionId, EntityKey, Scope, Sequence, SubscriptionId,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::table::SubscriptionTable;
use super::types::{
    CollectionSubscription, EntitySubscription, Subscription, SubscriptionDescriptor,
};

/// Counters describing the engine's current load.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Registered models.
    pub models: usize,
    /// Live subscriptions.
    pub subscriptions: usize,
    /// Connections holding at least one subscription.
    pub connections: usize,
    /// Debounce timers not yet fired.
    pub pending_debounce: usize,
    /// Cached collection query results.
    pub cached_queries: usize,
    /// Changes versioned and fanned out.
    pub dispatched_changes: u64,
    /// Messages written to open connections.
    pub delivered_messages: u64,
    /// Messages skipped for closed connections or failed encoding.
    pub dropped_messages: u64,
    /// Collection evaluations attempted.
    pub evaluations: u64,
    /// Collection evaluations that failed.
    pub evaluation_failures: u64,
}

/// Owns every model registration and live subscription.
///
/// All state is single-owner: the manager is driven through `&mut self` from
/// one thread (see [`SyncService`](crate::SyncService) for a threaded host).
/// Store notifications queue up in a channel until [`pump`](Self::pump)
/// dispatches them; debounce timers fire from [`run_due`](Self::run_due).
pub struct SubscriptionManager {
    /// Engine-wide settings and default model options.
    config: EngineConfig,
    /// Time source for debounce deadlines, cache TTLs and versions.
    clock: Arc<dyn Clock>,
    /// Registered models by wire name.
    registry: ModelRegistry,
    /// Active subscriptions by ID.
    table: SubscriptionTable,
    /// Pending debounce timers.
    debounce: DebounceScheduler,
    /// Recent collection query results.
    cache: QueryCache,
    /// Outbound message writer.
    delivery: DeliveryChannel,
    /// Handed to each store's change feed on registration.
    feed_sender: Sender<FeedEvent>,
    /// Store notifications waiting for `pump`.
    feed_receiver: Receiver<FeedEvent>,
    /// Changes versioned since creation.
    dispatched_changes: u64,
    /// Collection evaluations attempted.
    evaluations: u64,
    /// Collection evaluations that failed.
    evaluation_failures: u64,
}

impl SubscriptionManager {
    /// Create a manager running on the system clock.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a manager driven by `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let (feed_sender, feed_receiver) = unbounded();
        let cache = QueryCache::new(config.query_cache_capacity);
        Self {
            config,
            clock,
            registry: ModelRegistry::new(),
            table: SubscriptionTable::new(),
            debounce: DebounceScheduler::new(),
            cache,
            delivery: DeliveryChannel::new(),
            feed_sender,
            feed_receiver,
            dispatched_changes: 0,
            evaluations: 0,
            evaluation_failures: 0,
        }
    }

    // --- Registration ---

    /// Register model `name` for the Rust type `T`.
    ///
    /// Re-registering the same type is a no-op returning `Ok(false)`; binding
    /// the name to another type fails with `RegistrationConflict`.
    pub fn register<T: 'static>(
        &mut self,
        name: &str,
        primary_key: &str,
        store: Arc<dyn ModelStore>,
        options: ModelOptions,
    ) -> Result<bool> {
        self.registry
            .register::<T>(name, primary_key, store, options, &self.feed_sender)
    }

    /// Register a [`Model`] with the configured default options.
    pub fn register_model<M: Model>(&mut self, store: Arc<dyn ModelStore>) -> Result<bool> {
        let options = self.config.default_options.clone();
        self.register_model_with::<M>(store, options)
    }

    /// Register a [`Model`] with explicit options.
    pub fn register_model_with<M: Model>(
        &mut self,
        store: Arc<dyn ModelStore>,
        options: ModelOptions,
    ) -> Result<bool> {
        self.register::<M>(M::NAME, M::PRIMARY_KEY, store, options)
    }

    // --- Requests ---

    /// Parse and execute one request, answering errors on `connection`.
    pub fn handle_text(
        &mut self,
        connection: &Arc<dyn Connection>,
        scope: Scope,
        text: &str,
    ) -> Option<SubscriptionDescriptor> {
        match ClientRequest::parse(text) {
            Ok(request) => self.handle_request(connection, scope, request),
            Err(e) => {
                let request_id = ClientRequest::salvage_request_id(text).unwrap_or_default();
                debug!(connection = ?connection.id(), error = %e, "rejecting malformed request");
                self.delivery
                    .send(connection.as_ref(), &ServerMessage::error(request_id, &e));
                None
            }
        }
    }

    /// Execute one request. Subscribe failures become a `subscription-error`.
    pub fn handle_request(
        &mut self,
        connection: &Arc<dyn Connection>,
        scope: Scope,
        request: ClientRequest,
    ) -> Option<SubscriptionDescriptor> {
        match request {
            ClientRequest::SubscribeEntity {
                request_id,
                model,
                key,
                last_seq,
            } => {
                let result =
                    self.subscribe_entity(connection, scope, &request_id, &model, key, last_seq);
                self.report(connection, &request_id, result)
            }
            ClientRequest::SubscribeCollection {
                request_id,
                model,
                filter,
                top,
                skip,
                order,
            } => {
                let query = ClientRequest::collection_query(filter, top, skip, order);
                let result =
                    self.subscribe_collection(connection, scope, &request_id, &model, query);
                self.report(connection, &request_id, result)
            }
            ClientRequest::Unsubscribe { subscription_id } => {
                let owned = self
                    .table
                    .get(subscription_id)
                    .map_or(false, |sub| sub.connection_id() == connection.id());
                if owned {
                    self.unsubscribe(subscription_id);
                } else {
                    debug!(
                        connection = ?connection.id(),
                        subscription = %subscription_id,
                        "ignoring unsubscribe for a subscription the connection does not own"
                    );
                }
                None
            }
        }
    }

    fn report(
        &mut self,
        connection: &Arc<dyn Connection>,
        request_id: &str,
        result: Result<SubscriptionDescriptor>,
    ) -> Option<SubscriptionDescriptor> {
        match result {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!(request_id, error = %e, "subscribe failed");
                self.delivery
                    .send(connection.as_ref(), &ServerMessage::error(request_id, &e));
                None
            }
        }
    }

    /// Subscribe to one entity.
    ///
    /// When `last_seq` is given and the changelog reaches back to
    /// `last_seq + 1`, only the missed changes for `key` are sent (delta);
    /// otherwise the entity is fetched and sent whole (snapshot).
    pub fn subscribe_entity(
        &mut self,
        connection: &Arc<dyn Connection>,
        scope: Scope,
        request_id: &str,
        model: &str,
        key: EntityKey,
        last_seq: Option<Sequence>,
    ) -> Result<SubscriptionDescriptor> {
        let registration = self
            .registry
            .get(model)
            .ok_or_else(|| SyncError::UnknownModel(model.to_string()))?;
        let changelog = registration.changelog();

        let delta = last_seq
            .filter(|seq| changelog.covers(*seq))
            .map(|seq| changelog.since_for_key(seq, &key, registration.primary_key()));

        let (mode, data, changes) = match delta {
            Some(changes) => (SubscribeMode::Delta, None, Some(changes)),
            None => {
                let entity = registration.store().get(&scope, &key)?;
                let data = entity.map(Value::Object).unwrap_or(Value::Null);
                (SubscribeMode::Snapshot, Some(data), None)
            }
        };

        let version = registration.version_at(self.clock.timestamp());
        let model = registration.shared_name();
        let id = self.table.next_id();

        self.table.insert(Subscription::Entity(EntitySubscription {
            id,
            connection: Arc::clone(connection),
            scope,
            model: Arc::clone(&model),
            key,
            last_delivered_seq: version.seq,
        }));
        debug!(subscription = %id, model = %model, ?mode, "entity subscription created");

        self.delivery.send(
            connection.as_ref(),
            &ServerMessage::Subscribed {
                request_id: request_id.to_string(),
                subscription_id: id,
                model: model.to_string(),
                mode,
                data,
                changes,
                primary_key: None,
                version,
            },
        );

        Ok(SubscriptionDescriptor {
            id,
            model: model.to_string(),
            mode,
            version,
        })
    }

    /// Subscribe to a collection query. Always answered with a snapshot.
    pub fn subscribe_collection(
        &mut self,
        connection: &Arc<dyn Connection>,
        scope: Scope,
        request_id: &str,
        model: &str,
        query: CollectionQuery,
    ) -> Result<SubscriptionDescriptor> {
        let registration = self
            .registry
            .get(model)
            .ok_or_else(|| SyncError::UnknownModel(model.to_string()))?;

        let rows = registration.store().find(&scope, &query)?;
        let primary_key = registration.primary_key().to_string();
        let observed = index_by_key(&rows, &primary_key);

        let version = registration.version_at(self.clock.timestamp());
        let model = registration.shared_name();
        let id = self.table.next_id();

        self.table.insert(Subscription::Collection(CollectionSubscription {
            id,
            connection: Arc::clone(connection),
            scope,
            model: Arc::clone(&model),
            query,
            last_delivered_seq: version.seq,
            observed,
        }));
        debug!(subscription = %id, model = %model, rows = rows.len(), "collection subscription created");

        self.delivery.send(
            connection.as_ref(),
            &ServerMessage::Subscribed {
                request_id: request_id.to_string(),
                subscription_id: id,
                model: model.to_string(),
                mode: SubscribeMode::Snapshot,
                data: Some(Value::Array(rows.into_iter().map(Value::Object).collect())),
                changes: None,
                primary_key: Some(primary_key),
                version,
            },
        );

        Ok(SubscriptionDescriptor {
            id,
            model: model.to_string(),
            mode: SubscribeMode::Snapshot,
            version,
        })
    }

    /// Tear down one subscription, its pending timer and its cached query.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let subscription = match self.table.remove(id) {
            Some(subscription) => subscription,
            None => return false,
        };
        self.debounce.cancel(id);
        self.cache.evict(id);

        debug!(subscription = %id, model = %subscription.model(), "unsubscribed");
        true
    }

    /// Tear down every subscription owned by a closed connection.
    pub fn close_connection(&mut self, connection: ConnectionId) -> usize {
        let ids = self.table.ids_for_connection(connection);
        let removed = ids.into_iter().filter(|id| self.unsubscribe(*id)).count();
        debug!(?connection, removed, "connection closed");
        removed
    }

    // --- Change Dispatch ---

    /// Dispatch every store notification queued since the last call.
    pub fn pump(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.feed_receiver.try_recv() {
            self.dispatch(&event.model, event.change);
            handled += 1;
        }
        handled
    }

    /// Version, log and fan out one raw change.
    ///
    /// Changes for unregistered models are ignored.
    pub fn dispatch(&mut self, model: &str, change: RawChange) {
        let timestamp = self.clock.timestamp();
        let registration = match self.registry.get_mut(model) {
            Some(registration) => registration,
            None => {
                trace!(model, "ignoring change for unregistered model");
                return;
            }
        };

        let entry = registration.record(change, timestamp);
        let key = entry.key(registration.primary_key());
        let window = registration.options().debounce;
        self.dispatched_changes += 1;
        trace!(model, seq = entry.seq().0, "dispatching change");

        for id in self.table.ids_for_model(model) {
            let is_collection = match self.table.get(id) {
                Some(Subscription::Entity(sub)) if key.as_ref() == Some(&sub.key) => false,
                Some(Subscription::Collection(_)) => true,
                _ => continue,
            };

            if is_collection {
                self.trigger_evaluation(id, window);
            } else {
                self.deliver(id, ServerMessage::from_change(id, &entry), window);
            }
        }
    }

    fn deliver(&mut self, id: SubscriptionId, message: ServerMessage, window: Duration) {
        if window.is_zero() {
            self.flush_entity(id, vec![message]);
        } else {
            let deadline = self.clock.now() + window;
            self.debounce.schedule_delivery(id, message, deadline);
        }
    }

    fn flush_entity(&mut self, id: SubscriptionId, messages: Vec<ServerMessage>) {
        let sub = match self.table.get_mut(id) {
            Some(Subscription::Entity(sub)) => sub,
            _ => return,
        };

        for message in &messages {
            self.delivery.send(sub.connection.as_ref(), message);
        }
        if let Some(version) = messages.last().and_then(ServerMessage::version) {
            sub.last_delivered_seq = version.seq;
        }
    }

    fn trigger_evaluation(&mut self, id: SubscriptionId, window: Duration) {
        if window.is_zero() {
            self.run_evaluation(id);
        } else {
            let deadline = self.clock.now() + window;
            self.debounce.schedule_evaluation(id, deadline);
        }
    }

    /// Evaluate and log failures. The observed set is left untouched on
    /// failure, so the next successful evaluation reconciles in full.
    fn run_evaluation(&mut self, id: SubscriptionId) -> usize {
        match self.evaluate(id) {
            Ok(sent) => sent,
            Err(e) => {
                self.evaluation_failures += 1;
                warn!(subscription = %id, error = %e, "collection evaluation failed");
                0
            }
        }
    }

    /// Re-run a collection subscription's query and send the diff against
    /// what the subscriber last observed. Returns the number of messages.
    ///
    /// A no-op for ids that are gone or are not collection subscriptions.
    pub fn evaluate(&mut self, id: SubscriptionId) -> Result<usize> {
        let (model, scope, query) = match self.table.get(id) {
            Some(Subscription::Collection(sub)) => {
                (Arc::clone(&sub.model), sub.scope.clone(), sub.query.clone())
            }
            _ => return Ok(0),
        };
        let registration = self
            .registry
            .get(&model)
            .ok_or_else(|| SyncError::UnknownModel(model.to_string()))?;

        let store = Arc::clone(registration.store());
        let ttl = registration.options().query_cache_ttl;
        self.evaluations += 1;

        let rows = self
            .cache
            .get_or_fetch(id, ttl, self.clock.now(), || store.find(&scope, &query))?;
        let fresh = index_by_key(&rows, registration.primary_key());
        let version = registration.version_at(self.clock.timestamp());

        // Re-check: the subscription may have been removed while querying.
        let sub = match self.table.get_mut(id) {
            Some(Subscription::Collection(sub)) => sub,
            _ => return Ok(0),
        };

        let messages = evaluator::diff(id, &sub.observed, &fresh, version);
        sub.observed = fresh;
        sub.last_delivered_seq = version.seq;

        for message in &messages {
            self.delivery.send(sub.connection.as_ref(), message);
        }
        trace!(subscription = %id, messages = messages.len(), "collection evaluated");
        Ok(messages.len())
    }

    // --- Timers ---

    /// Fire every debounce timer whose window has elapsed.
    pub fn run_due(&mut self) -> usize {
        let due = self.debounce.take_due(self.clock.now());
        let fired = due.len();

        for (id, action) in due {
            match action {
                PendingAction::Deliver(messages) => self.flush_entity(id, messages),
                PendingAction::Evaluate => {
                    self.run_evaluation(id);
                }
            }
        }
        fired
    }

    /// Earliest pending debounce deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.debounce.next_deadline()
    }

    /// Time left until the earliest debounce timer fires.
    pub fn time_until_next_deadline(&self) -> Option<Duration> {
        self.next_deadline()
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }

    // --- Lifecycle ---

    /// Drop every subscription and release every model's change feed.
    pub fn dispose(&mut self) {
        for id in self.table.ids() {
            self.unsubscribe(id);
        }
        self.registry.dispose();
        debug!("subscription manager disposed");
    }

    // --- Introspection ---

    /// Receiver side of the store notification channel.
    pub fn feed_receiver(&self) -> Receiver<FeedEvent> {
        self.feed_receiver.clone()
    }

    /// Look up a live subscription.
    pub fn subscription(&self, id: SubscriptionId) -> Option<&Subscription> {
        self.table.get(id)
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.table.len()
    }

    /// Subscriptions owned by `connection`.
    pub fn subscriptions_for_connection(&self, connection: ConnectionId) -> Vec<SubscriptionId> {
        self.table.ids_for_connection(connection)
    }

    /// Whether a debounce timer is pending for `id`.
    pub fn has_pending_debounce(&self, id: SubscriptionId) -> bool {
        self.debounce.is_pending(id)
    }

    /// Whether a query result is cached for `id`.
    pub fn has_cached_query(&self, id: SubscriptionId) -> bool {
        self.cache.contains(id)
    }

    /// Latest sequence stamped for `model`.
    pub fn current_seq(&self, model: &str) -> Option<Sequence> {
        self.registry.get(model).map(|r| r.current_seq())
    }

    /// Number of changelog entries retained for `model`.
    pub fn changelog_len(&self, model: &str) -> Option<usize> {
        self.registry.get(model).map(|r| r.changelog().len())
    }

    /// Snapshot of the engine's counters.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            models: self.registry.len(),
            subscriptions: self.table.len(),
            connections: self.table.connection_count(),
            pending_debounce: self.debounce.len(),
            cached_queries: self.cache.len(),
            dispatched_changes: self.dispatched_changes,
            delivered_messages: self.delivery.delivered(),
            dropped_messages: self.delivery.dropped(),
            evaluations: self.evaluations,
            evaluation_failures: self.evaluation_failures,
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
