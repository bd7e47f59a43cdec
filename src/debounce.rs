//! Per-subscription debounce timers.

use crate::protocol::ServerMessage;
use crate::types::SubscriptionId;
use std::collections::HashMap;
use std::time::Instant;

/// What runs when a subscription's quiet window elapses.
#[derive(Clone, Debug, PartialEq)]
pub enum PendingAction {
    /// Entity subscriptions: queued messages, in enqueue order.
    Deliver(Vec<ServerMessage>),
    /// Collection subscriptions: one re-evaluation, however many triggers.
    Evaluate,
}

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    action: PendingAction,
}

/// Coalesces bursts of triggers into one action per quiet window.
///
/// Every trigger restarts the subscription's window. The scheduler holds
/// deadlines only; the owner calls [`take_due`](Self::take_due) when
/// [`next_deadline`](Self::next_deadline) passes.
#[derive(Debug, Default)]
pub struct DebounceScheduler {
    pending: HashMap<SubscriptionId, Pending>,
}

impl DebounceScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a message and restart the window.
    pub fn schedule_delivery(
        &mut self,
        id: SubscriptionId,
        message: ServerMessage,
        deadline: Instant,
    ) {
        let pending = self.pending.entry(id).or_insert_with(|| Pending {
            deadline,
            action: PendingAction::Deliver(Vec::new()),
        });
        pending.deadline = deadline;
        if let PendingAction::Deliver(messages) = &mut pending.action {
            messages.push(message);
        } else {
            pending.action = PendingAction::Deliver(vec![message]);
        }
    }

    /// Request a re-evaluation and restart the window.
    pub fn schedule_evaluation(&mut self, id: SubscriptionId, deadline: Instant) {
        self.pending.insert(
            id,
            Pending {
                deadline,
                action: PendingAction::Evaluate,
            },
        );
    }

    /// Drop the timer and anything queued. Returns whether one was pending.
    pub fn cancel(&mut self, id: SubscriptionId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Remove and return every action whose deadline is at or before `now`,
    /// earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<(SubscriptionId, PendingAction)> {
        let mut due: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, p)| (p.deadline, *id))
            .collect();
        due.sort();

        due.into_iter()
            .filter_map(|(_, id)| self.pending.remove(&id).map(|p| (id, p.action)))
            .collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    pub fn is_pending(&self, id: SubscriptionId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
