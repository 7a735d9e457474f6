//! Correlation bookkeeping for the outbound side of a router.
//!
//! Every request gets its own slot: a `watch` channel that starts empty
//! and is written exactly once when the request settles. Waiters hold a
//! receiver for the slot of the request they started waiting on, so a
//! later request can never hand them its reply.
//!
//! There is no locking here; the router keeps the state behind a single
//! mutex.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::time::Instant;

use crate::outcome::ReplyOutcome;

/// Process-wide source of correlation ids. Starts at 1, never reused.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate the next correlation id.
pub(crate) fn next_request_id() -> u64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Deadline for a timeout in seconds measured from `now`.
/// Zero or negative means no deadline.
pub(crate) fn deadline_after(now: Instant, timeout_secs: i64) -> Option<Instant> {
    u64::try_from(timeout_secs)
        .ok()
        .filter(|secs| *secs > 0)
        .map(|secs| now + Duration::from_secs(secs))
}

/// The most recent request and its settle channel.
#[derive(Debug)]
struct Slot {
    id: u64,
    deadline: Option<Instant>,
    outcome: watch::Sender<Option<ReplyOutcome>>,
}

impl Slot {
    fn is_settled(&self) -> bool {
        self.outcome.borrow().is_some()
    }
}

/// A waiter's handle on one request.
#[derive(Debug)]
pub(crate) struct Ticket {
    pub(crate) id: u64,
    /// Deadline set by the request itself.
    pub(crate) deadline: Option<Instant>,
    outcome: watch::Receiver<Option<ReplyOutcome>>,
}

impl Ticket {
    /// Wait until this ticket's request settles. A request that was
    /// abandoned before it settled reads as cancelled.
    pub(crate) async fn settled(&mut self) -> ReplyOutcome {
        self.outcome
            .wait_for(|outcome| outcome.is_some())
            .await
            .ok()
            .and_then(|outcome| outcome.as_ref().cloned())
            .unwrap_or(ReplyOutcome::Cancelled)
    }

    /// The outcome if the request has already settled.
    pub(crate) fn current(&self) -> Option<ReplyOutcome> {
        self.outcome.borrow().as_ref().cloned()
    }
}

#[derive(Debug, Default)]
pub(crate) struct CorrelationState {
    slot: Option<Slot>,
    timeout_secs: i64,
    received_at: Option<Instant>,
    reply_ready_gate: Option<Arc<Semaphore>>,
}

impl CorrelationState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// The id still awaiting a reply, if any.
    pub(crate) fn pending_id(&self) -> Option<u64> {
        self.slot
            .as_ref()
            .filter(|slot| !slot.is_settled())
            .map(|slot| slot.id)
    }

    pub(crate) fn timeout_secs(&self) -> i64 {
        self.timeout_secs
    }

    pub(crate) fn received_at(&self) -> Option<Instant> {
        self.received_at
    }

    pub(crate) fn set_reply_ready_gate(&mut self, gate: Option<Arc<Semaphore>>) {
        self.reply_ready_gate = gate;
    }

    /// Start awaiting `id`, replacing the previous slot. Waiters on the
    /// previous request keep their own receiver and its outcome.
    ///
    /// Callers must check [`pending_id`](Self::pending_id) first.
    pub(crate) fn begin(&mut self, id: u64, timeout_secs: i64, now: Instant) {
        debug_assert!(self.pending_id().is_none());
        self.timeout_secs = timeout_secs;
        let (outcome, _) = watch::channel(None);
        self.slot = Some(Slot {
            id,
            deadline: deadline_after(now, timeout_secs),
            outcome,
        });
    }

    /// Forget `id` without settling, used when it never reached the wire.
    pub(crate) fn abandon(&mut self, id: u64) {
        if self.pending_id() == Some(id) {
            self.slot = None;
        }
    }

    /// A handle on the most recent request, settled or not.
    pub(crate) fn ticket(&self) -> Option<Ticket> {
        self.slot.as_ref().map(|slot| Ticket {
            id: slot.id,
            deadline: slot.deadline,
            outcome: slot.outcome.subscribe(),
        })
    }

    /// Settle `id` with a reply. Returns `false` for stale, duplicate or
    /// unexpected replies, which change nothing.
    pub(crate) fn resolve(&mut self, id: u64, payload: String, now: Instant) -> bool {
        if !self.settle(id, ReplyOutcome::Resolved(payload)) {
            return false;
        }
        self.received_at = Some(now);
        self.release_reply_ready_gate();
        true
    }

    /// Settle the pending request as cancelled. Returns its id, if any.
    pub(crate) fn cancel(&mut self) -> Option<u64> {
        let id = self.pending_id()?;
        self.settle(id, ReplyOutcome::Cancelled);
        self.release_reply_ready_gate();
        Some(id)
    }

    /// A waiter's timer for `id` fired. Returns `true` if that timed the
    /// request out; `false` if it had already settled.
    pub(crate) fn expire(&mut self, id: u64) -> bool {
        self.settle(id, ReplyOutcome::TimedOut)
    }

    /// Tickets still held on the most recent request.
    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.slot
            .as_ref()
            .map_or(0, |slot| slot.outcome.receiver_count())
    }

    fn settle(&mut self, id: u64, outcome: ReplyOutcome) -> bool {
        match &self.slot {
            Some(slot) if slot.id == id && !slot.is_settled() => {
                slot.outcome.send_replace(Some(outcome));
                true
            }
            _ => false,
        }
    }

    fn release_reply_ready_gate(&self) {
        if let Some(gate) = &self.reply_ready_gate {
            gate.add_permits(1);
        }
    }
}
