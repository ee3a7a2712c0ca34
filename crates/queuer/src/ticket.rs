use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
    time::SystemTime,
};

use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch};
use tracing::warn;
use uuid::Uuid;

use crate::{
    errors::{CallError, TicketError},
    queue::Shared,
};

pub type TicketId = Uuid;

/// Lifecycle of a reservation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    /// Reserved, arguments not supplied yet.
    Pending,
    /// Called; waiting on earlier tickets or on the guarded operation.
    Running,
    /// The guarded operation finished, successfully or not.
    Settled,
}

/// Read-only view of a queued ticket, see [`ReservationQueue::snapshot`](crate::ReservationQueue::snapshot).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketSummary {
    pub ticket_id: TicketId,
    pub state: TicketState,
    pub reserved_at: SystemTime,
}

/// Queue-owned bookkeeping for one reservation.
pub(crate) struct TicketRecord {
    pub(crate) id: TicketId,
    pub(crate) reserved_at: SystemTime,
    state: Mutex<TicketState>,
    settled: watch::Sender<bool>,
}

impl TicketRecord {
    pub(crate) fn new(state: TicketState) -> Arc<Self> {
        let (settled, _) = watch::channel(false);
        Arc::new(Self {
            id: Uuid::new_v4(),
            reserved_at: SystemTime::now(),
            state: Mutex::new(state),
            settled,
        })
    }

    pub(crate) fn state(&self) -> TicketState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pending -> Running. Returns false (and changes nothing) for any other state.
    pub(crate) fn begin(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != TicketState::Pending {
            return false;
        }
        *state = TicketState::Running;
        true
    }

    pub(crate) fn mark_settled(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = TicketState::Settled;
    }

    /// Wake everything waiting in [`TicketRecord::settled`].
    pub(crate) fn notify_settled(&self) {
        self.settled.send_replace(true);
    }

    /// Resolves once the ticket has settled. Never fails.
    pub(crate) fn settled(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.settled.subscribe();
        async move {
            // an error here means the sender is gone, which only happens after settlement
            let _ = rx.wait_for(|done| *done).await;
        }
        .boxed()
    }

    pub(crate) fn summary(&self) -> TicketSummary {
        TicketSummary {
            ticket_id: self.id,
            state: self.state(),
            reserved_at: self.reserved_at,
        }
    }
}

/// A reserved turn in a [`ReservationQueue`](crate::ReservationQueue).
///
/// The ticket holds its place from `reserve()` until it settles. Dropping the handle
/// without calling it does not give the place back: every later ticket keeps waiting.
#[must_use = "an uncalled ticket blocks every ticket reserved after it"]
pub struct Ticket<S, A, T, E> {
    pub(crate) record: Arc<TicketRecord>,
    pub(crate) shared: Arc<Shared<S, A, T, E>>,
}

impl<S, A, T, E> Ticket<S, A, T, E>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn id(&self) -> TicketId {
        self.record.id
    }

    pub fn state(&self) -> TicketState {
        self.record.state()
    }

    /// Supply the arguments for this reservation.
    ///
    /// The guarded operation starts once every ticket reserved before this one has
    /// settled. The call is driven by a spawned task, so it makes progress even if the
    /// returned [`TicketCall`] is never polled. Must be called within a tokio runtime.
    ///
    /// A ticket can be called once; any further call returns
    /// [`TicketError::AlreadyUsed`] and leaves the queue untouched.
    pub fn call(&self, args: A) -> Result<TicketCall<T, E>, TicketError> {
        if !self.record.begin() {
            warn!("queue {}: reservation {} already used", self.shared.label, self.record.id);
            return Err(TicketError::AlreadyUsed { ticket: self.record.id });
        }
        Ok(self.shared.start(Arc::clone(&self.record), args))
    }

    /// Resolves once this ticket has settled, whatever the outcome.
    pub fn settled(&self) -> BoxFuture<'static, ()> {
        self.record.settled()
    }
}

impl<S, A, T, E> Clone for Ticket<S, A, T, E> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, A, T, E> std::fmt::Debug for Ticket<S, A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticket")
            .field("id", &self.record.id)
            .field("state", &self.record.state())
            .field("queue", &self.shared.label)
            .finish()
    }
}

/// Completion of a called ticket: the guarded operation's outcome, passed through as-is.
#[must_use = "the call runs regardless, but its result is only observable through this future"]
pub struct TicketCall<T, E> {
    pub(crate) ticket: TicketId,
    pub(crate) rx: oneshot::Receiver<Result<T, E>>,
}

impl<T, E> TicketCall<T, E> {
    pub fn ticket_id(&self) -> TicketId {
        self.ticket
    }
}

impl<T, E> std::fmt::Debug for TicketCall<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketCall").field("ticket", &self.ticket).finish()
    }
}

impl<T, E> Future for TicketCall<T, E> {
    type Output = Result<T, CallError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let ticket = self.ticket;
        self.rx.poll_unpin(cx).map(|received| match received {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CallError::Operation(e)),
            Err(_) => Err(CallError::Abandoned { ticket }),
        })
    }
}

/// RAII settlement for a running ticket: settles it and takes it out of the pending
/// sequence when dropped, whether the call finished, panicked or was torn down.
///
/// Order on drop: state becomes Settled, the ticket leaves the pending sequence, the
/// caller gets the outcome (or `Abandoned` if there is none), then waiters are woken.
pub(crate) struct SettleGuard<S, A, T, E> {
    pub(crate) record: Arc<TicketRecord>,
    pub(crate) shared: Arc<Shared<S, A, T, E>>,
    pub(crate) responder: Option<oneshot::Sender<Result<T, E>>>,
    pub(crate) outcome: Option<Result<T, E>>,
}

impl<S, A, T, E> Drop for SettleGuard<S, A, T, E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            warn!("queue {}: guarded call panicked, settling ticket {}", self.shared.label, self.record.id);
        }
        self.record.mark_settled();
        self.shared.remove(&self.record);

        // without an outcome the responder is just dropped, and the caller sees Abandoned
        if let (Some(tx), Some(outcome)) = (self.responder.take(), self.outcome.take()) {
            // receiver dropped means nobody is waiting for this result, which is fine
            let _ = tx.send(outcome);
        }

        self.record.notify_settled();
    }
}

// Unit tests for TicketRecord
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn begin_only_succeeds_from_pending() {
        let record = TicketRecord::new(TicketState::Pending);
        assert_eq!(record.state(), TicketState::Pending);

        assert!(record.begin());
        assert_eq!(record.state(), TicketState::Running);

        // a second begin is rejected and leaves the state alone
        assert!(!record.begin());
        assert_eq!(record.state(), TicketState::Running);

        record.mark_settled();
        assert!(!record.begin());
        assert_eq!(record.state(), TicketState::Settled);
    }

    #[test]
    fn records_get_distinct_ids() {
        let a = TicketRecord::new(TicketState::Pending);
        let b = TicketRecord::new(TicketState::Pending);
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn settled_waits_for_mark_settled() {
        let record = TicketRecord::new(TicketState::Running);
        let mut waiter = Box::pin(record.settled());

        let early = tokio::time::timeout(Duration::from_millis(20), &mut waiter).await;
        assert!(early.is_err(), "settled() resolved before the ticket settled");

        record.mark_settled();
        record.notify_settled();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("settled() should resolve after mark_settled");
    }

    #[tokio::test]
    async fn settled_after_the_fact_resolves_immediately() {
        let record = TicketRecord::new(TicketState::Running);
        record.mark_settled();
        record.notify_settled();
        assert!(record.settled().now_or_never().is_some());
    }

    #[test]
    fn summary_reflects_current_state() {
        let record = TicketRecord::new(TicketState::Pending);
        let summary = record.summary();
        assert_eq!(summary.ticket_id, record.id);
        assert_eq!(summary.state, TicketState::Pending);
        assert_eq!(summary.reserved_at, record.reserved_at);
    }
}
