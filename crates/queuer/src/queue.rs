use std::{
    collections::VecDeque,
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use futures::{future::BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tracing::debug;

use crate::{
    barrier::JoinBarrier,
    ticket::{SettleGuard, Ticket, TicketCall, TicketRecord, TicketState, TicketSummary},
};

/// The guarded operation: called with the queue's scope and one ticket's arguments.
pub type Operation<S, A, T, E> =
    Arc<dyn Fn(Arc<S>, A) -> BoxFuture<'static, Result<T, E>> + Send + Sync>;

/// Box an async closure into an [`Operation`].
pub fn operation<S, A, T, E, F, Fut>(f: F) -> Operation<S, A, T, E>
where
    F: Fn(Arc<S>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    Arc::new(move |scope, args| f(scope, args).boxed())
}

pub(crate) struct Shared<S, A, T, E> {
    pub(crate) label: String,
    scope: Arc<S>,
    operation: Operation<S, A, T, E>,
    pending: Mutex<VecDeque<Arc<TicketRecord>>>,
}

impl<S, A, T, E> Shared<S, A, T, E> {
    fn pending(&self) -> MutexGuard<'_, VecDeque<Arc<TicketRecord>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enqueue(&self, state: TicketState) -> Arc<TicketRecord> {
        let record = TicketRecord::new(state);
        let depth = {
            let mut q = self.pending();
            q.push_back(Arc::clone(&record));
            q.len()
        };
        debug!("queue {}: reserved ticket {} (depth {})", self.label, record.id, depth);
        record
    }

    /// Every pending ticket ahead of `record` right now.
    fn predecessors(&self, record: &Arc<TicketRecord>) -> Vec<Arc<TicketRecord>> {
        self.pending()
            .iter()
            .take_while(|r| !Arc::ptr_eq(r, record))
            .cloned()
            .collect()
    }

    /// Drop a settled ticket from the pending sequence. Returns how many remain.
    pub(crate) fn remove(&self, record: &Arc<TicketRecord>) -> usize {
        let mut q = self.pending();
        if let Some(pos) = q.iter().position(|r| Arc::ptr_eq(r, record)) {
            q.remove(pos);
        }
        debug!("queue {}: ticket {} settled, {} remaining", self.label, record.id, q.len());
        q.len()
    }
}

impl<S, A, T, E> Shared<S, A, T, E>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// Run a ticket that has just entered the Running state.
    pub(crate) fn start(self: &Arc<Self>, record: Arc<TicketRecord>, args: A) -> TicketCall<T, E> {
        let ahead = self.predecessors(&record);
        let barrier = JoinBarrier::new(ahead.iter().map(|r| r.settled()));
        debug!("queue {}: ticket {} called, {} ahead", self.label, record.id, barrier.len());

        let (tx, rx) = oneshot::channel();
        let ticket = record.id;
        let guard = SettleGuard {
            record,
            shared: Arc::clone(self),
            responder: Some(tx),
            outcome: None,
        };

        tokio::spawn(async move {
            // settles the ticket on every exit path, including a panic in the guarded call;
            // the outcome is only delivered once the ticket has left the pending sequence
            let mut guard = guard;
            barrier.await;

            debug!("queue {}: running guarded call for ticket {}", guard.shared.label, guard.record.id);
            let outcome = (guard.shared.operation)(Arc::clone(&guard.shared.scope), args).await;
            guard.outcome = Some(outcome);
        });

        TicketCall { ticket, rx }
    }
}

/// Serializes calls into one guarded operation in reservation order.
///
/// `reserve()` takes a place in line immediately; the ticket is called later with its
/// arguments. A called ticket's operation starts only after every ticket reserved
/// before it has settled, whatever order the tickets were called in.
pub struct ReservationQueue<S, A, T, E> {
    shared: Arc<Shared<S, A, T, E>>,
}

impl<S, A, T, E> ReservationQueue<S, A, T, E>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    /// `label` only shows up in log output.
    pub fn new(label: impl Into<String>, scope: Arc<S>, operation: Operation<S, A, T, E>) -> Self {
        Self {
            shared: Arc::new(Shared {
                label: label.into(),
                scope,
                operation,
                pending: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Take the next place in line.
    pub fn reserve(&self) -> Ticket<S, A, T, E> {
        Ticket {
            record: self.shared.enqueue(TicketState::Pending),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Reserve and call in one step.
    ///
    /// The ticket enters the queue already running, so other callers never see it unused.
    /// Direct calls are ordered by the moment this method is invoked.
    pub fn call(&self, args: A) -> TicketCall<T, E> {
        let record = self.shared.enqueue(TicketState::Running);
        self.shared.start(record, args)
    }

    /// The wrapped operation, unqueued.
    pub fn original(&self) -> Operation<S, A, T, E> {
        Arc::clone(&self.shared.operation)
    }

    pub fn scope(&self) -> &Arc<S> {
        &self.shared.scope
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    /// Number of tickets that have not settled yet.
    pub fn pending_len(&self) -> usize {
        self.shared.pending().len()
    }

    /// Unsettled tickets in reservation order.
    pub fn snapshot(&self) -> Vec<TicketSummary> {
        self.shared.pending().iter().map(|r| r.summary()).collect()
    }
}

impl<S, A, T, E> Clone for ReservationQueue<S, A, T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, A, T, E> std::fmt::Debug for ReservationQueue<S, A, T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReservationQueue")
            .field("label", &self.shared.label)
            .field("pending", &self.shared.pending().len())
            .finish()
    }
}
