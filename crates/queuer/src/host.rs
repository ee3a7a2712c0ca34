use std::sync::Arc;

use dashmap::DashMap;
use futures::{future::BoxFuture, FutureExt};
use tracing::info;

use crate::{
    errors::{CallError, HostError},
    queue::{Operation, ReservationQueue},
};

/// In-flight invocation of a host entry point.
pub type Invocation<T, E> = BoxFuture<'static, Result<T, CallError<E>>>;

/// What a host entry point is currently bound to.
pub enum Entry<S, A, T, E> {
    /// The operation itself; calls go straight through.
    Direct(Operation<S, A, T, E>),
    /// A reservation queue wrapping the original operation.
    Queued(ReservationQueue<S, A, T, E>),
}

impl<S, A, T, E> Clone for Entry<S, A, T, E> {
    fn clone(&self) -> Self {
        match self {
            Entry::Direct(op) => Entry::Direct(Arc::clone(op)),
            Entry::Queued(queue) => Entry::Queued(queue.clone()),
        }
    }
}

/// A scope object plus a table of named async entry points that share it.
///
/// Entry points can be swapped for a queued wrapper with [`Host::attach`] and back
/// with [`Host::detach`]. Callers going through [`Host::invoke`] pick up whichever
/// binding is current.
pub struct Host<S, A, T, E> {
    scope: Arc<S>,
    entries: Arc<DashMap<String, Entry<S, A, T, E>>>,
}

impl<S, A, T, E> Clone for Host<S, A, T, E> {
    fn clone(&self) -> Self {
        Self {
            scope: Arc::clone(&self.scope),
            entries: Arc::clone(&self.entries),
        }
    }
}

impl<S, A, T, E> Host<S, A, T, E>
where
    S: Send + Sync + 'static,
    A: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(scope: Arc<S>) -> Self {
        Self {
            scope,
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn scope(&self) -> &Arc<S> {
        &self.scope
    }

    /// Bind `name` to `op`, returning whatever was bound before.
    pub fn define(&self, name: impl Into<String>, op: Operation<S, A, T, E>) -> Option<Entry<S, A, T, E>> {
        self.entries.insert(name.into(), Entry::Direct(op))
    }

    pub fn entry(&self, name: &str) -> Option<Entry<S, A, T, E>> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    pub fn is_attached(&self, name: &str) -> bool {
        matches!(self.entry(name), Some(Entry::Queued(_)))
    }

    /// Call the entry point bound to `name`.
    ///
    /// The lookup (and, for a queued entry, the reservation) happens before this returns,
    /// so invocations are queued in the order `invoke` was called.
    pub fn invoke(&self, name: &str, args: A) -> Result<Invocation<T, E>, HostError> {
        let entry = self
            .entry(name)
            .ok_or_else(|| HostError::EntryNotFound(name.to_string()))?;

        Ok(match entry {
            Entry::Direct(op) => {
                let call = op(Arc::clone(&self.scope), args);
                async move { call.await.map_err(CallError::Operation) }.boxed()
            }
            Entry::Queued(queue) => queue.call(args).boxed(),
        })
    }

    /// Replace the entry point `name` with a reservation queue wrapping it.
    ///
    /// Returns the queue so callers can `reserve()` ahead of time; direct calls through
    /// the queue or through [`Host::invoke`] behave the same.
    pub fn attach(&self, name: &str) -> Result<ReservationQueue<S, A, T, E>, HostError> {
        let mut entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| HostError::EntryNotFound(name.to_string()))?;

        let original = match entry.value() {
            Entry::Direct(op) => Arc::clone(op),
            Entry::Queued(_) => return Err(HostError::AlreadyAttached(name.to_string())),
        };

        let queue = ReservationQueue::new(name, Arc::clone(&self.scope), original);
        *entry = Entry::Queued(queue.clone());

        info!("attached reservation queue to entry point {}", name);
        Ok(queue)
    }

    /// Restore the original entry point, returning it.
    ///
    /// Tickets still pending on the removed queue are left alone: the ones already called
    /// run to completion against the original operation.
    pub fn detach(&self, name: &str) -> Result<Operation<S, A, T, E>, HostError> {
        let mut entry = self
            .entries
            .get_mut(name)
            .ok_or_else(|| HostError::EntryNotFound(name.to_string()))?;

        let original = match entry.value() {
            Entry::Queued(queue) => {
                info!(
                    "detaching reservation queue from entry point {} ({} tickets pending)",
                    name,
                    queue.pending_len()
                );
                queue.original()
            }
            Entry::Direct(_) => return Err(HostError::NotAttached(name.to_string())),
        };

        *entry = Entry::Direct(Arc::clone(&original));
        Ok(original)
    }
}
