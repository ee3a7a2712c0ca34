use thiserror::Error;

use crate::ticket::TicketId;

/// Misuse of a reservation ticket. Raised synchronously, before anything is queued.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TicketError {
    #[error("reservation {ticket} already used")]
    AlreadyUsed { ticket: TicketId },
}

/// Errors delivered to the caller awaiting a ticket's completion.
#[derive(Error, Debug)]
pub enum CallError<E> {
    #[error("guarded operation failed: {0}")]
    Operation(E),

    #[error("reservation {ticket} was abandoned before it settled (guarded call panicked or its task was dropped)")]
    Abandoned { ticket: TicketId },
}

impl<E> CallError<E> {
    /// The guarded operation's own error, if that is what ended the call.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CallError::Operation(e) => Some(e),
            CallError::Abandoned { .. } => None,
        }
    }
}

/// Errors raised while attaching or detaching a queued entry point on a [`Host`](crate::Host).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    #[error("entry point not found: {0}")]
    EntryNotFound(String),

    #[error("entry point is already queued: {0}")]
    AlreadyAttached(String),

    #[error("entry point is not queued: {0}")]
    NotAttached(String),
}
