//! Serializes calls into an async function in the order callers *reserved* their turn,
//! not the order their arguments became available.
//!
//! ```no_run
//! # async fn demo() {
//! use std::sync::Arc;
//! use fn_queuer::{operation, ReservationQueue};
//!
//! let add = operation(|_: Arc<()>, (a, b): (i32, i32)| async move { Ok::<_, String>(a + b) });
//! let queue = ReservationQueue::new("add", Arc::new(()), add);
//!
//! let first = queue.reserve();
//! let second = queue.reserve();
//!
//! // called first, but runs second
//! let later = second.call((2, 3)).unwrap();
//! let sooner = first.call((1, 1)).unwrap();
//! assert_eq!(sooner.await.unwrap(), 2);
//! assert_eq!(later.await.unwrap(), 5);
//! # }
//! ```

mod barrier;
mod errors;
mod host;
mod queue;
mod ticket;

pub use barrier::JoinBarrier;
pub use errors::{CallError, HostError, TicketError};
pub use host::{Entry, Host, Invocation};
pub use queue::{operation, Operation, ReservationQueue};
pub use ticket::{Ticket, TicketCall, TicketId, TicketState, TicketSummary};
