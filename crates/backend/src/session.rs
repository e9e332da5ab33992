//! The Backend Session capability trait.
//!
//! A backend is a running connection to one trading venue, attached to
//! exactly one client connection at a time. It owns a worker thread that
//! consumes the inbound queue, talks to the venue, and emits outbound text
//! frames back to the originating connection through [`OutboundSender`].
//!
//! The gateway's dispatcher loop only ever calls the non-blocking side of
//! this contract; all venue I/O and sleeping happens on the worker.

use std::sync::Arc;

use anyhow::Result;

use tg_core::types::ReqLogin;
use tg_ordermap::OrderMapRegistry;

/// Channel end a backend writes outbound text frames to.
///
/// The receiving half is drained by the connection's writer task, so sending
/// is safe from the worker thread and never blocks.
pub type OutboundSender = tokio::sync::mpsc::UnboundedSender<String>;

/// Everything a backend needs at construction time.
pub struct BackendContext {
    /// Outbound frames to the owning client connection.
    pub out: OutboundSender,
    /// Shared per-user order-id maps.
    pub order_maps: Arc<OrderMapRegistry>,
}

/// A running trading connection to one venue.
///
/// # Contract
///
/// - [`start`](Self::start) begins worker execution asynchronously and never
///   blocks the caller. It is called exactly once, before any other method.
/// - [`enqueue`](Self::enqueue) accepts a client message for asynchronous
///   processing. Ordering is FIFO per session; the call never blocks.
/// - [`stop`](Self::stop) requests shutdown. Asynchronous, idempotent,
///   advisory: the worker must observe it and exit promptly once in-flight
///   work completes.
/// - [`is_finished`](Self::is_finished) is true once the worker has fully
///   exited and all backend resources are releasable.
/// - [`needs_reset`](Self::needs_reset) is true when the backend's venue
///   session state is unrecoverable and should be rebuilt from the retained
///   login request.
/// - [`join`](Self::join) reaps the worker thread. Callers invoke it only
///   after `is_finished()` has returned true, so it does not block.
pub trait TraderSession: Send {
    /// Begin worker execution with the resolved login request.
    fn start(&mut self, req: ReqLogin) -> Result<()>;

    /// Queue a client-originated message for the worker. Never blocks.
    fn enqueue(&self, raw: String);

    /// Request shutdown. Idempotent; never blocks.
    fn stop(&self);

    /// True once the worker has exited.
    fn is_finished(&self) -> bool;

    /// True when the session should be torn down and rebuilt.
    fn needs_reset(&self) -> bool;

    /// Reap the exited worker thread.
    fn join(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The dispatcher stores backends as trait objects.
    #[test]
    fn test_trader_session_is_object_safe() {
        fn _assert_object_safe(_s: &dyn TraderSession) {}
    }
}
