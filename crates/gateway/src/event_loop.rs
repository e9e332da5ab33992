//! Dispatcher event loop.
//!
//! All connection and session mutations flow through one task consuming a
//! single event queue, so registry operations never race each other. The
//! connection tasks in `server` only produce events and drain outbound
//! channels.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tg_backend::OutboundSender;

use crate::registry::{ConnId, SessionRegistry};

/// One unit of work for the dispatcher.
#[derive(Debug)]
pub enum GatewayEvent {
    /// A client connection was accepted; `out` feeds its writer task.
    Opened { conn: ConnId, out: OutboundSender },
    /// A text frame arrived from the client.
    Message { conn: ConnId, text: String },
    /// The connection's reader saw EOF, a close frame, or an error.
    Closed { conn: ConnId },
    /// Periodic tick: release finished backends, rebuild reset ones.
    Sweep,
}

pub type EventSender = mpsc::UnboundedSender<GatewayEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GatewayEvent>;

/// How often the shutdown drain re-checks the pending-removal set.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Run the dispatcher until cancellation, then retire every session and
/// wait up to `shutdown_grace` for backend workers to exit.
pub async fn dispatcher_loop(
    mut registry: SessionRegistry,
    mut events: EventReceiver,
    cancel: CancellationToken,
    shutdown_grace: Duration,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => handle_event(&mut registry, event),
                // All senders gone; nothing further can happen.
                None => break,
            },
        }
    }

    tracing::info!(
        sessions = registry.session_count(),
        "dispatcher stopping, retiring all sessions"
    );
    registry.shutdown();
    drain(&mut registry, shutdown_grace).await;
}

fn handle_event(registry: &mut SessionRegistry, event: GatewayEvent) {
    match event {
        GatewayEvent::Opened { conn, out } => registry.on_connection_open(conn, out),
        GatewayEvent::Message { conn, text } => registry.route_message(conn, &text),
        GatewayEvent::Closed { conn } => registry.on_connection_close(conn),
        GatewayEvent::Sweep => registry.sweep(),
    }
}

/// Sweep until the pending-removal set empties or the grace deadline passes.
/// Workers still alive at the deadline are abandoned, not blocked on.
async fn drain(registry: &mut SessionRegistry, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        registry.sweep();
        if registry.lifecycle().pending_count() == 0 {
            tracing::info!("all backend workers released");
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::error!(
                pending = registry.lifecycle().pending_count(),
                "shutdown grace expired, abandoning unfinished backend workers"
            );
            return;
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}
