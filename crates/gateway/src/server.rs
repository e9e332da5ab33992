//! WebSocket front door.
//!
//! Binds the listening socket, upgrades each connection, and splits it into
//! a reader task (client frames become dispatcher events) and a writer task
//! (drains the session's outbound channel). Neither task touches session
//! state directly.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_util::sync::CancellationToken;

use tg_backend::default_registry;
use tg_core::config::GatewayConfig;
use tg_ordermap::OrderMapRegistry;

use crate::event_loop::{dispatcher_loop, EventSender, GatewayEvent};
use crate::registry::{ConnId, SessionRegistry};

/// A running gateway: the bound address plus the handles needed to stop it.
pub struct Gateway {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    accept_task: tokio::task::JoinHandle<()>,
    dispatcher_task: tokio::task::JoinHandle<()>,
}

impl Gateway {
    /// Bind the configured address and start the accept loop, dispatcher
    /// and sweep ticker. Failing to bind is fatal.
    pub async fn start(config: GatewayConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let local_addr = listener.local_addr().context("listener address")?;
        tracing::info!(%local_addr, "gateway listening");

        let order_maps = Arc::new(OrderMapRegistry::new(config.gateway.data_dir.clone()));
        let registry = SessionRegistry::new(
            config.brokers.clone(),
            Arc::new(default_registry()),
            order_maps,
        );

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let dispatcher_task = tokio::spawn(dispatcher_loop(
            registry,
            event_rx,
            cancel.clone(),
            Duration::from_millis(config.gateway.shutdown_grace_ms),
        ));

        tokio::spawn(sweep_ticker(
            event_tx.clone(),
            Duration::from_secs(config.gateway.sweep_interval_secs),
            cancel.clone(),
        ));

        let ws_config = WebSocketConfig {
            max_message_size: Some(config.server.max_message_size),
            max_frame_size: Some(config.server.max_message_size),
            ..Default::default()
        };
        let accept_task = tokio::spawn(accept_loop(
            listener,
            ws_config,
            event_tx,
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            cancel,
            accept_task,
            dispatcher_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, retire all sessions, and wait for the drain.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.accept_task.await;
        let _ = self.dispatcher_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    ws_config: WebSocketConfig,
    events: EventSender,
    cancel: CancellationToken,
) {
    let next_conn = AtomicU64::new(1);
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };
        let conn = next_conn.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conn, %peer, "tcp connection accepted");
        tokio::spawn(serve_connection(
            stream,
            ws_config,
            conn,
            events.clone(),
            cancel.clone(),
        ));
    }
    tracing::info!("accept loop stopped");
}

/// Upgrade one TCP connection and pump it until either side closes.
async fn serve_connection(
    stream: TcpStream,
    ws_config: WebSocketConfig,
    conn: ConnId,
    events: EventSender,
    cancel: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async_with_config(stream, Some(ws_config)).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(conn, error = %e, "websocket handshake failed");
            return;
        }
    };
    let (mut sink, mut source) = ws.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    if events
        .send(GatewayEvent::Opened { conn, out: out_tx })
        .is_err()
    {
        // Dispatcher already gone; nothing to serve.
        return;
    }

    // Writer: drains frames the dispatcher and backend workers produce.
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if let Err(e) = sink.send(Message::Text(text)).await {
                tracing::debug!(conn, error = %e, "write failed, dropping outbound drain");
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: every text frame becomes a dispatcher event, in arrival order.
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => {
                if events.send(GatewayEvent::Message { conn, text }).is_err() {
                    break;
                }
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
            Some(Ok(Message::Binary(_))) => {
                tracing::debug!(conn, "ignoring binary frame");
            }
            Some(Err(e)) => {
                tracing::debug!(conn, error = %e, "read failed");
                break;
            }
        }
    }

    let _ = events.send(GatewayEvent::Closed { conn });
    writer.abort();
    tracing::debug!(conn, "connection task exiting");
}

/// Emits a `Sweep` event on a fixed cadence until cancelled.
async fn sweep_ticker(events: EventSender, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick completes immediately; skip it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if events.send(GatewayEvent::Sweep).is_err() {
                    break;
                }
            }
        }
    }
}
