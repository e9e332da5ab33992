//! Session registry and dispatch operations.
//!
//! Single owner of the connection → session map. Every operation here runs
//! on the dispatcher task, never concurrently with another; backends only
//! ever receive work through their inbound queues.

use std::collections::HashMap;
use std::sync::Arc;

use tg_backend::{BackendContext, BackendRegistry, OutboundSender, TraderSession};
use tg_core::config::BrokerConfig;
use tg_core::types::{self, ReqLogin, AID_LOGIN};
use tg_ordermap::OrderMapRegistry;

use crate::lifecycle::LifecycleManager;

/// Identity of one client connection, assigned by the accept loop.
pub type ConnId = u64;

/// Per-connection state.
///
/// Holds at most one active backend at a time; a replaced backend is handed
/// to the lifecycle manager before the new one is attached. The last login
/// request is retained so a reset can rebuild the backend without the
/// client re-authenticating.
struct ClientSession {
    out: OutboundSender,
    backend: Option<Box<dyn TraderSession>>,
    last_login: Option<ReqLogin>,
}

/// Connection → session map plus everything needed to build backends.
pub struct SessionRegistry {
    sessions: HashMap<ConnId, ClientSession>,
    brokers: HashMap<String, BrokerConfig>,
    backends: Arc<BackendRegistry>,
    order_maps: Arc<OrderMapRegistry>,
    lifecycle: LifecycleManager,
    /// Prebuilt `rtn_brokers` frame, pushed to every new connection.
    broker_list_frame: String,
}

impl SessionRegistry {
    pub fn new(
        brokers: HashMap<String, BrokerConfig>,
        backends: Arc<BackendRegistry>,
        order_maps: Arc<OrderMapRegistry>,
    ) -> Self {
        let mut ids: Vec<&String> = brokers.keys().collect();
        ids.sort();
        let broker_list_frame = serde_json::json!({
            "aid": types::AID_BROKERS,
            "brokers": ids,
        })
        .to_string();

        Self {
            sessions: HashMap::new(),
            brokers,
            backends,
            order_maps,
            lifecycle: LifecycleManager::new(),
            broker_list_frame,
        }
    }

    /// A client connected: create an empty session and push the broker list.
    pub fn on_connection_open(&mut self, conn: ConnId, out: OutboundSender) {
        if out.send(self.broker_list_frame.clone()).is_err() {
            tracing::warn!(conn, "connection closed before broker list could be sent");
        }
        self.sessions.insert(
            conn,
            ClientSession {
                out,
                backend: None,
                last_login: None,
            },
        );
        tracing::info!(conn, "connection opened");
    }

    /// A connection closed: retire any attached backend and drop the session.
    pub fn on_connection_close(&mut self, conn: ConnId) {
        match self.sessions.remove(&conn) {
            Some(mut session) => {
                if let Some(backend) = session.backend.take() {
                    self.lifecycle.retire(backend);
                }
                tracing::info!(conn, "connection closed");
            }
            None => tracing::warn!(conn, "close event for unknown connection"),
        }
    }

    /// Route one inbound client message.
    ///
    /// Login messages attach (or replace) a backend; anything else is
    /// forwarded verbatim to the attached backend's inbound queue.
    /// Malformed messages and messages with no attached session are logged
    /// and dropped; the connection stays open either way.
    pub fn route_message(&mut self, conn: ConnId, raw: &str) {
        let msg: serde_json::Value = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(conn, error = %e, "dropping malformed client message");
                return;
            }
        };

        match types::action_id(&msg) {
            Some(AID_LOGIN) => {
                let req: ReqLogin = match serde_json::from_value(msg) {
                    Ok(req) => req,
                    Err(e) => {
                        tracing::warn!(conn, error = %e, "dropping malformed login request");
                        return;
                    }
                };
                self.attach_backend(conn, req);
            }
            Some(_) => match self.sessions.get(&conn) {
                Some(session) => match &session.backend {
                    Some(backend) => backend.enqueue(raw.to_string()),
                    None => {
                        tracing::debug!(conn, "dropping message for connection with no backend");
                    }
                },
                None => tracing::warn!(conn, "message for unknown connection"),
            },
            None => {
                tracing::warn!(conn, "dropping client message without action id");
            }
        }
    }

    /// Resolve the broker, build a backend of the configured type and attach
    /// it, replacing (and retiring) any previous backend for `conn`.
    ///
    /// Unknown broker id or backend type is a lookup error: logged, no
    /// state change.
    fn attach_backend(&mut self, conn: ConnId, mut req: ReqLogin) {
        let broker = match self.brokers.get(&req.bid) {
            Some(broker) => broker.clone(),
            None => {
                tracing::warn!(conn, bid = %req.bid, "login with unknown broker id");
                return;
            }
        };
        req.broker = Some(broker);

        let (out, old) = match self.sessions.get_mut(&conn) {
            Some(session) => (session.out.clone(), session.backend.take()),
            None => {
                tracing::warn!(conn, "login for unknown connection");
                return;
            }
        };
        if let Some(old) = old {
            tracing::info!(conn, "replacing attached backend on re-login");
            self.lifecycle.retire(old);
        }

        let backend = self.build_backend(out, req.clone());
        if let Some(session) = self.sessions.get_mut(&conn) {
            session.backend = backend;
            session.last_login = Some(req);
        }
    }

    /// Periodic sweep: rebuild any attached backend that reports itself
    /// unrecoverable, then release retired handles whose workers exited.
    ///
    /// The client connection is untouched throughout; the only client-visible
    /// effect of a reset is a brief gap in state updates.
    pub fn sweep(&mut self) {
        let reset_conns: Vec<ConnId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.backend.as_ref().map_or(false, |b| b.needs_reset()))
            .map(|(conn, _)| *conn)
            .collect();

        for conn in reset_conns {
            let (old, req, out) = match self.sessions.get_mut(&conn) {
                Some(session) => (
                    session.backend.take(),
                    session.last_login.clone(),
                    session.out.clone(),
                ),
                None => continue,
            };
            if let Some(old) = old {
                self.lifecycle.retire(old);
            }
            let Some(req) = req else {
                tracing::warn!(conn, "reset requested but no retained login; leaving unattached");
                continue;
            };
            tracing::info!(conn, bid = %req.bid, "rebuilding backend after reset request");
            let backend = self.build_backend(out, req);
            if let Some(session) = self.sessions.get_mut(&conn) {
                session.backend = backend;
            }
        }

        self.lifecycle.sweep();
    }

    /// Retire every attached backend and drop all sessions. Called once at
    /// shutdown, after the accept loop has stopped.
    pub fn shutdown(&mut self) {
        let conns: Vec<ConnId> = self.sessions.keys().copied().collect();
        for conn in conns {
            self.on_connection_close(conn);
        }
    }

    pub fn lifecycle(&mut self) -> &mut LifecycleManager {
        &mut self.lifecycle
    }

    /// Number of live client sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn build_backend(
        &self,
        out: OutboundSender,
        req: ReqLogin,
    ) -> Option<Box<dyn TraderSession>> {
        let broker_type = req
            .broker
            .as_ref()
            .map(|b| b.broker_type.clone())
            .unwrap_or_default();
        let ctx = BackendContext {
            out,
            order_maps: self.order_maps.clone(),
        };
        let mut backend = match self.backends.create(&broker_type, ctx) {
            Some(backend) => backend,
            None => {
                tracing::error!(
                    bid = %req.bid,
                    broker_type = %broker_type,
                    available = ?self.backends.available_backends(),
                    "broker configured with unregistered backend type"
                );
                return None;
            }
        };
        match backend.start(req) {
            Ok(()) => Some(backend),
            Err(e) => {
                tracing::error!(error = %e, "backend failed to start");
                None
            }
        }
    }

    #[cfg(test)]
    fn has_backend(&self, conn: ConnId) -> bool {
        self.sessions
            .get(&conn)
            .map_or(false, |s| s.backend.is_some())
    }
}
