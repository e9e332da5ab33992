//! Simulated venue backend.
//!
//! Accepts orders against no market: limit orders rest until cancelled,
//! market orders fill instantly at their stated price. Account and position
//! state is kept in the worker and pushed to the client as a consolidated
//! `rtn_data` document on the refresh scheduler's send cadence.
//!
//! The worker is a dedicated OS thread consuming the inbound queue with a
//! short receive timeout so stop requests and deadlines are observed
//! promptly.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tg_core::types::{current_trading_day, ReqLogin};
use tg_ordermap::{LocalOrderKey, OrderIdMap, RemoteOrderKey};

use crate::scheduler::{RefreshFlags, RefreshKind, RefreshScheduler};
use crate::session::{BackendContext, OutboundSender, TraderSession};

/// Exchange identifier the simulated venue stamps on remote order keys.
const SIM_EXCHANGE_ID: &str = "SIM";

/// Worker poll granularity; bounds stop-request latency.
const POLL_TIMEOUT: Duration = Duration::from_millis(10);

/// Opening balance of a fresh simulated account.
const INITIAL_BALANCE: f64 = 1_000_000.0;

struct SimShared {
    stop: AtomicBool,
    finished: AtomicBool,
    reset_needed: AtomicBool,
    flags: RefreshFlags,
}

/// Simulated venue backend session.
pub struct SimSession {
    shared: Arc<SimShared>,
    in_tx: Sender<String>,
    in_rx: Option<Receiver<String>>,
    ctx: BackendContext,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl SimSession {
    /// Create an unstarted session.
    pub fn new(ctx: BackendContext) -> Self {
        let (in_tx, in_rx) = crossbeam::channel::unbounded();
        Self {
            shared: Arc::new(SimShared {
                stop: AtomicBool::new(false),
                finished: AtomicBool::new(false),
                reset_needed: AtomicBool::new(false),
                flags: RefreshFlags::default(),
            }),
            in_tx,
            in_rx: Some(in_rx),
            ctx,
            worker: None,
        }
    }

    /// Mark the venue session unrecoverable so the next sweep rebuilds it.
    pub fn force_reset(&self) {
        self.shared.reset_needed.store(true, Ordering::Release);
    }
}

impl TraderSession for SimSession {
    fn start(&mut self, req: ReqLogin) -> Result<()> {
        let rx = self.in_rx.take().context("sim session already started")?;
        let trading_day = current_trading_day();
        let map = self
            .ctx
            .order_maps
            .get_or_create(&req.user_name, &trading_day);

        let mut worker = SimWorker {
            shared: self.shared.clone(),
            rx,
            out: self.ctx.out.clone(),
            map,
            req,
            trading_day,
            scheduler: RefreshScheduler::with_defaults(),
            balance: INITIAL_BALANCE,
            positions: HashMap::new(),
            orders: Vec::new(),
            snapshot: serde_json::Map::new(),
        };

        let handle = std::thread::Builder::new()
            .name("sim-worker".into())
            .spawn(move || worker.run())
            .context("failed to spawn sim worker thread")?;
        self.worker = Some(handle);
        Ok(())
    }

    fn enqueue(&self, raw: String) {
        // Unbounded queue; a send fails only once the worker has exited,
        // at which point the message is dropped like any post-close traffic.
        let _ = self.in_tx.send(raw);
    }

    fn stop(&self) {
        self.shared.stop.store(true, Ordering::Release);
    }

    fn is_finished(&self) -> bool {
        self.shared.finished.load(Ordering::Acquire)
    }

    fn needs_reset(&self) -> bool {
        self.shared.reset_needed.load(Ordering::Acquire)
    }

    fn join(&mut self) {
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("sim worker thread panicked");
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SimOrder {
    local: LocalOrderKey,
    symbol: String,
    direction: String,
    price: f64,
    volume: i64,
    status: &'static str,
}

struct SimWorker {
    shared: Arc<SimShared>,
    rx: Receiver<String>,
    out: OutboundSender,
    map: Arc<OrderIdMap>,
    req: ReqLogin,
    trading_day: String,
    scheduler: RefreshScheduler,
    balance: f64,
    positions: HashMap<String, i64>,
    orders: Vec<SimOrder>,
    snapshot: serde_json::Map<String, serde_json::Value>,
}

impl SimWorker {
    fn run(&mut self) {
        if self.scheduler.try_login(Instant::now()) {
            self.send_login_ack();
        }
        self.shared.flags.request_all();
        self.shared.flags.mark_changed();

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                break;
            }
            if current_trading_day() != self.trading_day {
                // Venue session identifiers are scoped to the trading day;
                // a rollover makes this session unrecoverable.
                self.shared.reset_needed.store(true, Ordering::Release);
            }

            match self.rx.recv_timeout(POLL_TIMEOUT) {
                Ok(raw) => self.handle_message(&raw),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            let now = Instant::now();
            if let Some(kind) = self.scheduler.next_query(now, &self.shared.flags) {
                self.refresh(kind);
            }
            if self.scheduler.should_send(now, &self.shared.flags) {
                self.push_snapshot();
            }
        }

        self.shared.finished.store(true, Ordering::Release);
        tracing::debug!(user = %self.req.user_name, "sim worker exited");
    }

    fn send_login_ack(&self) {
        let ack = serde_json::json!({
            "aid": "rtn_login",
            "bid": self.req.bid,
            "user_name": self.req.user_name,
            "trading_day": self.trading_day,
            "success": true,
        });
        self.send(ack.to_string());
    }

    fn handle_message(&mut self, raw: &str) {
        let msg: serde_json::Value = match serde_json::from_str(raw) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, "sim backend dropped unparseable message");
                return;
            }
        };
        match tg_core::types::action_id(&msg) {
            Some("insert_order") => self.insert_order(&msg),
            Some("cancel_order") => self.cancel_order(&msg),
            Some(other) => {
                tracing::debug!(aid = other, "sim backend ignoring unsupported action");
            }
            None => {
                tracing::debug!("sim backend dropped message without action id");
            }
        }
    }

    fn insert_order(&mut self, msg: &serde_json::Value) {
        let symbol = msg
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let direction = msg
            .get("direction")
            .and_then(|v| v.as_str())
            .unwrap_or("BUY")
            .to_string();
        let price = msg.get("price").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let volume = msg.get("volume").and_then(|v| v.as_i64()).unwrap_or(0);
        let is_market = msg
            .get("price_type")
            .and_then(|v| v.as_str())
            .map(|t| t == "ANY")
            .unwrap_or(false);

        if symbol.is_empty() || volume <= 0 {
            tracing::warn!(%symbol, volume, "sim backend rejected malformed order");
            self.notify(format!("invalid order: symbol={} volume={}", symbol, volume));
            return;
        }

        let local = self.map.assign_local(&self.trading_day);
        let remote = RemoteOrderKey {
            exchange_id: SIM_EXCHANGE_ID.to_string(),
            order_sys_id: format!("{:08}", local.seq),
        };
        self.map.bind(local.clone(), remote);

        let status = if is_market {
            let signed = if direction == "SELL" { -volume } else { volume };
            *self.positions.entry(symbol.clone()).or_insert(0) += signed;
            self.balance -= price * volume as f64 * 0.0001;
            "FILLED"
        } else {
            "ALIVE"
        };

        tracing::info!(order = %local, %symbol, %direction, price, volume, status, "sim order accepted");
        self.orders.push(SimOrder {
            local,
            symbol,
            direction,
            price,
            volume,
            status,
        });

        self.shared.flags.request(RefreshKind::Account);
        self.shared.flags.request(RefreshKind::Positions);
        self.refresh_orders();
    }

    fn cancel_order(&mut self, msg: &serde_json::Value) {
        let order_id = msg
            .get("order_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let found = self
            .orders
            .iter_mut()
            .find(|o| o.local.to_string() == order_id && o.status == "ALIVE");
        match found {
            Some(order) => {
                order.status = "CANCELLED";
                tracing::info!(order = order_id, "sim order cancelled");
                self.refresh_orders();
            }
            None => {
                tracing::warn!(order = order_id, "cancel for unknown or finished order");
                self.notify(format!("cannot cancel order {}", order_id));
            }
        }
    }

    /// Re-query one state category from the "venue" into the cached
    /// snapshot document and mark it for the next consolidated push.
    fn refresh(&mut self, kind: RefreshKind) {
        let section = match kind {
            RefreshKind::Account => (
                "account",
                serde_json::json!({
                    "balance": self.balance,
                    "currency": "CNY",
                }),
            ),
            RefreshKind::Positions => (
                "positions",
                serde_json::to_value(&self.positions).unwrap_or_default(),
            ),
            RefreshKind::BankTransfers => ("banks", serde_json::json!([])),
            RefreshKind::Registration => (
                "registration",
                serde_json::json!({ "user_name": self.req.user_name }),
            ),
        };
        self.snapshot.insert(section.0.to_string(), section.1);
        self.shared.flags.mark_changed();
    }

    /// Order state is session-local, not venue-queried: the section updates
    /// on every order event rather than on the query cadence.
    fn refresh_orders(&mut self) {
        let orders = serde_json::Value::Array(
            self.orders
                .iter()
                .map(|o| {
                    serde_json::json!({
                        "order_id": o.local.to_string(),
                        "exchange_id": SIM_EXCHANGE_ID,
                        "order_sys_id": self
                            .map
                            .resolve_remote(&o.local)
                            .map(|r| r.order_sys_id)
                            .unwrap_or_default(),
                        "symbol": o.symbol,
                        "direction": o.direction,
                        "price": o.price,
                        "volume": o.volume,
                        "status": o.status,
                    })
                })
                .collect(),
        );
        self.snapshot.insert("orders".to_string(), orders);
        self.shared.flags.mark_changed();
    }

    fn push_snapshot(&self) {
        let frame = serde_json::json!({
            "aid": "rtn_data",
            "trading_day": self.trading_day,
            "data": self.snapshot,
        });
        self.send(frame.to_string());
    }

    fn notify(&self, text: String) {
        let frame = serde_json::json!({ "aid": "rtn_notify", "text": text });
        self.send(frame.to_string());
    }

    fn send(&self, frame: String) {
        // The receiving half lives in the connection's writer task; it is
        // gone once the connection closed. Not an error for the worker.
        if self.out.send(frame).is_err() {
            tracing::debug!("outbound channel closed; dropping frame");
        }
    }
}
