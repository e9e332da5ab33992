//! # tg-gateway
//!
//! The gateway serves one WebSocket endpoint to many concurrent client
//! connections and attaches, per connection, an independent session to one
//! of the configured trading-venue backends. A single dispatcher task owns
//! all session state; backend workers run on their own threads and talk
//! back through per-connection outbound channels.

pub mod event_loop;
pub mod lifecycle;
pub mod registry;
pub mod server;

#[cfg(test)]
pub(crate) mod teststub;
