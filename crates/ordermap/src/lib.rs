//! # tg-ordermap
//!
//! Bidirectional translation between gateway-issued local order keys and
//! venue-issued remote order keys, persisted to a per-user file so that
//! submitted-but-unconfirmed bindings survive a process restart.
//!
//! The mapping is scoped to the current trading day: on day change the
//! counter resets and prior-day bindings are discarded, never carried
//! forward.

pub mod map;
mod persist;
pub mod registry;

pub use map::{LocalOrderKey, OrderIdMap, RemoteOrderKey};
pub use registry::OrderMapRegistry;
