//! # tg-backend
//!
//! The Backend Session capability: the trait every venue backend implements,
//! the factory registry the gateway resolves broker types against, the
//! refresh scheduler that throttles periodic venue queries, and the
//! simulated venue backend.

pub mod registry;
pub mod scheduler;
pub mod session;
pub mod sim;

pub use registry::{default_registry, BackendRegistry};
pub use scheduler::{RefreshFlags, RefreshKind, RefreshScheduler};
pub use session::{BackendContext, OutboundSender, TraderSession};
pub use sim::SimSession;
