//! # tg-core
//!
//! Shared building blocks for the tradegate gateway: wire-level request
//! types and the broker table, layered configuration loading, and the
//! logging framework.

pub mod config;
pub mod logging;
pub mod types;
