//! Wire-level request types and trading-day helpers.
//!
//! Client messages are opaque JSON payloads routed by their `aid` (action
//! identifier) field. Only the login request is parsed field-by-field by the
//! gateway; everything else is forwarded verbatim to the attached backend.

use serde::{Deserialize, Serialize};

use crate::config::BrokerConfig;

/// Action identifier of the login request.
pub const AID_LOGIN: &str = "req_login";

/// Action identifier of the broker-list push sent on connection open.
pub const AID_BROKERS: &str = "rtn_brokers";

/// Login request sent by a client to attach a venue backend.
///
/// The `broker` field is never read from the wire: the gateway resolves the
/// broker id (`bid`) against the configured broker table and merges the
/// matching entry in before the backend is started, so backends see a fully
/// resolved request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReqLogin {
    /// Broker id, looked up in the configured broker table.
    #[serde(default)]
    pub bid: String,
    /// Venue account user name.
    #[serde(default)]
    pub user_name: String,
    /// Venue account password.
    #[serde(default)]
    pub password: String,
    /// Resolved broker configuration, filled in by the gateway.
    #[serde(skip)]
    pub broker: Option<BrokerConfig>,
}

/// Extract the action identifier from a parsed client message.
pub fn action_id(msg: &serde_json::Value) -> Option<&str> {
    msg.get("aid").and_then(|v| v.as_str())
}

/// Current trading day as `YYYYMMDD`.
///
/// The venue's logical business date. Order-id uniqueness and mapping
/// persistence are scoped to this value; entries from a prior day are never
/// carried forward.
pub fn current_trading_day() -> String {
    chrono::Utc::now().format("%Y%m%d").to_string()
}
