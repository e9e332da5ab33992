//! Layered configuration for the tradegate gateway.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (loopback listen address, one simulated broker)
//! 2. TOML configuration file (if provided)
//! 3. Environment variable overrides (prefix `TG_`, nested with `__`)
//!
//! The broker table is static after load: the gateway only ever reads it, so
//! it needs no synchronization beyond `Arc` sharing.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

// ── Default value functions ────────────────────────────────────────────

/// Default maximum WebSocket message size: 4 MiB.
fn default_max_message_size() -> usize {
    4 * 1024 * 1024
}

/// Default reset-sweep interval: 30 s.
fn default_sweep_interval_secs() -> u64 {
    30
}

/// Default shutdown grace period: 5 000 ms.
fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Default order-map persistence directory.
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// WebSocket listen endpoint.
    pub server: ServerConfig,
    /// Session orchestration settings.
    pub gateway: OrchestrationConfig,
    /// Broker id → connection parameters. Read-only after load.
    pub brokers: HashMap<String, BrokerConfig>,
}

/// WebSocket listen endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen host (IP address or hostname).
    pub host: String,
    /// Listen port. `0` picks an ephemeral port (used by tests).
    pub port: u16,
    /// Maximum accepted WebSocket message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Session orchestration settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationConfig {
    /// Interval between reset sweeps over attached backends.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// How long shutdown waits for retired backend workers to finish.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Directory for per-user order-id mapping files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Static per-broker connection parameters.
///
/// `broker_type` selects the backend implementation from the factory
/// registry (`sim` for the simulated venue). The remaining fields are passed
/// through to the backend untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Backend type identifier, resolved against the backend registry.
    pub broker_type: String,
    /// Venue-assigned broker id, if the venue requires one at login.
    #[serde(default)]
    pub broker_id: String,
    /// Venue front addresses (live backends connect to one of these).
    #[serde(default)]
    pub trade_fronts: Vec<String>,
}

impl GatewayConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults: listen on `127.0.0.1:7788`, one simulated
    ///    broker named `simnow`.
    /// 2. TOML file at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `TG_` and `__` as the
    ///    nesting separator (e.g., `TG_SERVER__PORT=9002`).
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 7788i64)?
            .set_default("server.max_message_size", 4 * 1024 * 1024i64)?
            .set_default("gateway.sweep_interval_secs", 30i64)?
            .set_default("gateway.shutdown_grace_ms", 5000i64)?
            .set_default("gateway.data_dir", "data")?
            .set_default("brokers.simnow.broker_type", "sim")?;

        if let Some(path) = config_path {
            let path_str = path.to_str().context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // The prefix separator must be set explicitly to `_` because the
        // `config` crate defaults it to the nesting separator when one is
        // provided. Without this, `TG_SERVER__PORT` would be matched against
        // prefix `tg__` instead of `tg_`.
        builder = builder.add_source(
            Environment::with_prefix("TG")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: GatewayConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration invariants.
    ///
    /// Every configured broker must carry a backend type, and the sweep
    /// interval must be non-zero (a zero interval would spin the dispatcher).
    fn validate(&self) -> Result<()> {
        if self.brokers.is_empty() {
            bail!("no brokers configured; clients would have nothing to log in to");
        }
        for (bid, broker) in &self.brokers {
            if broker.broker_type.is_empty() {
                bail!("broker '{}' has an empty broker_type", bid);
            }
        }
        if self.gateway.sweep_interval_secs == 0 {
            bail!("gateway.sweep_interval_secs must be at least 1");
        }
        Ok(())
    }

    /// Broker ids in sorted order, as pushed in the `rtn_brokers` frame.
    pub fn broker_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.brokers.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    /// Global mutex to serialize tests that manipulate environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_env() {
        std::env::remove_var("TG_SERVER__PORT");
        std::env::remove_var("TG_GATEWAY__SWEEP_INTERVAL_SECS");
    }

    /// Helper: create a temporary TOML config file and return its path.
    ///
    /// Uses `.toml` suffix so the `config` crate auto-detects the format.
    fn write_temp_toml(content: &str) -> (tempfile::NamedTempFile, PathBuf) {
        let mut f = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("create temp file");
        write!(f, "{}", content).expect("write temp file");
        let path = f.path().to_path_buf();
        (f, path)
    }

    #[test]
    fn test_load_defaults_only() {
        let _lock = lock_env();
        clear_env();

        let cfg = GatewayConfig::load(None).expect("load defaults");
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.server.port, 7788);
        assert_eq!(cfg.server.max_message_size, 4 * 1024 * 1024);
        assert_eq!(cfg.gateway.sweep_interval_secs, 30);
        assert_eq!(cfg.gateway.shutdown_grace_ms, 5000);
        assert_eq!(cfg.brokers["simnow"].broker_type, "sim");
    }

    #[test]
    fn test_load_from_toml() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[server]
host = "0.0.0.0"
port = 9002

[gateway]
sweep_interval_secs = 5
data_dir = "/var/lib/tradegate"

[brokers.b1]
broker_type = "sim"

[brokers.b2]
broker_type = "live"
broker_id = "9999"
trade_fronts = ["tcp://front1.example.com:17002"]
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let cfg = GatewayConfig::load(Some(path)).expect("load from toml");

        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9002);
        assert_eq!(cfg.gateway.sweep_interval_secs, 5);
        assert_eq!(cfg.gateway.data_dir, PathBuf::from("/var/lib/tradegate"));
        assert_eq!(cfg.brokers["b2"].broker_id, "9999");
        assert_eq!(cfg.brokers["b2"].trade_fronts.len(), 1);
        // The default simnow broker is still present unless overridden away.
        assert!(cfg.brokers.contains_key("simnow"));
    }

    #[test]
    fn test_env_var_overrides() {
        let _lock = lock_env();
        clear_env();
        std::env::set_var("TG_SERVER__PORT", "9100");

        let cfg = GatewayConfig::load(None).expect("load with env override");
        assert_eq!(cfg.server.port, 9100);

        clear_env();
    }

    #[test]
    fn test_broker_ids_sorted() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[brokers.zeta]
broker_type = "sim"

[brokers.alpha]
broker_type = "sim"
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let cfg = GatewayConfig::load(Some(path)).expect("load");
        let ids = cfg.broker_ids();
        assert_eq!(ids, vec!["alpha", "simnow", "zeta"]);
    }

    #[test]
    fn test_empty_broker_type_rejected() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[brokers.bad]
broker_type = ""
"#;
        let (_f, path) = write_temp_toml(toml_content);
        let result = GatewayConfig::load(Some(path));
        assert!(result.is_err());
        let err_msg = format!("{}", result.unwrap_err());
        assert!(err_msg.contains("broker_type"));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let _lock = lock_env();
        clear_env();

        let toml_content = r#"
[gateway]
sweep_interval_secs = 0
"#;
        let (_f, path) = write_temp_toml(toml_content);
        assert!(GatewayConfig::load(Some(path)).is_err());
    }
}
