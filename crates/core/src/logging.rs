//! Logging and tracing initialization for the gateway.
//!
//! Provides [`init_tracing`] to configure structured logging with two modes:
//! - **JSON mode** (`json = true`): machine-readable output with nanosecond
//!   timestamps, suitable for production log aggregation.
//! - **Pretty mode** (`json = false`): human-readable colored output for
//!   local development.
//!
//! Both modes respect the `RUST_LOG` environment variable for filtering
//! (e.g., `RUST_LOG=tg_gateway=debug,tg_backend=trace`).
//!
//! A [`CredentialGuard`] layer watches for login credentials leaking into
//! log fields: client login requests carry venue passwords, and raw message
//! payloads must never be logged with those fields intact.

use std::fmt;

use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Initialize the global tracing subscriber.
///
/// # Panics
///
/// Panics if the global subscriber has already been set.
pub fn init_tracing(json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(CredentialGuard);

    if json {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_timer(NanosecondTimer)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(json_layer).init();
    } else {
        let pretty_layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(false)
            .with_span_events(FmtSpan::CLOSE);

        registry.with(pretty_layer).init();
    }
}

/// Custom timer that emits nanosecond-precision timestamps for JSON logs.
#[derive(Debug, Clone)]
struct NanosecondTimer;

impl tracing_subscriber::fmt::time::FormatTime for NanosecondTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let now = chrono::Utc::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.9fZ"))
    }
}

/// Field names that indicate credentials regardless of value.
const CREDENTIAL_FIELD_NAMES: &[&str] = &["password", "token", "secret", "api_key"];

/// A tracing layer that warns when credential-bearing fields appear in
/// span or event fields, or when a logged payload embeds a password field.
#[derive(Debug, Clone)]
pub struct CredentialGuard;

impl<S> Layer<S> for CredentialGuard
where
    S: tracing::Subscriber + for<'lookup> tracing_subscriber::registry::LookupSpan<'lookup>,
{
    fn on_new_span(
        &self,
        attrs: &span::Attributes<'_>,
        _id: &span::Id,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = CredentialVisitor::default();
        attrs.record(&mut visitor);
        if visitor.found {
            tracing::warn!(
                "credential-like field recorded in span; ensure login payloads are not logged raw"
            );
        }
    }

    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let mut visitor = CredentialVisitor::default();
        event.record(&mut visitor);
        if visitor.found {
            tracing::warn!(
                "credential-like field recorded in event; ensure login payloads are not logged raw"
            );
        }
    }
}

/// Visitor that checks field names and values for credential material.
#[derive(Default)]
struct CredentialVisitor {
    found: bool,
}

impl CredentialVisitor {
    /// Serialized login payloads embed a `password` key; catch them even
    /// when logged under an innocuous field name.
    fn embeds_credential(value: &str) -> bool {
        value.contains("\"password\"")
    }
}

impl Visit for CredentialVisitor {
    fn record_debug(&mut self, field: &Field, _value: &dyn fmt::Debug) {
        if CREDENTIAL_FIELD_NAMES.contains(&field.name()) {
            self.found = true;
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if CREDENTIAL_FIELD_NAMES.contains(&field.name()) || Self::embeds_credential(value) {
            self.found = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeds_credential_in_raw_login_payload() {
        let raw = r#"{"aid":"req_login","bid":"b1","user_name":"u","password":"p"}"#;
        assert!(CredentialVisitor::embeds_credential(raw));
    }

    #[test]
    fn test_ordinary_payload_passes() {
        let raw = r#"{"aid":"insert_order","price":4000.0}"#;
        assert!(!CredentialVisitor::embeds_credential(raw));
    }

    #[test]
    fn test_credential_field_names() {
        assert!(CREDENTIAL_FIELD_NAMES.contains(&"password"));
        assert!(!CREDENTIAL_FIELD_NAMES.contains(&"user_name"));
    }
}
