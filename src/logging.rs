//! Logging for the provider process.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host
//! reads to find the plugin's address. Every CRUD operation runs in a span
//! named after the operation and carrying the resource kind, so the
//! lines a single apply produces can be told apart.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: log filter (e.g. `info`, `scaleway_provider=debug`)
//!
//! ```bash
//! # Every API call, waiter poll and update step
//! RUST_LOG=scaleway_provider=debug ./scaleway-provider
//! ```

use serde_json::{Map, Value};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::schema::{Block, BlockNestingMode, Schema};

/// Placeholder logged instead of sensitive values.
pub const REDACTED: &str = "<sensitive>";

fn subscriber(default_level: &str) -> impl tracing::Subscriber + Send + Sync + 'static {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the stderr subscriber, defaulting to `info`.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with the level used when `RUST_LOG` is unset.
///
/// # Panics
///
/// Panics if a global subscriber has already been set.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the subscriber unless one is already set.
///
/// Returns `false` when a subscriber was already installed, which is the
/// normal case in tests.
pub fn try_init_logging() -> bool {
    subscriber("info").try_init().is_ok()
}

/// A copy of `value` with every sensitive attribute replaced by
/// [`REDACTED`].
///
/// Attributes are matched by schema name and by a top-level API name, so
/// both states and request bodies can be redacted.
pub fn redact_sensitive(schema: &Schema, value: &Value) -> Value {
    redact_block(&schema.block, value)
}

fn redact_block(block: &Block, value: &Value) -> Value {
    let Value::Object(obj) = value else {
        return value.clone();
    };
    let mut out = Map::with_capacity(obj.len());
    for (key, item) in obj {
        let attr = block.attributes.get(key).or_else(|| {
            block
                .attributes
                .values()
                .find(|attr| attr.api_name.as_deref() == Some(key.as_str()))
        });
        let redacted = match (attr, block.blocks.get(key)) {
            (Some(attr), _) if attr.flags.sensitive && !item.is_null() => Value::from(REDACTED),
            (None, Some(nested)) => match (nested.nesting_mode, item) {
                (BlockNestingMode::Map, Value::Object(entries)) => Value::Object(
                    entries
                        .iter()
                        .map(|(k, v)| (k.clone(), redact_block(&nested.block, v)))
                        .collect(),
                ),
                (_, Value::Array(items)) => Value::Array(
                    items
                        .iter()
                        .map(|v| redact_block(&nested.block, v))
                        .collect(),
                ),
                (_, other) => redact_block(&nested.block, other),
            },
            _ => item.clone(),
        };
        out.insert(key.clone(), redacted);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("name", Attribute::optional_string())
            .with_attribute(
                "secret_key",
                Attribute::optional_string().sensitive().with_api_name("secretKey"),
            )
            .with_block(
                "user",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("login", Attribute::required_string())
                        .with_attribute("password", Attribute::required_string().sensitive()),
                ),
            )
    }

    #[test]
    fn test_env_filter_parsing() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("scaleway_provider=debug").is_ok());
        assert!(EnvFilter::try_new("warn,scaleway_provider::wait=debug").is_ok());
    }

    #[test]
    fn test_redacts_state_and_nested_blocks() {
        let state = json!({
            "name": "db",
            "secret_key": "hunter2",
            "user": [{"login": "admin", "password": "swordfish"}],
        });
        let redacted = redact_sensitive(&schema(), &state);
        assert_eq!(
            redacted,
            json!({
                "name": "db",
                "secret_key": REDACTED,
                "user": [{"login": "admin", "password": REDACTED}],
            })
        );
        assert!(!redacted.to_string().contains("hunter2"));
    }

    #[test]
    fn test_redacts_request_bodies_by_api_name() {
        let body = json!({"secretKey": "hunter2", "unknown": 1});
        assert_eq!(
            redact_sensitive(&schema(), &body),
            json!({"secretKey": REDACTED, "unknown": 1})
        );
    }

    #[test]
    fn test_null_sensitive_value_stays_null() {
        let state = json!({"secret_key": null});
        assert_eq!(redact_sensitive(&schema(), &state), state);
    }
}
