//! Schema version upgrades of stored state.
//!
//! A resource kind at schema version `n` carries `n` upgraders; upgrader
//! `i` turns a version `i` state into a version `i + 1` state. Stored
//! state is passed through every upgrader from its version onwards.

use serde_json::Value;
use tracing::debug;

use crate::error::ProviderError;

/// Turns a state of one version into the next.
pub type StateUpgrader = fn(Value) -> Result<Value, ProviderError>;

/// Bring `state` from `from_version` up to `current_version`.
pub fn upgrade_state(
    upgraders: &[StateUpgrader],
    from_version: u64,
    current_version: u64,
    state: Value,
) -> Result<Value, ProviderError> {
    if from_version > current_version {
        return Err(ProviderError::Validation(format!(
            "stored state has schema version {}, newer than this provider's {}",
            from_version, current_version
        )));
    }
    if upgraders.len() as u64 != current_version {
        return Err(ProviderError::Internal(format!(
            "schema version {} needs {} upgraders, {} registered",
            current_version,
            current_version,
            upgraders.len()
        )));
    }

    let mut state = state;
    for (version, upgrader) in upgraders.iter().enumerate().skip(from_version as usize) {
        if state.is_null() {
            break;
        }
        debug!(from = version, to = version + 1, "upgrading state");
        state = upgrader(state)?;
    }
    Ok(state)
}

/// Rename a top-level attribute, keeping its value.
pub fn rename_attribute(mut state: Value, from: &str, to: &str) -> Value {
    if let Some(obj) = state.as_object_mut() {
        if let Some(value) = obj.remove(from) {
            obj.insert(to.to_string(), value);
        }
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add_one(mut state: Value) -> Result<Value, ProviderError> {
        let n = state["n"].as_i64().unwrap_or(0);
        state["n"] = json!(n + 1);
        Ok(state)
    }

    fn double(mut state: Value) -> Result<Value, ProviderError> {
        let n = state["n"].as_i64().unwrap_or(0);
        state["n"] = json!(n * 2);
        Ok(state)
    }

    #[test]
    fn test_upgraders_run_in_order_from_stored_version() {
        let chain: [StateUpgrader; 2] = [add_one, double];
        assert_eq!(upgrade_state(&chain, 0, 2, json!({"n": 1})).unwrap(), json!({"n": 4}));
        assert_eq!(upgrade_state(&chain, 1, 2, json!({"n": 1})).unwrap(), json!({"n": 2}));
        assert_eq!(upgrade_state(&chain, 2, 2, json!({"n": 1})).unwrap(), json!({"n": 1}));
    }

    #[test]
    fn test_newer_state_is_rejected() {
        let err = upgrade_state(&[], 1, 0, json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_missing_upgrader_is_internal() {
        let err = upgrade_state(&[add_one], 0, 2, json!({})).unwrap_err();
        assert!(matches!(err, ProviderError::Internal(_)));
    }

    #[test]
    fn test_rename() {
        let state = rename_attribute(json!({"old": 1, "x": 2}), "old", "new");
        assert_eq!(state, json!({"new": 1, "x": 2}));
    }
}
