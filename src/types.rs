//! Plan output, import results and handshake constants.

use crate::generated as proto;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Handshake line prefix, `SCALEWAY_PROVIDER|<version>|<addr>`.
pub const HANDSHAKE_PREFIX: &str = "SCALEWAY_PROVIDER";

/// Version of the host protocol spoken over gRPC.
pub const PROTOCOL_VERSION: u32 = 1;

/// One attribute whose planned value differs from state.
///
/// `path` is dotted (`root_volume.size_in_gb`, `tags.0`). A missing side
/// means the attribute was unset on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    /// Dotted attribute path.
    pub path: String,
    /// Value in prior state.
    pub before: Option<Value>,
    /// Planned value.
    pub after: Option<Value>,
    /// The resource is destroyed and recreated to apply this change.
    #[serde(default)]
    pub requires_replace: bool,
}

impl AttributeChange {
    /// In-place change from `before` to `after`.
    pub fn new(path: impl Into<String>, before: Option<Value>, after: Option<Value>) -> Self {
        Self {
            path: path.into(),
            before,
            after,
            requires_replace: false,
        }
    }

    /// Attribute set for the first time.
    pub fn added(path: impl Into<String>, after: Value) -> Self {
        Self::new(path, None, Some(after))
    }

    /// Attribute cleared.
    pub fn removed(path: impl Into<String>, before: Value) -> Self {
        Self::new(path, Some(before), None)
    }

    /// Attribute moved between two values.
    pub fn modified(path: impl Into<String>, before: Value, after: Value) -> Self {
        Self::new(path, Some(before), Some(after))
    }

    /// Flag the change as a replacement.
    pub fn replacing(self, requires_replace: bool) -> Self {
        Self {
            requires_replace,
            ..self
        }
    }

    /// Top-level member the path starts with.
    pub fn root(&self) -> &str {
        match self.path.split_once('.') {
            Some((root, _)) => root,
            None => &self.path,
        }
    }
}

impl From<AttributeChange> for proto::AttributeChange {
    fn from(change: AttributeChange) -> Self {
        // An absent side travels as an empty byte string.
        let encode = |side: Option<Value>| {
            side.and_then(|v| serde_json::to_vec(&v).ok())
                .unwrap_or_default()
        };
        Self {
            path: change.path,
            before: encode(change.before),
            after: encode(change.after),
            requires_replace: change.requires_replace,
        }
    }
}

/// What `PlanResourceChange` answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanResult {
    /// State the resource has once the plan is applied.
    pub planned_state: Value,
    /// Differences from prior state; empty for a no-op.
    pub changes: Vec<AttributeChange>,
    /// At least one change needs destroy-then-create.
    pub requires_replace: bool,
}

impl PlanResult {
    /// Plan made of `changes`, replacing if any of them does.
    pub fn from_changes(planned_state: Value, changes: Vec<AttributeChange>) -> Self {
        Self {
            requires_replace: changes.iter().any(|c| c.requires_replace),
            planned_state,
            changes,
        }
    }

    /// Applying the plan would not touch the resource.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// State produced by `ImportResourceState` from a composite id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportedResource {
    /// Kind, such as `scaleway_instance_ip`.
    pub resource_type: String,
    /// State as a read would have produced it.
    pub state: Value,
}

impl ImportedResource {
    /// Imported `state` of kind `resource_type`.
    pub fn new(resource_type: impl Into<String>, state: Value) -> Self {
        Self {
            resource_type: resource_type.into(),
            state,
        }
    }
}

/// Kinds served by the plugin, reported by `GetMetadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderMetadata {
    /// Resource kinds.
    pub resources: Vec<String>,
    /// Data sources.
    pub data_sources: Vec<String>,
    /// Optional protocol features.
    pub capabilities: ServerCapabilities,
}

/// Optional protocol features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ServerCapabilities {
    /// The host may ask for a plan with no proposed state.
    pub plan_destroy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_root_of_nested_path() {
        let change = AttributeChange::modified("root_volume.size_in_gb", json!(20), json!(30));
        assert_eq!(change.root(), "root_volume");
        assert_eq!(AttributeChange::added("tags", json!(["web"])).root(), "tags");
    }

    #[test]
    fn test_unset_side_encodes_as_empty_bytes() {
        let change = AttributeChange::removed("ip_id", json!("fr-par-1/11111111-1111-1111-1111-111111111111"));
        let encoded = proto::AttributeChange::from(change);
        assert!(encoded.after.is_empty());
        assert_eq!(encoded.before, br#""fr-par-1/11111111-1111-1111-1111-111111111111""#.to_vec());
    }

    #[test]
    fn test_zone_change_replaces_the_plan() {
        let plan = PlanResult::from_changes(
            json!({"zone": "nl-ams-1"}),
            vec![
                AttributeChange::modified("name", json!("a"), json!("b")),
                AttributeChange::modified("zone", json!("fr-par-1"), json!("nl-ams-1")).replacing(true),
            ],
        );
        assert!(plan.requires_replace);
        assert!(!plan.is_empty());

        let rename = PlanResult::from_changes(json!({}), vec![AttributeChange::added("name", json!("a"))]);
        assert!(!rename.requires_replace);
        assert!(PlanResult::from_changes(json!({}), Vec::new()).is_empty());
    }
}
