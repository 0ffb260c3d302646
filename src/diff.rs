//! Attribute-level diff between prior and desired state.
//!
//! The diff walks the schema and the two values in lock-step. Computed-only
//! attributes are never compared; unset, null and empty values are equal;
//! sets compare without regard to order; diff-suppress rules are honoured.

use serde_json::{Map, Value};

use crate::schema::{Attribute, AttributeType, Block, BlockNestingMode, NestedBlock, Schema};
use crate::suppress;
use crate::types::AttributeChange;
use crate::validation::{is_empty, join_path, whole_number};

/// Fill in schema defaults for unset attributes, recursively.
///
/// Whole-number floats of int64 attributes are stored as integers.
pub fn apply_defaults(schema: &Schema, value: &mut Value) {
    apply_block_defaults(&schema.block, value);
}

fn apply_block_defaults(block: &Block, value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    for (name, attr) in &block.attributes {
        if let Some(default) = &attr.default {
            if obj.get(name).map_or(true, Value::is_null) {
                obj.insert(name.clone(), default.clone());
            }
        }
        if attr.attr_type == AttributeType::Int64 {
            if let Some(value) = obj.get_mut(name).filter(|v| v.is_f64()) {
                if let Some(n) = whole_number(value) {
                    *value = Value::from(n);
                }
            }
        }
    }
    for (name, nested) in &block.blocks {
        match obj.get_mut(name) {
            Some(Value::Array(items)) => {
                for item in items {
                    apply_block_defaults(&nested.block, item);
                }
            },
            Some(Value::Object(map)) if nested.nesting_mode == BlockNestingMode::Map => {
                for item in map.values_mut() {
                    apply_block_defaults(&nested.block, item);
                }
            },
            Some(single @ Value::Object(_)) => apply_block_defaults(&nested.block, single),
            _ => {},
        }
    }
}

/// Compute the changes needed to move from `prior` to `desired`.
///
/// `prior` is `None` when the resource does not exist yet; nothing is
/// marked as requiring replacement in that case.
pub fn diff(schema: &Schema, prior: Option<&Value>, desired: &Value) -> Vec<AttributeChange> {
    let mut desired = desired.clone();
    apply_defaults(schema, &mut desired);
    let mut changes = Vec::new();
    diff_block(
        &schema.block,
        prior.and_then(Value::as_object),
        desired.as_object(),
        "",
        false,
        prior.is_some(),
        &mut changes,
    );
    changes
}

/// The state the host should expect after applying `desired`.
///
/// Computed attributes left unset in `desired` keep their prior value,
/// unless the resource is being replaced.
pub fn planned_state(schema: &Schema, prior: Option<&Value>, desired: &Value, replace: bool) -> Value {
    let mut planned = desired.clone();
    apply_defaults(schema, &mut planned);
    if let (Some(Value::Object(prior)), Some(obj), false) = (prior, planned.as_object_mut(), replace) {
        for (name, attr) in &schema.block.attributes {
            if attr.flags.computed && obj.get(name).map_or(true, is_empty) {
                if let Some(previous) = prior.get(name) {
                    obj.insert(name.clone(), previous.clone());
                }
            }
        }
    }
    planned
}

fn diff_block(
    block: &Block,
    prior: Option<&Map<String, Value>>,
    desired: Option<&Map<String, Value>>,
    path: &str,
    force_new: bool,
    exists: bool,
    changes: &mut Vec<AttributeChange>,
) {
    for (name, attr) in &block.attributes {
        let attr_path = join_path(path, name);
        let old = prior.and_then(|p| p.get(name));
        let new = desired.and_then(|d| d.get(name));
        if let Some(change) = diff_attribute(attr, old, new, &attr_path) {
            changes.push(change.replacing(exists && (force_new || attr.force_new)));
        }
    }

    for (name, nested) in &block.blocks {
        let block_path = join_path(path, name);
        let old = prior.and_then(|p| p.get(name));
        let new = desired.and_then(|d| d.get(name));
        diff_nested(
            nested,
            old,
            new,
            &block_path,
            force_new || nested.force_new,
            exists,
            changes,
        );
    }
}

fn diff_attribute(
    attr: &Attribute,
    old: Option<&Value>,
    new: Option<&Value>,
    path: &str,
) -> Option<AttributeChange> {
    if attr.flags.is_computed_only() {
        return None;
    }
    let old = old.filter(|v| !is_empty(v));
    let new = new.filter(|v| !is_empty(v));
    match (old, new) {
        (None, None) => None,
        // Unset optional+computed attributes follow the server.
        (_, None) if attr.flags.computed => None,
        (Some(old), Some(new)) => {
            if same_value(&attr.attr_type, old, new) {
                return None;
            }
            if let Some(rule) = attr.diff_suppress {
                if suppress::equivalent(rule, old, new) {
                    return None;
                }
            }
            Some(AttributeChange::modified(path, old.clone(), new.clone()))
        },
        (None, Some(new)) => Some(AttributeChange::added(path, new.clone())),
        (Some(old), None) => Some(AttributeChange::removed(path, old.clone())),
    }
}

fn diff_nested(
    nested: &NestedBlock,
    old: Option<&Value>,
    new: Option<&Value>,
    path: &str,
    force_new: bool,
    exists: bool,
    changes: &mut Vec<AttributeChange>,
) {
    let whole = |changes: &mut Vec<AttributeChange>, old: Option<&Value>, new: Option<&Value>| {
        changes.push(
            AttributeChange::new(path, old.cloned(), new.cloned()).replacing(exists && force_new),
        );
    };
    let old = old.filter(|v| !is_empty(v));
    let new = new.filter(|v| !is_empty(v));
    if old.is_none() && new.is_none() {
        return;
    }

    match nested.nesting_mode {
        BlockNestingMode::Single => {
            let empty = Map::new();
            let old_obj = old.and_then(single_object);
            let new_obj = new.and_then(single_object);
            diff_block(
                &nested.block,
                Some(old_obj.unwrap_or(&empty)),
                Some(new_obj.unwrap_or(&empty)),
                path,
                force_new,
                exists,
                changes,
            );
        },
        BlockNestingMode::List => {
            let old_items = items(old);
            let new_items = items(new);
            if old_items.len() != new_items.len() {
                whole(changes, old, new);
                return;
            }
            for (i, (o, n)) in old_items.iter().zip(new_items.iter()).enumerate() {
                diff_block(
                    &nested.block,
                    o.as_object(),
                    n.as_object(),
                    &format!("{}.{}", path, i),
                    force_new,
                    exists,
                    changes,
                );
            }
        },
        BlockNestingMode::Set => {
            if !same_multiset(&items(old), &items(new)) {
                whole(changes, old, new);
            }
        },
        BlockNestingMode::Map => {
            let empty = Map::new();
            let old_map = old.and_then(Value::as_object).unwrap_or(&empty);
            let new_map = new.and_then(Value::as_object).unwrap_or(&empty);
            let mut keys: Vec<&String> = old_map.keys().chain(new_map.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let key_path = format!("{}.{}", path, key);
                match (old_map.get(key), new_map.get(key)) {
                    (Some(o), Some(n)) => diff_block(
                        &nested.block,
                        o.as_object(),
                        n.as_object(),
                        &key_path,
                        force_new,
                        exists,
                        changes,
                    ),
                    (o, n) => changes.push(
                        AttributeChange::new(key_path, o.cloned(), n.cloned())
                            .replacing(exists && force_new),
                    ),
                }
            }
        },
    }
}

/// A single block may arrive as an object or as a one-element list.
fn single_object(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

fn items(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    }
}

fn same_value(attr_type: &AttributeType, old: &Value, new: &Value) -> bool {
    match (attr_type, old, new) {
        (AttributeType::Set(_), Value::Array(a), Value::Array(b)) => same_multiset(a, b),
        _ => values_equal(old, new),
    }
}

fn same_multiset(a: &[Value], b: &[Value]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let key = |v: &Value| canonical(v).to_string();
    let mut a: Vec<String> = a.iter().map(key).collect();
    let mut b: Vec<String> = b.iter().map(key).collect();
    a.sort();
    b.sort();
    a == b
}

/// Structural equality where `20` equals `20.0`.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        },
        (Value::Object(x), Value::Object(y)) => {
            let keys = x.keys().chain(y.keys());
            keys.into_iter().all(|k| match (x.get(k), y.get(k)) {
                (Some(x), Some(y)) => values_equal(x, y),
                (Some(v), None) | (None, Some(v)) => is_empty(v),
                (None, None) => true,
            })
        },
        _ => a == b,
    }
}

fn canonical(value: &Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => Value::from(f as i64),
            _ => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(canonical).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !is_empty(v))
                .map(|(k, v)| (k.clone(), canonical(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DiffSuppress, NestedBlock};
    use serde_json::json;

    fn server_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::optional_computed_string())
            .with_attribute("type", Attribute::required_string())
            .with_attribute("image", Attribute::required_string().with_force_new())
            .with_attribute("state", Attribute::optional_string().with_default(json!("started")))
            .with_attribute(
                "tags",
                Attribute::new(
                    AttributeType::set(AttributeType::String),
                    crate::schema::AttributeFlags::optional(),
                ),
            )
            .with_attribute("ip_id", Attribute::optional_string().id_reference())
            .with_block(
                "root_volume",
                NestedBlock::single(
                    Block::new()
                        .with_attribute("size_in_gb", Attribute::optional_int64().computed())
                        .with_attribute(
                            "volume_type",
                            Attribute::optional_string().with_force_new(),
                        ),
                ),
            )
    }

    const IP: &str = "11111111-1111-1111-1111-111111111111";

    #[test]
    fn test_no_changes_against_read_back_state() {
        let schema = server_schema();
        let prior = json!({
            "id": "fr-par-1/abc",
            "name": "srv-generated",
            "type": "DEV1-S",
            "image": "ubuntu_focal",
            "state": "started",
            "tags": ["b", "a"],
            "ip_id": format!("fr-par-1/{}", IP),
            "root_volume": {"size_in_gb": 20, "volume_type": "l_ssd"},
        });
        let desired = json!({
            "type": "DEV1-S",
            "image": "ubuntu_focal",
            "tags": ["a", "b"],
            "ip_id": IP,
            "root_volume": [{"volume_type": "l_ssd", "size_in_gb": 20.0}],
        });
        assert_eq!(diff(&schema, Some(&prior), &desired), vec![]);
    }

    #[test]
    fn test_changes_and_replacement() {
        let schema = server_schema();
        let prior = json!({
            "type": "DEV1-S",
            "image": "ubuntu_focal",
            "state": "started",
            "root_volume": {"size_in_gb": 20, "volume_type": "l_ssd"},
        });
        let desired = json!({
            "type": "DEV1-M",
            "image": "debian_bookworm",
            "state": "stopped",
            "root_volume": {"size_in_gb": 30, "volume_type": "l_ssd"},
        });
        let changes = diff(&schema, Some(&prior), &desired);
        let paths: Vec<_> = changes.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(paths, vec!["image", "state", "type", "root_volume.size_in_gb"]);
        assert!(changes[0].requires_replace);
        assert!(!changes[1].requires_replace);
    }

    #[test]
    fn test_create_never_replaces() {
        let schema = server_schema();
        let changes = diff(&schema, None, &json!({"type": "DEV1-S", "image": "x"}));
        assert!(changes.iter().all(|c| !c.requires_replace));
        // The default for `state` shows up as an addition.
        assert!(changes.iter().any(|c| c.path == "state" && c.after == Some(json!("started"))));
    }

    #[test]
    fn test_removing_optional_value() {
        let schema = server_schema();
        let changes = diff(
            &schema,
            Some(&json!({"type": "a", "image": "i", "state": "started", "tags": ["x"]})),
            &json!({"type": "a", "image": "i", "tags": []}),
        );
        assert_eq!(changes, vec![AttributeChange::removed("tags", json!(["x"]))]);
    }

    #[test]
    fn test_list_block_length_change() {
        let schema = Schema::v0().with_block(
            "rule",
            NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64())),
        );
        let changes = diff(
            &schema,
            Some(&json!({"rule": [{"port": 80}]})),
            &json!({"rule": [{"port": 80}, {"port": 443}]}),
        );
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "rule");

        let changes = diff(
            &schema,
            Some(&json!({"rule": [{"port": 80}]})),
            &json!({"rule": [{"port": 8080}]}),
        );
        assert_eq!(changes[0].path, "rule.0.port");
    }

    #[test]
    fn test_set_block_ignores_order() {
        let schema = Schema::v0().with_block(
            "rule",
            NestedBlock::set(Block::new().with_attribute("port", Attribute::required_int64())),
        );
        let changes = diff(
            &schema,
            Some(&json!({"rule": [{"port": 80}, {"port": 443}]})),
            &json!({"rule": [{"port": 443}, {"port": 80}]}),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_suppressed_policy() {
        let schema = Schema::v0().with_attribute(
            "policy",
            Attribute::required_string().with_diff_suppress(DiffSuppress::PolicyDocument),
        );
        let changes = diff(
            &schema,
            Some(&json!({"policy": r#"{"Statement":[{"Sid":"a","Effect":"Allow"}]}"#})),
            &json!({"policy": "{ \"Statement\": { \"Effect\": \"Allow\", \"Sid\": \"a\" } }"}),
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_planned_state_keeps_computed() {
        let schema = server_schema();
        let prior = json!({"id": "fr-par-1/abc", "name": "n", "type": "a", "image": "i"});
        let planned = planned_state(&schema, Some(&prior), &json!({"type": "b", "image": "i"}), false);
        assert_eq!(planned["id"], "fr-par-1/abc");
        assert_eq!(planned["name"], "n");
        assert_eq!(planned["state"], "started");

        let replaced = planned_state(&schema, Some(&prior), &json!({"type": "b", "image": "j"}), true);
        assert!(replaced.get("id").is_none());
    }

    #[test]
    fn test_whole_float_sizes_become_integers() {
        let mut config = json!({"type": "DEV1-S", "root_volume": {"size_in_gb": 20.0}});
        apply_defaults(&server_schema(), &mut config);
        assert_eq!(config["root_volume"]["size_in_gb"], json!(20));
        assert!(config["root_volume"]["size_in_gb"].is_i64());
        assert_eq!(config["state"], json!("started"));

        let mut fractional = json!({"root_volume": {"size_in_gb": 20.5}});
        apply_defaults(&server_schema(), &mut fractional);
        assert_eq!(fractional["root_volume"]["size_in_gb"], json!(20.5));
    }

    #[test]
    fn test_values_equal_numbers() {
        assert!(values_equal(&json!(20), &json!(20.0)));
        assert!(values_equal(&json!({"a": 1, "b": null}), &json!({"a": 1.0})));
        assert!(!values_equal(&json!([1, 2]), &json!([2, 1])));
    }
}
