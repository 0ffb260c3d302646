//! Translation between state values and Scaleway API objects.
//!
//! [`expand`] walks the schema to build a request body; [`flatten`] walks it
//! the other way to turn an API object back into state. Attribute
//! `api_name`s may be dotted (`public_ip.address`) to reach into nested
//! objects.

use serde_json::{Map, Value};

use crate::locality::{expand_id, Locality};
use crate::schema::{Attribute, Block, BlockNestingMode, NestedBlock, Schema};
use crate::validation::is_empty;

/// Build the full request body of a create call.
pub fn expand(schema: &Schema, state: &Value) -> Value {
    let mut body = Map::new();
    if let Some(obj) = state.as_object() {
        expand_block(&schema.block, obj, None, &mut body);
    }
    Value::Object(body)
}

/// Build a request body holding only the given top-level members.
pub fn expand_fields(schema: &Schema, state: &Value, roots: &[String]) -> Value {
    let mut body = Map::new();
    if let Some(obj) = state.as_object() {
        expand_block(&schema.block, obj, Some(roots), &mut body);
    }
    Value::Object(body)
}

fn expand_block(
    block: &Block,
    state: &Map<String, Value>,
    only: Option<&[String]>,
    body: &mut Map<String, Value>,
) {
    let wanted = |name: &str| only.map_or(true, |roots| roots.iter().any(|r| r == name));

    for (name, attr) in &block.attributes {
        if !wanted(name) || attr.api_skip || attr.flags.is_computed_only() {
            continue;
        }
        let value = match state.get(name) {
            Some(value) if !value.is_null() => expand_value(attr, value),
            // Patching a cleared attribute sends an explicit null.
            _ if only.is_some() => Value::Null,
            _ => continue,
        };
        set_path(body, attr.api_path(name), value);
    }

    for (name, nested) in &block.blocks {
        if !wanted(name) {
            continue;
        }
        let Some(value) = state.get(name).filter(|v| !is_empty(v)) else {
            if only.is_some() {
                set_path(body, nested_api_path(nested, name), Value::Null);
            }
            continue;
        };
        set_path(body, nested_api_path(nested, name), expand_nested(nested, value));
    }
}

fn expand_value(attr: &Attribute, value: &Value) -> Value {
    if !attr.id_reference {
        return value.clone();
    }
    match value {
        Value::String(s) => Value::String(expand_id(s).unwrap_or_else(|_| s.clone())),
        Value::Array(items) => Value::Array(items.iter().map(|v| expand_value(attr, v)).collect()),
        other => other.clone(),
    }
}

fn expand_nested(nested: &NestedBlock, value: &Value) -> Value {
    let expand_one = |item: &Value| {
        let mut body = Map::new();
        if let Some(obj) = item.as_object() {
            expand_block(&nested.block, obj, None, &mut body);
        }
        Value::Object(body)
    };
    match (nested.nesting_mode, value) {
        (BlockNestingMode::Single, Value::Array(items)) => {
            items.first().map(expand_one).unwrap_or(Value::Null)
        },
        (BlockNestingMode::Single, item) => expand_one(item),
        (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
            Value::Array(items.iter().map(expand_one).collect())
        },
        (BlockNestingMode::Map, Value::Object(items)) => Value::Object(
            items
                .iter()
                .map(|(k, v)| (k.clone(), expand_one(v)))
                .collect(),
        ),
        (_, other) => other.clone(),
    }
}

fn nested_api_path<'a>(nested: &'a NestedBlock, name: &'a str) -> &'a str {
    nested.api_name.as_deref().unwrap_or(name)
}

/// Turn an API object into state.
///
/// Attributes the API does not return keep their `prior` value when they
/// are write-only or engine-managed. Id references are returned in
/// composite form in `locality`.
pub fn flatten(schema: &Schema, api: &Value, prior: &Value, locality: &Locality) -> Value {
    let empty = Map::new();
    let api = api.as_object().unwrap_or(&empty);
    let prior = prior.as_object().unwrap_or(&empty);
    Value::Object(flatten_block(&schema.block, api, prior, locality))
}

fn flatten_block(
    block: &Block,
    api: &Map<String, Value>,
    prior: &Map<String, Value>,
    locality: &Locality,
) -> Map<String, Value> {
    let mut state = Map::new();

    for (name, attr) in &block.attributes {
        let from_api = if attr.api_skip {
            None
        } else {
            get_path(api, attr.api_path(name)).filter(|v| !v.is_null())
        };
        let value = match from_api {
            Some(value) => flatten_value(attr, value, locality),
            None if attr.write_only || attr.api_skip => match prior.get(name) {
                Some(previous) => previous.clone(),
                None => continue,
            },
            None => continue,
        };
        state.insert(name.clone(), value);
    }

    for (name, nested) in &block.blocks {
        let Some(value) = get_path(api, nested_api_path(nested, name)).filter(|v| !v.is_null())
        else {
            continue;
        };
        let prior_value = prior.get(name);
        let flattened = match (nested.nesting_mode, value) {
            (BlockNestingMode::Single, Value::Object(obj)) => {
                let prior_obj = prior_value.and_then(single_object);
                Value::Object(flatten_block(
                    &nested.block,
                    obj,
                    prior_obj.unwrap_or(&Map::new()),
                    locality,
                ))
            },
            (BlockNestingMode::List | BlockNestingMode::Set, Value::Array(items)) => {
                let prior_items = prior_value.and_then(Value::as_array);
                Value::Array(
                    items
                        .iter()
                        .enumerate()
                        .map(|(i, item)| {
                            let prior_item = prior_items
                                .and_then(|p| p.get(i))
                                .and_then(Value::as_object);
                            Value::Object(flatten_block(
                                &nested.block,
                                item.as_object().unwrap_or(&Map::new()),
                                prior_item.unwrap_or(&Map::new()),
                                locality,
                            ))
                        })
                        .collect(),
                )
            },
            (BlockNestingMode::Map, Value::Object(items)) => Value::Object(
                items
                    .iter()
                    .map(|(k, item)| {
                        let prior_item = prior_value
                            .and_then(|p| p.get(k))
                            .and_then(Value::as_object);
                        (
                            k.clone(),
                            Value::Object(flatten_block(
                                &nested.block,
                                item.as_object().unwrap_or(&Map::new()),
                                prior_item.unwrap_or(&Map::new()),
                                locality,
                            )),
                        )
                    })
                    .collect(),
            ),
            (_, other) => other.clone(),
        };
        state.insert(name.clone(), flattened);
    }

    state
}

fn single_object(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(obj) => Some(obj),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

fn flatten_value(attr: &Attribute, value: &Value, locality: &Locality) -> Value {
    if !attr.id_reference {
        return value.clone();
    }
    match value {
        Value::String(s) if !s.contains('/') && !s.is_empty() => {
            Value::String(locality.format_id(s))
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| flatten_value(attr, v, locality))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Read a dotted path from an object.
pub fn get_path<'a>(obj: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = obj.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a dotted path into an object, creating intermediate objects.
pub fn set_path(obj: &mut Map<String, Value>, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            obj.insert(path.to_string(), value);
        },
        Some((head, rest)) => {
            let child = obj
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(child) = child {
                set_path(child, rest, value);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::Zone;
    use crate::schema::{Attribute, NestedBlock};
    use serde_json::json;

    const IP: &str = "11111111-1111-1111-1111-111111111111";

    fn schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("zone", Attribute::optional_computed_string().api_skip())
            .with_attribute("type", Attribute::required_string().with_api_name("commercial_type"))
            .with_attribute(
                "ip_id",
                Attribute::optional_string()
                    .id_reference()
                    .with_api_name("public_ip.id"),
            )
            .with_attribute(
                "public_ip",
                Attribute::computed_string().with_api_name("public_ip.address"),
            )
            .with_attribute("user_data", Attribute::optional_string().write_only())
            .with_block(
                "root_volume",
                NestedBlock::single(
                    Block::new().with_attribute("size_in_gb", Attribute::optional_int64()),
                ),
            )
    }

    fn zone() -> Locality {
        Locality::Zone(Zone::parse("fr-par-1").unwrap())
    }

    #[test]
    fn test_expand() {
        let body = expand(
            &schema(),
            &json!({
                "id": "ignored",
                "zone": "fr-par-1",
                "type": "DEV1-S",
                "ip_id": format!("fr-par-1/{}", IP),
                "user_data": "secret",
                "root_volume": [{"size_in_gb": 20}],
            }),
        );
        assert_eq!(
            body,
            json!({
                "commercial_type": "DEV1-S",
                "public_ip": {"id": IP},
                "user_data": "secret",
                "root_volume": {"size_in_gb": 20},
            })
        );
    }

    #[test]
    fn test_expand_fields_sends_nulls_for_cleared() {
        let body = expand_fields(
            &schema(),
            &json!({"type": "DEV1-M"}),
            &["type".to_string(), "ip_id".to_string()],
        );
        assert_eq!(body, json!({"commercial_type": "DEV1-M", "public_ip": {"id": null}}));
    }

    #[test]
    fn test_flatten() {
        let api = json!({
            "id": IP,
            "commercial_type": "DEV1-S",
            "public_ip": {"id": IP, "address": "51.15.0.1"},
            "root_volume": {"size_in_gb": 20, "volume_type": "l_ssd"},
        });
        let prior = json!({"zone": "fr-par-1", "user_data": "secret"});
        let state = flatten(&schema(), &api, &prior, &zone());
        assert_eq!(state["type"], "DEV1-S");
        assert_eq!(state["ip_id"], format!("fr-par-1/{}", IP));
        assert_eq!(state["public_ip"], "51.15.0.1");
        assert_eq!(state["user_data"], "secret");
        assert_eq!(state["zone"], "fr-par-1");
        assert_eq!(state["root_volume"], json!({"size_in_gb": 20}));
        // `id` is owned by the dispatcher, which stores the composite form.
        assert_eq!(state["id"], IP);
    }

    #[test]
    fn test_paths() {
        let mut obj = Map::new();
        set_path(&mut obj, "a.b.c", json!(1));
        set_path(&mut obj, "a.d", json!(2));
        assert_eq!(Value::Object(obj.clone()), json!({"a": {"b": {"c": 1}, "d": 2}}));
        assert_eq!(get_path(&obj, "a.b.c"), Some(&json!(1)));
        assert_eq!(get_path(&obj, "a.x"), None);
    }
}
