//! Configuration checks run before any API call.
//!
//! [`validate`] walks a configuration against its [`Schema`] and collects
//! every problem it finds, so a practitioner fixes a bad `zone` and a
//! missing `type` in a single round trip.
//!
//! ```
//! use scaleway_provider::schema::{Attribute, Schema, Validator};
//! use scaleway_provider::validation::validate;
//! use serde_json::json;
//!
//! let schema = Schema::v0()
//!     .with_attribute("type", Attribute::required_string())
//!     .with_attribute("zone", Attribute::optional_string().with_validator(Validator::Zone));
//!
//! assert!(validate(&schema, &json!({"type": "DEV1-S", "zone": "fr-par-1"})).is_empty());
//! assert_eq!(validate(&schema, &json!({"zone": "mars"})).len(), 2);
//! ```

use crate::locality::{expand_id, Region, Zone};
use crate::schema::{
    Attribute, AttributeType, Block, BlockNestingMode, Diagnostic, NestedBlock, Schema, Validator,
};
use base64::Engine;
use serde_json::Value;

/// Every problem in `config`, in schema order. Empty means valid.
///
/// Computed-only attributes are never checked. A value's validators only
/// run once its type is right.
pub fn validate(schema: &Schema, config: &Value) -> Vec<Diagnostic> {
    let mut checker = Checker::default();
    checker.block(&schema.block, config, "");
    checker.found
}

/// Why `value` fails `validator`, if it does.
pub fn check(validator: &Validator, value: &Value) -> Result<(), String> {
    match validator {
        Validator::IntRange { min, max } => match whole_number(value) {
            Some(n) if (*min..=*max).contains(&n) => Ok(()),
            Some(n) => Err(format!("expected a value between {} and {}, got {}", min, max, n)),
            None => Err("expected an integer".into()),
        },
        Validator::IntAtLeast(min) => match whole_number(value) {
            Some(n) if n >= *min => Ok(()),
            Some(n) => Err(format!("expected a value of at least {}, got {}", min, n)),
            None => Err("expected an integer".into()),
        },
        text => match value.as_str() {
            Some(s) => check_text(text, s),
            None => Err("expected a string".into()),
        },
    }
}

fn check_text(validator: &Validator, s: &str) -> Result<(), String> {
    let standard = base64::engine::general_purpose::STANDARD;
    match validator {
        Validator::Uuid => is_uuid(s)
            .then_some(())
            .ok_or_else(|| format!("{:?} is not a UUID", s)),
        Validator::UuidOrLocalizedId => {
            let bare = expand_id(s).map_err(|e| e.to_string())?;
            is_uuid(&bare)
                .then_some(())
                .ok_or_else(|| format!("{:?} is neither a UUID nor a localized UUID", s))
        },
        Validator::Zone => Zone::parse(s).map(drop).map_err(|e| e.to_string()),
        Validator::Region => Region::parse(s).map(drop).map_err(|e| e.to_string()),
        Validator::OneOf(allowed) => allowed
            .iter()
            .any(|a| a == s)
            .then_some(())
            .ok_or_else(|| format!("expected one of [{}], got {:?}", allowed.join(", "), s)),
        Validator::StringLength { min, max } => {
            let len = s.chars().count();
            (*min..=*max)
                .contains(&len)
                .then_some(())
                .ok_or_else(|| format!("expected length between {} and {}, got {}", min, max, len))
        },
        Validator::Base64 => standard
            .decode(s.trim())
            .map(drop)
            .map_err(|e| format!("invalid base64: {}", e)),
        Validator::Json => serde_json::from_str::<Value>(s)
            .map(drop)
            .map_err(|e| format!("invalid JSON: {}", e)),
        Validator::SshPublicKey => {
            let mut fields = s.split_whitespace();
            let key_type = fields.next().ok_or("empty SSH key")?;
            if !["ssh-", "ecdsa-", "sk-"].iter().any(|p| key_type.starts_with(p)) {
                return Err(format!("unsupported SSH key type {:?}", key_type));
            }
            let material = fields.next().ok_or("SSH key has no key material")?;
            standard
                .decode(material)
                .map(drop)
                .map_err(|_| "SSH key material is not base64".to_string())
        },
        Validator::IntRange { .. } | Validator::IntAtLeast(_) => Err("expected an integer".into()),
    }
}

fn is_uuid(s: &str) -> bool {
    uuid::Uuid::parse_str(s).is_ok()
}

#[derive(Default)]
struct Checker {
    found: Vec<Diagnostic>,
}

impl Checker {
    fn report(&mut self, path: &str, summary: String, detail: Option<String>) {
        let mut diagnostic = Diagnostic::error(summary);
        if let Some(detail) = detail {
            diagnostic = diagnostic.with_detail(detail);
        }
        if !path.is_empty() {
            diagnostic = diagnostic.with_attribute(path);
        }
        self.found.push(diagnostic);
    }

    fn wrong_type(&mut self, path: &str, expected: &str, got: &Value) {
        self.report(
            path,
            format!("Invalid type for attribute '{}'", path),
            Some(format!("Expected {}, got {}", expected, kind_of(got))),
        );
    }

    fn block(&mut self, block: &Block, value: &Value, path: &str) {
        let fields = match value {
            Value::Object(fields) => fields,
            Value::Null => return,
            other => {
                self.report(path, "Expected object".into(), Some(format!("Got {}", kind_of(other))));
                return;
            },
        };
        for (name, attr) in &block.attributes {
            self.attribute(attr, fields.get(name), &join_path(path, name));
        }
        for (name, nested) in &block.blocks {
            self.nested(nested, fields.get(name), &join_path(path, name));
        }
    }

    fn attribute(&mut self, attr: &Attribute, value: Option<&Value>, path: &str) {
        if attr.flags.is_computed_only() {
            return;
        }
        let Some(value) = value.filter(|v| !v.is_null()) else {
            if attr.flags.required {
                self.report(
                    path,
                    format!("Missing required attribute '{}'", path),
                    Some("This attribute is required and must be provided".into()),
                );
            }
            return;
        };

        let before = self.found.len();
        self.value_type(&attr.attr_type, value, path);
        if self.found.len() > before {
            return;
        }

        // Validators on a list apply to each element.
        let items: Vec<(String, &Value)> = match value {
            Value::Array(elements) => elements
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("{}.{}", path, i), v))
                .collect(),
            single => vec![(path.to_string(), single)],
        };
        for validator in &attr.validators {
            for (item_path, item) in &items {
                if let Err(reason) = check(validator, item) {
                    self.report(item_path, format!("Invalid value for '{}'", item_path), Some(reason));
                }
            }
        }
    }

    fn value_type(&mut self, expected: &AttributeType, value: &Value, path: &str) {
        match (expected, value) {
            (AttributeType::String, Value::String(_))
            | (AttributeType::Bool, Value::Bool(_))
            | (AttributeType::Float64, Value::Number(_))
            | (AttributeType::Dynamic, _) => {},
            (AttributeType::Int64, v) if whole_number(v).is_some() => {},
            (AttributeType::List(element) | AttributeType::Set(element), Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    self.value_type(element, item, &format!("{}.{}", path, i));
                }
            },
            (AttributeType::Map(element), Value::Object(entries)) => {
                for (key, item) in entries {
                    self.value_type(element, item, &format!("{}.{}", path, key));
                }
            },
            (AttributeType::Object(fields), Value::Object(entries)) => {
                for (name, field_type) in fields {
                    if let Some(item) = entries.get(name) {
                        self.value_type(field_type, item, &join_path(path, name));
                    }
                }
            },
            (expected, got) => self.wrong_type(path, type_name(expected), got),
        }
    }

    fn nested(&mut self, nested: &NestedBlock, value: Option<&Value>, path: &str) {
        let value = value.filter(|v| !v.is_null());
        match (nested.nesting_mode, value) {
            (_, None) => {
                if nested.min_items > 0 {
                    self.report(
                        path,
                        format!("Block '{}' requires at least {} item(s)", path, nested.min_items),
                        None,
                    );
                }
            },
            (BlockNestingMode::Single, Some(single)) => self.block(&nested.block, single, path),
            (BlockNestingMode::List | BlockNestingMode::Set, Some(Value::Array(items))) => {
                self.item_count(nested, items.len(), path);
                for (i, item) in items.iter().enumerate() {
                    self.block(&nested.block, item, &format!("{}.{}", path, i));
                }
            },
            (BlockNestingMode::Map, Some(Value::Object(entries))) => {
                self.item_count(nested, entries.len(), path);
                for (key, item) in entries {
                    self.block(&nested.block, item, &format!("{}.{}", path, key));
                }
            },
            (mode, Some(other)) => {
                let shape = if mode == BlockNestingMode::Map { "map" } else { "list" };
                self.report(
                    path,
                    format!("Expected {} for block '{}'", shape, path),
                    Some(format!("Got {}", kind_of(other))),
                );
            },
        }
    }

    fn item_count(&mut self, nested: &NestedBlock, len: usize, path: &str) {
        let len = u32::try_from(len).unwrap_or(u32::MAX);
        if len < nested.min_items {
            self.report(
                path,
                format!("Block '{}' requires at least {} item(s), got {}", path, nested.min_items, len),
                None,
            );
        }
        if nested.max_items > 0 && len > nested.max_items {
            self.report(
                path,
                format!("Block '{}' allows at most {} item(s), got {}", path, nested.max_items, len),
                None,
            );
        }
    }
}

pub(crate) fn join_path(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", base, name)
    }
}

/// Null, `""` and empty collections all mean "not set".
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

// `20.0` is accepted as an int64: some hosts encode every number as a float.
pub(crate) fn whole_number(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < 9.2e18)
            .map(|f| f as i64)
    })
}

fn type_name(attr_type: &AttributeType) -> &'static str {
    match attr_type {
        AttributeType::String => "string",
        AttributeType::Int64 => "int64",
        AttributeType::Float64 => "float64",
        AttributeType::Bool => "bool",
        AttributeType::List(_) => "list",
        AttributeType::Set(_) => "set",
        AttributeType::Map(_) => "map",
        AttributeType::Object(_) => "object",
        AttributeType::Dynamic => "any",
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, Block, NestedBlock, Schema};
    use serde_json::json;
    use std::collections::BTreeMap;

    const SERVER: &str = "fr-par-1/11111111-1111-1111-1111-111111111111";

    fn ip_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "type",
                Attribute::required_string().with_validator(Validator::one_of(&["nat", "routed_ipv4"])),
            )
            .with_attribute("zone", Attribute::optional_string().with_validator(Validator::Zone))
            .with_attribute("server_id", Attribute::optional_string().id_reference())
            .with_attribute("tags", Attribute::optional_string_list())
    }

    #[test]
    fn test_valid_ip_config() {
        let config = json!({"type": "routed_ipv4", "zone": "nl-ams-1", "server_id": SERVER, "tags": ["web"]});
        assert!(validate(&ip_schema(), &config).is_empty());
        assert!(validate(&ip_schema(), &json!({"type": "nat", "server_id": null})).is_empty());
    }

    #[test]
    fn test_every_problem_is_reported() {
        let config = json!({"zone": "mars", "server_id": "not-an-id", "tags": ["web", 7]});
        let diagnostics = validate(&ip_schema(), &config);

        let paths: Vec<_> = diagnostics.iter().filter_map(|d| d.attribute.as_deref()).collect();
        assert_eq!(paths, ["server_id", "tags.1", "type", "zone"]);
        assert!(diagnostics.iter().all(Diagnostic::is_error));
        assert_eq!(diagnostics[2].summary, "Missing required attribute 'type'");
    }

    #[test]
    fn test_computed_id_is_not_checked() {
        let config = json!({"type": "nat", "id": 42});
        assert!(validate(&ip_schema(), &config).is_empty());
    }

    #[test]
    fn test_sizes_must_be_whole_numbers() {
        let schema = Schema::v0().with_attribute(
            "size_in_gb",
            Attribute::required_int64().with_validator(Validator::IntAtLeast(1)),
        );
        assert!(validate(&schema, &json!({"size_in_gb": 20})).is_empty());
        assert!(validate(&schema, &json!({"size_in_gb": 20.0})).is_empty());

        let fractional = validate(&schema, &json!({"size_in_gb": 20.5}));
        assert_eq!(fractional[0].detail.as_deref(), Some("Expected int64, got number"));

        let zero = validate(&schema, &json!({"size_in_gb": 0}));
        assert_eq!(zero[0].summary, "Invalid value for 'size_in_gb'");
        assert_eq!(validate(&schema, &json!({"size_in_gb": "20"})).len(), 1);
        assert_eq!(validate(&schema, &json!({"size_in_gb": 0.0})).len(), 1);
    }

    #[test]
    fn test_range_accepts_whole_floats() {
        let port = Validator::IntRange { min: 1, max: 65535 };
        assert!(check(&port, &json!(443.0)).is_ok());
        assert!(check(&port, &json!(0.0)).is_err());
        assert_eq!(check(&port, &json!(80.5)), Err("expected an integer".to_string()));
        assert_eq!(whole_number(&json!(20.0)), Some(20));
        assert_eq!(whole_number(&json!(1e19)), None);
    }

    #[test]
    fn test_labels_map_values() {
        let schema = Schema::v0().with_attribute(
            "labels",
            Attribute::new(AttributeType::map(AttributeType::String), AttributeFlags::optional()),
        );
        let diagnostics = validate(&schema, &json!({"labels": {"env": "prod", "replicas": 3}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("labels.replicas"));
        assert_eq!(validate(&schema, &json!({"labels": ["env"]})).len(), 1);
    }

    #[test]
    fn test_root_volume_block() {
        let schema = Schema::v0().with_block(
            "root_volume",
            NestedBlock::single(Block::new().with_attribute("size_in_gb", Attribute::required_int64())),
        );
        assert!(validate(&schema, &json!({})).is_empty());
        assert!(validate(&schema, &json!({"root_volume": {"size_in_gb": 20}})).is_empty());

        let diagnostics = validate(&schema, &json!({"root_volume": {"size_in_gb": "big"}}));
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("root_volume.size_in_gb"));
        assert_eq!(validate(&schema, &json!({"root_volume": 20}))[0].summary, "Expected object");
    }

    #[test]
    fn test_statement_count_bounds() {
        let schema = Schema::v0().with_block(
            "statement",
            NestedBlock::list(Block::new().with_attribute("effect", Attribute::required_string()))
                .with_min_items(1)
                .with_max_items(2),
        );

        let empty = validate(&schema, &json!({"statement": []}));
        assert_eq!(empty[0].summary, "Block 'statement' requires at least 1 item(s), got 0");
        assert_eq!(validate(&schema, &json!({}))[0].summary, "Block 'statement' requires at least 1 item(s)");

        let three = json!({"statement": [{"effect": "Allow"}, {"effect": "Deny"}, {"effect": "Allow"}]});
        assert!(validate(&schema, &three)[0].summary.contains("at most 2"));

        let missing = validate(&schema, &json!({"statement": [{}]}));
        assert_eq!(missing[0].attribute.as_deref(), Some("statement.0.effect"));
        assert!(validate(&schema, &json!({"statement": {"effect": "Allow"}}))[0]
            .summary
            .starts_with("Expected list"));
    }

    #[test]
    fn test_object_fields() {
        let fields = BTreeMap::from([
            ("host".to_string(), AttributeType::String),
            ("port".to_string(), AttributeType::Int64),
        ]);
        let schema = Schema::v0().with_attribute(
            "endpoint",
            Attribute::new(AttributeType::Object(fields), AttributeFlags::required()),
        );
        let diagnostics = validate(&schema, &json!({"endpoint": {"host": "10.0.0.1", "port": "80"}}));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute.as_deref(), Some("endpoint.port"));
    }

    #[test]
    fn test_top_level_must_be_an_object() {
        let diagnostics = validate(&ip_schema(), &json!("nat"));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].attribute, None);
    }

    #[test]
    fn test_text_validators() {
        assert!(check(&Validator::Base64, &json!("aGVsbG8=")).is_ok());
        assert!(check(&Validator::Base64, &json!("%%%")).is_err());
        assert!(check(&Validator::Json, &json!(r#"{"Version": "2012-10-17"}"#)).is_ok());
        assert!(check(&Validator::Json, &json!("{")).is_err());
        assert!(check(&Validator::Uuid, &json!("11111111-1111-1111-1111-111111111111")).is_ok());
        assert!(check(&Validator::Uuid, &json!(SERVER)).is_err());
        assert!(check(&Validator::UuidOrLocalizedId, &json!(SERVER)).is_ok());
        assert!(check(&Validator::Region, &json!("pl-waw")).is_ok());
        assert!(check(&Validator::StringLength { min: 1, max: 3 }, &json!("abcd")).is_err());
        assert!(check(&Validator::IntRange { min: 1, max: 65535 }, &json!(65536)).is_err());
        assert!(check(&Validator::Zone, &json!(1)).is_err());
    }

    #[test]
    fn test_ssh_keys() {
        let key = |k: &str| check(&Validator::SshPublicKey, &json!(k));
        assert!(key("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIEFH user@host").is_ok());
        assert!(key("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIE5 user@host").is_err());
        assert!(key("rsa AAAA").is_err());
        assert!(key("ssh-rsa").is_err());
        assert!(key("").is_err());
    }
}
