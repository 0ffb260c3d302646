//! Update planning.
//!
//! Given the changes between prior and desired state, the planner emits
//! the ordered list of API calls that converges the resource in place.
//! Each resource kind declares its ordering constraints as a table of
//! [`TransitionRule`]s:
//!
//! - fields patched through their own call, ordered by priority
//!   (an IP's `type` migrates through a dedicated PATCH, keeping its id);
//! - fields that only allow some transitions (`nat` to `routed_ipv4`);
//! - fields that only grow (block volume size);
//! - mutually exclusive variants of a block (load balancer health checks);
//! - a power state machine, for servers whose `type` or `image` can only
//!   change while stopped and whose desired `state` is applied last.
//!
//! The dispatcher executes the steps in order and runs the resource's
//! waiter after each one.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::mapping::expand_fields;
use crate::schema::Schema;
use crate::types::AttributeChange;
use crate::validation::is_empty;

/// An ordering or validity constraint of one resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRule {
    /// The field is changed through its own PATCH rather than the bulk
    /// one. Lower priorities run first.
    OwnPatch {
        /// Top-level attribute.
        field: &'static str,
        /// Position among own patches.
        priority: u32,
    },
    /// Only the listed `(from, to)` transitions can be made in place.
    Transitions {
        /// Top-level attribute.
        field: &'static str,
        /// Allowed transitions.
        allowed: &'static [(&'static str, &'static str)],
    },
    /// Numeric field that can only increase.
    GrowOnly {
        /// Attribute path, possibly dotted.
        field: &'static str,
        /// Error reported when it would shrink.
        message: &'static str,
    },
    /// Exactly one of the variants of a block must be set.
    ExactlyOne {
        /// The block.
        block: &'static str,
        /// Its mutually exclusive members.
        variants: &'static [&'static str],
    },
    /// A power state machine.
    Power(PowerRule),
}

/// Power state handling of a server-like resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PowerRule {
    /// The attribute holding the desired power state.
    pub field: &'static str,
    /// Attributes that can only change while powered off.
    pub requires_stopped: &'static [&'static str],
    /// Sub-path of the action endpoint.
    pub action_path: &'static str,
    /// Power state the resource is in right after creation.
    pub initial: PowerState,
}

/// Desired power state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    /// Running.
    Started,
    /// Powered off.
    Stopped,
    /// Stopped in place, keeping its hypervisor slot.
    Standby,
}

impl PowerState {
    /// Parse the state attribute value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "started" => Some(Self::Started),
            "stopped" => Some(Self::Stopped),
            "standby" => Some(Self::Standby),
            _ => None,
        }
    }

    /// The state attribute value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Standby => "standby",
        }
    }

    /// Map a server state reported by the API.
    pub fn from_api(state: &str) -> Option<Self> {
        match state {
            "running" => Some(Self::Started),
            "stopped" => Some(Self::Stopped),
            "stopped in place" => Some(Self::Standby),
            _ => None,
        }
    }

    /// Actions that take a server from `from` to `self`.
    pub fn actions_from(self, from: PowerState) -> &'static [&'static str] {
        match (from, self) {
            (from, to) if from == to => &[],
            (_, Self::Started) => &["poweron"],
            (_, Self::Stopped) => &["poweroff"],
            (Self::Started, Self::Standby) => &["stop_in_place"],
            (_, Self::Standby) => &["poweron", "stop_in_place"],
        }
    }
}

/// One API call of an update.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// PATCH the resource.
    Patch {
        /// The attributes changed by this call.
        fields: Vec<String>,
        /// The request body.
        body: Value,
    },
    /// POST to a sub-path of the resource.
    Action {
        /// The sub-path, such as `action`.
        path: &'static str,
        /// The request body.
        body: Value,
    },
}

impl Step {
    fn power(path: &'static str, action: &str) -> Self {
        Self::Action {
            path,
            body: json!({ "action": action }),
        }
    }

    /// A short description for logs and errors.
    pub fn describe(&self) -> String {
        match self {
            Self::Patch { fields, .. } => format!("patching {}", fields.join(", ")),
            Self::Action { path, body } => match body.get("action").and_then(Value::as_str) {
                Some(action) => format!("running {} action", action),
                None => format!("posting to {}", path),
            },
        }
    }
}

/// Check the planner's constraints without producing steps.
///
/// Every violated constraint is reported.
pub fn check(
    rules: &[TransitionRule],
    prior: Option<&Value>,
    desired: &Value,
    changes: &[AttributeChange],
) -> Result<(), ProviderError> {
    let mut problems = Vec::new();
    for rule in rules {
        match *rule {
            TransitionRule::Transitions { field, allowed } => {
                let Some(prior) = prior else { continue };
                if !changes.iter().any(|c| c.root() == field) {
                    continue;
                }
                let from = lookup(prior, field).and_then(Value::as_str).unwrap_or("");
                let to = lookup(desired, field).and_then(Value::as_str).unwrap_or("");
                if !allowed.iter().any(|(a, b)| *a == from && *b == to) {
                    problems.push(format!("{} cannot change from {:?} to {:?}", field, from, to));
                }
            },
            TransitionRule::GrowOnly { field, message } => {
                let Some(prior) = prior else { continue };
                let old = lookup(prior, field).and_then(Value::as_f64);
                let new = lookup(desired, field).and_then(Value::as_f64);
                if let (Some(old), Some(new)) = (old, new) {
                    if new < old {
                        problems.push(message.to_string());
                    }
                }
            },
            TransitionRule::ExactlyOne { block, variants } => {
                let Some(value) = lookup(desired, block).filter(|v| !is_empty(v)) else {
                    continue;
                };
                let set = variants
                    .iter()
                    .filter(|v| lookup(value, v).is_some_and(is_present))
                    .count();
                if set != 1 {
                    problems.push(format!(
                        "exactly one of {} must be set in {}, got {}",
                        variants.join(", "),
                        block,
                        set
                    ));
                }
            },
            TransitionRule::Power(power) => {
                if let Some(state) = lookup(desired, power.field).and_then(Value::as_str) {
                    if PowerState::parse(state).is_none() {
                        problems.push(format!("unknown {} {:?}", power.field, state));
                    }
                }
            },
            TransitionRule::OwnPatch { .. } => {},
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(ProviderError::Validation(problems.join("; ")))
    }
}

/// Plan an in-place update.
pub fn plan_update(
    schema: &Schema,
    rules: &[TransitionRule],
    prior: &Value,
    desired: &Value,
    changes: &[AttributeChange],
) -> Result<Vec<Step>, ProviderError> {
    let replacing: Vec<&str> = changes
        .iter()
        .filter(|c| c.requires_replace)
        .map(|c| c.path.as_str())
        .collect();
    if !replacing.is_empty() {
        return Err(ProviderError::Validation(format!(
            "{} cannot be changed in place, the resource must be replaced",
            replacing.join(", ")
        )));
    }
    check(rules, Some(prior), desired, changes)?;

    let roots: BTreeSet<&str> = changes.iter().map(AttributeChange::root).collect();
    let power = rules.iter().find_map(|rule| match rule {
        TransitionRule::Power(power) => Some(*power),
        _ => None,
    });

    let mut own: Vec<(u32, &'static str)> = rules
        .iter()
        .filter_map(|rule| match *rule {
            TransitionRule::OwnPatch { field, priority } if roots.contains(field) => {
                Some((priority, field))
            },
            _ => None,
        })
        .collect();
    own.sort();

    let bulk: Vec<String> = roots
        .iter()
        .filter(|root| power.map_or(true, |p| p.field != **root))
        .filter(|root| !own.iter().any(|(_, field)| field == *root))
        .filter(|root| schema.attribute(root).map_or(true, |attr| !attr.api_skip))
        .map(|root| root.to_string())
        .collect();

    let mut steps = Vec::new();

    let mut current_power = None;
    let mut target_power = None;
    if let Some(power) = power {
        let prior_state = lookup(prior, power.field)
            .and_then(Value::as_str)
            .and_then(PowerState::parse)
            .unwrap_or(PowerState::Started);
        let desired_state = lookup(desired, power.field)
            .and_then(Value::as_str)
            .and_then(PowerState::parse)
            .unwrap_or(prior_state);

        let touches_stopped_only = power.requires_stopped.iter().any(|field| {
            bulk.iter().any(|b| b == field) || own.iter().any(|(_, f)| f == field)
        });
        current_power = Some(prior_state);
        if touches_stopped_only && prior_state != PowerState::Stopped {
            for action in PowerState::Stopped.actions_from(prior_state) {
                steps.push(Step::power(power.action_path, action));
            }
            current_power = Some(PowerState::Stopped);
        }
        target_power = Some((power.action_path, desired_state));
    }

    if !bulk.is_empty() {
        steps.push(Step::Patch {
            body: expand_fields(schema, desired, &bulk),
            fields: bulk,
        });
    }

    for (_, field) in own {
        let fields = vec![field.to_string()];
        steps.push(Step::Patch {
            body: expand_fields(schema, desired, &fields),
            fields,
        });
    }

    if let (Some(current), Some((path, target))) = (current_power, target_power) {
        for action in target.actions_from(current) {
            steps.push(Step::power(path, action));
        }
    }

    Ok(steps)
}

/// Steps that bring a freshly created resource to its desired state.
pub fn plan_post_create(rules: &[TransitionRule], desired: &Value) -> Vec<Step> {
    let mut steps = Vec::new();
    for rule in rules {
        if let TransitionRule::Power(power) = rule {
            let target = lookup(desired, power.field)
                .and_then(Value::as_str)
                .and_then(PowerState::parse)
                .unwrap_or(PowerState::Started);
            for action in target.actions_from(power.initial) {
                steps.push(Step::power(power.action_path, action));
            }
        }
    }
    steps
}

/// An empty block such as `tcp {}` is present; null and `[]` are not.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Follow a dotted path through objects and single-element block lists.
fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in path.split('.') {
        current = match current {
            Value::Array(items) if items.len() == 1 => items[0].get(part)?,
            other => other.get(part)?,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::schema::{Attribute, Block, NestedBlock};

    const SERVER_RULES: &[TransitionRule] = &[TransitionRule::Power(PowerRule {
        field: "state",
        requires_stopped: &["type", "image", "root_volume"],
        action_path: "action",
        initial: PowerState::Stopped,
    })];

    const IP_RULES: &[TransitionRule] = &[
        TransitionRule::OwnPatch {
            field: "type",
            priority: 0,
        },
        TransitionRule::Transitions {
            field: "type",
            allowed: &[("nat", "routed_ipv4")],
        },
    ];

    const VOLUME_RULES: &[TransitionRule] = &[TransitionRule::GrowOnly {
        field: "size_in_gb",
        message: "block volumes cannot be resized down",
    }];

    fn server_schema() -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::optional_computed_string())
            .with_attribute("type", Attribute::required_string().with_api_name("commercial_type"))
            .with_attribute("image", Attribute::required_string())
            .with_attribute("tags", Attribute::optional_string_list())
            .with_attribute("state", Attribute::optional_computed_string().api_skip())
    }

    fn plan(schema: &Schema, rules: &[TransitionRule], prior: Value, desired: Value) -> Vec<Step> {
        let changes = diff(schema, Some(&prior), &desired);
        plan_update(schema, rules, &prior, &desired, &changes).unwrap()
    }

    fn actions(steps: &[Step]) -> Vec<String> {
        steps.iter().map(Step::describe).collect()
    }

    #[test]
    fn test_tags_change_while_running() {
        let steps = plan(
            &server_schema(),
            SERVER_RULES,
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "started", "tags": ["a"]}),
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "started", "tags": ["a", "b"]}),
        );
        assert_eq!(actions(&steps), vec!["patching tags"]);
    }

    #[test]
    fn test_type_change_stops_and_restarts() {
        let steps = plan(
            &server_schema(),
            SERVER_RULES,
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "started", "tags": []}),
            json!({"type": "DEV1-M", "image": "ubuntu", "state": "started", "tags": ["x"]}),
        );
        assert_eq!(
            actions(&steps),
            vec![
                "running poweroff action",
                "patching tags, type",
                "running poweron action"
            ]
        );
        assert_eq!(
            steps[1],
            Step::Patch {
                fields: vec!["tags".to_string(), "type".to_string()],
                body: json!({"commercial_type": "DEV1-M", "tags": ["x"]}),
            }
        );
    }

    #[test]
    fn test_type_change_on_stopped_server_stays_stopped() {
        let steps = plan(
            &server_schema(),
            SERVER_RULES,
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "stopped"}),
            json!({"type": "DEV1-M", "image": "ubuntu", "state": "stopped"}),
        );
        assert_eq!(actions(&steps), vec!["patching type"]);
    }

    #[test]
    fn test_state_is_applied_last() {
        let steps = plan(
            &server_schema(),
            SERVER_RULES,
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "started", "name": "a"}),
            json!({"type": "DEV1-S", "image": "ubuntu", "state": "standby", "name": "b"}),
        );
        assert_eq!(actions(&steps), vec!["patching name", "running stop_in_place action"]);
    }

    #[test]
    fn test_ip_type_migrates_through_own_patch() {
        let schema = Schema::v0()
            .with_attribute("type", Attribute::optional_computed_string())
            .with_attribute("tags", Attribute::optional_string_list());
        let steps = plan(
            &schema,
            IP_RULES,
            json!({"type": "nat", "tags": ["a"]}),
            json!({"type": "routed_ipv4", "tags": ["b"]}),
        );
        assert_eq!(
            steps,
            vec![
                Step::Patch {
                    fields: vec!["tags".to_string()],
                    body: json!({"tags": ["b"]}),
                },
                Step::Patch {
                    fields: vec!["type".to_string()],
                    body: json!({"type": "routed_ipv4"}),
                },
            ]
        );
    }

    #[test]
    fn test_ip_type_cannot_migrate_back() {
        let schema = Schema::v0().with_attribute("type", Attribute::optional_computed_string());
        let prior = json!({"type": "routed_ipv4"});
        let desired = json!({"type": "nat"});
        let changes = diff(&schema, Some(&prior), &desired);
        let err = plan_update(&schema, IP_RULES, &prior, &desired, &changes).unwrap_err();
        assert!(err.to_string().contains("cannot change from \"routed_ipv4\" to \"nat\""));
    }

    #[test]
    fn test_volume_only_grows() {
        let schema = Schema::v0().with_attribute("size_in_gb", Attribute::required_int64());
        let steps = plan(&schema, VOLUME_RULES, json!({"size_in_gb": 20}), json!({"size_in_gb": 30}));
        assert_eq!(actions(&steps), vec!["patching size_in_gb"]);

        let prior = json!({"size_in_gb": 30});
        let desired = json!({"size_in_gb": 10});
        let changes = diff(&schema, Some(&prior), &desired);
        let err = plan_update(&schema, VOLUME_RULES, &prior, &desired, &changes).unwrap_err();
        assert_eq!(err.to_string(), "validation: block volumes cannot be resized down");
    }

    #[test]
    fn test_health_check_exactly_one() {
        let rules = &[TransitionRule::ExactlyOne {
            block: "health_check",
            variants: &["tcp", "http", "https", "mysql"],
        }];
        let both = json!({"health_check": [{"tcp": [{}], "http": [{"uri": "/"}]}]});
        assert!(check(rules, None, &both, &[]).is_err());
        let none = json!({"health_check": [{"port": 80}]});
        assert!(check(rules, None, &none, &[]).is_err());
        let one = json!({"health_check": {"http": {"uri": "/"}}});
        assert!(check(rules, None, &one, &[]).is_ok());
    }

    #[test]
    fn test_force_new_change_is_rejected() {
        let schema = Schema::v0()
            .with_attribute("zone", Attribute::optional_string().with_force_new())
            .with_block(
                "root",
                NestedBlock::single(Block::new().with_attribute("x", Attribute::optional_int64())),
            );
        let prior = json!({"zone": "fr-par-1"});
        let desired = json!({"zone": "fr-par-2"});
        let changes = diff(&schema, Some(&prior), &desired);
        let err = plan_update(&schema, &[], &prior, &desired, &changes).unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[test]
    fn test_post_create_power_on() {
        assert_eq!(
            actions(&plan_post_create(SERVER_RULES, &json!({"state": "started"}))),
            vec!["running poweron action"]
        );
        assert!(plan_post_create(SERVER_RULES, &json!({"state": "stopped"})).is_empty());
        assert_eq!(
            actions(&plan_post_create(SERVER_RULES, &json!({"state": "standby"}))),
            vec!["running poweron action", "running stop_in_place action"]
        );
        assert!(plan_post_create(IP_RULES, &json!({})).is_empty());
    }
}
