//! Block storage volumes.

use serde_json::{json, Value};

use crate::locality::LocalityKind;
use crate::planner::TransitionRule;
use crate::resource::{Endpoint, Hooks, Naming, ResourceDescriptor, StateMachine};
use crate::schema::{Attribute, Schema, Validator};
use crate::validation::whole_number;

use super::{id, name, project_id, tags, zone};

const BYTES_PER_GB: u64 = 1_000_000_000;

/// Largest block volume the API provisions, 10 TB.
const MAX_SIZE_IN_GB: i64 = 10_000;

const VOLUME_RULES: &[TransitionRule] = &[TransitionRule::GrowOnly {
    field: "size_in_gb",
    message: "block volumes cannot be resized down",
}];

const VOLUME_STATES: StateMachine = StateMachine {
    field: "status",
    transitional: &["creating", "resizing", "updating", "snapshotting"],
    terminal: &["available", "in_use"],
    failure: &["error"],
    deleted: &[],
    async_delete: true,
};

/// `scaleway_block_volume`. The API counts bytes; state counts GB.
pub fn volume() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("name", name())
        .with_attribute(
            "size_in_gb",
            Attribute::optional_int64()
                .computed()
                .with_validator(Validator::IntRange {
                    min: 1,
                    max: MAX_SIZE_IN_GB,
                }),
        )
        .with_attribute(
            "iops",
            Attribute::optional_int64()
                .computed()
                .with_default(json!(5000))
                .with_api_name("specs.perf_iops")
                .with_validator(Validator::IntAtLeast(1)),
        )
        .with_attribute("snapshot_id", Attribute::optional_string().with_force_new().id_reference())
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("zone", zone());

    ResourceDescriptor::new(
        "scaleway_block_volume",
        LocalityKind::Zonal,
        Endpoint::new("block/v1alpha1", "volumes"),
        schema,
    )
    .with_states(VOLUME_STATES)
    .with_rules(VOLUME_RULES)
    .with_naming(Naming::Random("vol"))
    .with_hooks(Hooks {
        expand: Some(expand_volume),
        flatten: Some(flatten_volume),
    })
    .sweep(10)
}

fn expand_volume(_state: &Value, body: &mut Value) {
    let Some(body) = body.as_object_mut() else {
        return;
    };
    if let Some(gb) = body.remove("size_in_gb") {
        let size = whole_number(&gb)
            .and_then(|gb| u64::try_from(gb).ok())
            .and_then(|gb| gb.checked_mul(BYTES_PER_GB))
            .map_or(Value::Null, |bytes| json!(bytes));
        body.insert("size".to_string(), size);
    }
}

fn flatten_volume(api: &Value, state: &mut Value) {
    if let (Some(size), Some(state)) = (api.get("size").and_then(Value::as_u64), state.as_object_mut()) {
        state.insert("size_in_gb".to_string(), json!(size / BYTES_PER_GB));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher;

    #[test]
    fn test_size_is_sent_in_bytes() {
        let mut body = json!({"name": "v", "size_in_gb": 20});
        expand_volume(&json!({}), &mut body);
        assert_eq!(body, json!({"name": "v", "size": 20_000_000_000u64}));

        let mut float = json!({"size_in_gb": 20.0});
        expand_volume(&json!({}), &mut float);
        assert_eq!(float, json!({"size": 20_000_000_000u64}));

        let mut huge = json!({"size_in_gb": 20_000_000_000u64});
        expand_volume(&json!({}), &mut huge);
        assert_eq!(huge, json!({"size": null}));

        let mut untouched = json!({"tags": ["a"]});
        expand_volume(&json!({}), &mut untouched);
        assert_eq!(untouched, json!({"tags": ["a"]}));
    }

    #[test]
    fn test_size_is_bounded_before_any_call() {
        let volume = volume();
        let too_big = dispatcher::validate(&volume, &json!({"size_in_gb": 20_000_000_000u64}));
        assert_eq!(too_big.len(), 1);
        assert_eq!(too_big[0].attribute.as_deref(), Some("size_in_gb"));
        assert!(dispatcher::validate(&volume, &json!({"size_in_gb": 10_000})).is_empty());
        assert!(dispatcher::validate(&volume, &json!({"size_in_gb": 20.0})).is_empty());
    }

    #[test]
    fn test_size_is_read_in_gb() {
        let mut state = json!({"name": "v"});
        flatten_volume(&json!({"size": 30_000_000_000u64}), &mut state);
        assert_eq!(state["size_in_gb"], 30);
    }
}
