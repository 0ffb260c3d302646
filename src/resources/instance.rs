//! Instance product: flexible IPs, servers and private NICs.

use serde_json::{json, Value};

use crate::locality::LocalityKind;
use crate::planner::{PowerRule, PowerState, TransitionRule};
use crate::resource::{
    DeleteMethod, Endpoint, IdScheme, Naming, ResourceDescriptor, StateMachine, Hooks,
};
use crate::schema::{Attribute, Block, NestedBlock, Schema, Validator};

use super::{id, name, project_id, tags, zone};

const PRODUCT: &str = "instance/v1";

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

const SERVER_RULES: &[TransitionRule] = &[TransitionRule::Power(PowerRule {
    field: "state",
    requires_stopped: &["type", "image", "root_volume"],
    action_path: "action",
    initial: PowerState::Stopped,
})];

const SERVER_STATES: StateMachine = StateMachine {
    field: "state",
    transitional: &["starting", "stopping"],
    terminal: &[],
    failure: &[],
    deleted: &[],
    async_delete: true,
};

const NIC_STATES: StateMachine = StateMachine {
    field: "state",
    transitional: &["syncing"],
    terminal: &[],
    failure: &["syncing_error"],
    deleted: &[],
    async_delete: false,
};

/// `scaleway_instance_ip`.
///
/// Moving from `nat` to `routed_ipv4` goes through its own PATCH and keeps
/// the id. A 403 on read means the IP was released.
pub fn ip() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("address", Attribute::computed_string())
        .with_attribute(
            "type",
            Attribute::optional_computed_string()
                .with_validator(Validator::one_of(&["nat", "routed_ipv4", "routed_ipv6"])),
        )
        .with_attribute("reverse", Attribute::optional_computed_string())
        .with_attribute(
            "server_id",
            Attribute::computed_string()
                .with_api_name("server.id")
                .id_reference(),
        )
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project"))
        .with_attribute("zone", zone());

    ResourceDescriptor::new(
        "scaleway_instance_ip",
        LocalityKind::Zonal,
        Endpoint::new(PRODUCT, "ips").envelope("ip"),
        schema,
    )
    .with_rules(IP_RULES)
    .read_gone_on_forbidden()
}

/// `scaleway_instance_server`.
pub fn server() -> ResourceDescriptor {
    let root_volume = Block::new()
        .with_attribute(
            "size_in_gb",
            Attribute::optional_int64()
                .computed()
                .with_validator(Validator::IntAtLeast(1)),
        )
        .with_attribute(
            "volume_type",
            Attribute::optional_computed_string()
                .with_validator(Validator::one_of(&["l_ssd", "b_ssd", "sbs_volume"])),
        );

    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("name", name())
        .with_attribute(
            "type",
            Attribute::required_string().with_api_name("commercial_type"),
        )
        .with_attribute("image", Attribute::required_string())
        .with_attribute(
            "state",
            Attribute::optional_computed_string()
                .api_skip()
                .with_default(json!(PowerState::Started.as_str()))
                .with_validator(Validator::one_of(&["started", "stopped", "standby"])),
        )
        .with_attribute(
            "ip_id",
            Attribute::optional_string()
                .with_api_name("public_ip.id")
                .id_reference(),
        )
        .with_attribute(
            "public_ip",
            Attribute::computed_string().with_api_name("public_ip.address"),
        )
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project"))
        .with_attribute("zone", zone())
        .with_block(
            "root_volume",
            NestedBlock::single(root_volume).with_max_items(1),
        );

    ResourceDescriptor::new(
        "scaleway_instance_server",
        LocalityKind::Zonal,
        Endpoint::new(PRODUCT, "servers").envelope("server"),
        schema,
    )
    .with_states(SERVER_STATES)
    .with_rules(SERVER_RULES)
    .with_naming(Naming::Random("srv"))
    .with_delete(DeleteMethod::Action {
        path: "action",
        action: "terminate",
    })
    .lock_on(&["ip_id"])
    .with_hooks(Hooks {
        expand: None,
        flatten: Some(flatten_server),
    })
    .sweep(0)
}

/// `scaleway_instance_private_nic`, identified by
/// `<zone>/<server_id>/<nic_id>`.
///
/// NICs of one server are created and deleted one at a time.
pub fn private_nic() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute(
            "server_id",
            Attribute::required_string().with_force_new().id_reference(),
        )
        .with_attribute(
            "private_network_id",
            Attribute::required_string().with_force_new().id_reference(),
        )
        .with_attribute("mac_address", Attribute::computed_string())
        .with_attribute("tags", tags())
        .with_attribute("zone", zone());

    ResourceDescriptor::new(
        "scaleway_instance_private_nic",
        LocalityKind::Zonal,
        Endpoint::new(PRODUCT, "private_nics")
            .envelope("private_nic")
            .parent("servers", "server_id"),
        schema,
    )
    .with_id(IdScheme::Nested)
    .with_states(NIC_STATES)
    .lock_on(&["server_id"])
}

/// The API reports `running`/`stopped`; state stores the desired-state
/// vocabulary. The image comes back as an object.
fn flatten_server(api: &Value, state: &mut Value) {
    let Some(state) = state.as_object_mut() else {
        return;
    };
    if let Some(power) = api
        .get("state")
        .and_then(Value::as_str)
        .and_then(PowerState::from_api)
    {
        state.insert("state".to_string(), json!(power.as_str()));
    }
    if let Some(image) = api.get("image").and_then(|i| i.get("id")) {
        state.insert("image".to_string(), image.clone());
    }
}
