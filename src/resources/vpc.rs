//! VPC public gateways.

use serde_json::json;

use crate::locality::LocalityKind;
use crate::resource::{Endpoint, Naming, ResourceDescriptor, StateMachine};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

use super::{id, name, optional_bool, project_id, tags, zone};

const GATEWAY_STATES: StateMachine = StateMachine {
    field: "status",
    transitional: &["allocating", "configuring", "stopping"],
    terminal: &["running"],
    failure: &["failed"],
    deleted: &["deleted"],
    async_delete: true,
};

/// `scaleway_vpc_public_gateway`.
pub fn public_gateway() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("name", name())
        .with_attribute(
            "type",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_default(json!("VPC-GW-S")),
        )
        .with_attribute(
            "upstream_dns_servers",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional_computed(),
            ),
        )
        .with_attribute(
            "ip_id",
            Attribute::optional_computed_string()
                .with_force_new()
                .with_api_name("ip.id")
                .id_reference(),
        )
        .with_attribute("bastion_enabled", optional_bool(false))
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("zone", zone());

    ResourceDescriptor::new(
        "scaleway_vpc_public_gateway",
        LocalityKind::Zonal,
        Endpoint::new("vpc-gw/v1", "gateways"),
        schema,
    )
    .with_states(GATEWAY_STATES)
    .with_naming(Naming::Random("pgw"))
    .sweep(5)
}
