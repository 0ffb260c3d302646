//! Kubernetes Kapsule clusters.

use crate::context::Timeouts;
use crate::locality::LocalityKind;
use crate::resource::{Endpoint, Naming, ResourceDescriptor, StateMachine};
use crate::schema::{Attribute, Schema, Validator};

use super::{id, name, project_id, region, tags};

const CLUSTER_STATES: StateMachine = StateMachine {
    field: "status",
    transitional: &["creating", "updating", "deleting"],
    terminal: &["ready", "pool_required"],
    failure: &["error", "locked"],
    deleted: &["deleted"],
    async_delete: true,
};

/// `scaleway_k8s_cluster`.
pub fn cluster() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("name", name())
        .with_attribute("version", Attribute::required_string())
        .with_attribute(
            "cni",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::one_of(&["cilium", "calico", "kilo", "none"])),
        )
        .with_attribute("description", Attribute::optional_string())
        .with_attribute(
            "private_network_id",
            Attribute::optional_string().with_force_new().id_reference(),
        )
        .with_attribute("status", Attribute::computed_string())
        .with_attribute("apiserver_url", Attribute::computed_string())
        .with_attribute("wildcard_dns", Attribute::computed_string())
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("region", region());

    ResourceDescriptor::new(
        "scaleway_k8s_cluster",
        LocalityKind::Regional,
        Endpoint::new("k8s/v1", "clusters"),
        schema,
    )
    .with_states(CLUSTER_STATES)
    .with_timeouts(Timeouts::large())
    .with_naming(Naming::Random("k8s"))
    .sweep(0)
}
