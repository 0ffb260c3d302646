//! The resource kinds and data sources this provider ships.
//!
//! Each product module describes its kinds as
//! [`ResourceDescriptor`](crate::resource::ResourceDescriptor)s;
//! [`registry`] collects them. Sweep orders put dependents first:
//! servers and clusters go before the volumes, IPs and keys they use.

use serde_json::json;

use crate::resource::ResourceRegistry;
use crate::schema::{Attribute, AttributeType, AttributeFlags, Validator};

mod block;
mod iam;
mod instance;
mod k8s;
mod lb;
mod marketplace;
mod mnq;
mod object;
mod secret;
mod vpc;

pub use iam::PolicyDocumentDataSource;
pub use marketplace::MarketplaceImageDataSource;

/// Build the registry of every shipped resource kind and data source.
pub fn registry() -> ResourceRegistry {
    let mut registry = ResourceRegistry::new();
    registry
        .register_descriptor(instance::ip())
        .register_descriptor(instance::server())
        .register_descriptor(instance::private_nic())
        .register_descriptor(block::volume())
        .register_descriptor(lb::backend())
        .register_descriptor(object::bucket())
        .register_descriptor(object::bucket_policy())
        .register_descriptor(mnq::sqs_queue())
        .register_descriptor(k8s::cluster())
        .register_descriptor(vpc::public_gateway())
        .register_descriptor(iam::ssh_key())
        .register_descriptor(secret::version());
    registry
        .register_data_source(std::sync::Arc::new(MarketplaceImageDataSource::new()))
        .register_data_source(std::sync::Arc::new(PolicyDocumentDataSource::new()));
    registry
}

fn id() -> Attribute {
    Attribute::computed_string().with_description("Composite identifier")
}

fn zone() -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .with_validator(Validator::Zone)
        .with_description("Zone, defaults to the provider zone")
}

fn region() -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .with_validator(Validator::Region)
        .with_description("Region, defaults to the provider region")
}

fn project_id(api_name: &str) -> Attribute {
    Attribute::optional_computed_string()
        .with_force_new()
        .with_validator(Validator::Uuid)
        .with_api_name(api_name)
}

fn name() -> Attribute {
    Attribute::optional_computed_string()
}

fn tags() -> Attribute {
    Attribute::optional_string_list()
}

fn optional_bool(default: bool) -> Attribute {
    Attribute::new(AttributeType::Bool, AttributeFlags::optional_computed()).with_default(json!(default))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::LocalityKind;

    #[test]
    fn test_registry_has_every_kind() {
        let registry = registry();
        let names: Vec<_> = registry.resources().map(|r| r.name()).collect();
        assert_eq!(names.len(), 12);
        for name in [
            "scaleway_instance_ip",
            "scaleway_instance_server",
            "scaleway_instance_private_nic",
            "scaleway_block_volume",
            "scaleway_lb_backend",
            "scaleway_object_bucket",
            "scaleway_object_bucket_policy",
            "scaleway_mnq_sqs_queue",
            "scaleway_k8s_cluster",
            "scaleway_vpc_public_gateway",
            "scaleway_iam_ssh_key",
            "scaleway_secret_version",
        ] {
            assert!(names.contains(&name), "{} missing", name);
        }
        assert!(registry.data_source("scaleway_marketplace_image").is_ok());
        assert!(registry.data_source("scaleway_iam_policy_document").is_ok());
    }

    #[test]
    fn test_every_scoped_kind_has_its_locality_attribute() {
        for resource in registry().resources() {
            if let Some(field) = resource.locality_kind().field() {
                assert!(
                    resource.schema().attribute(field).is_some(),
                    "{} has no {}",
                    resource.name(),
                    field
                );
            }
            assert!(resource.schema().attribute("id").is_some());
        }
    }

    #[test]
    fn test_sweep_order_puts_dependents_first() {
        let registry = registry();
        let order = |name: &str| registry.resource(name).unwrap().sweep_order().unwrap();
        assert!(order("scaleway_instance_server") < order("scaleway_block_volume"));
        assert!(order("scaleway_k8s_cluster") < order("scaleway_vpc_public_gateway"));
        assert!(order("scaleway_instance_server") < order("scaleway_iam_ssh_key"));
        assert_eq!(
            registry
                .resource("scaleway_iam_ssh_key")
                .unwrap()
                .locality_kind(),
            LocalityKind::Global
        );
        assert!(registry
            .resource("scaleway_instance_private_nic")
            .unwrap()
            .sweep_order()
            .is_none());
    }
}
