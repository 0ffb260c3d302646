//! Load balancer backends.

use crate::locality::LocalityKind;
use crate::planner::TransitionRule;
use crate::resource::{Endpoint, Naming, ResourceDescriptor};
use crate::schema::{Attribute, AttributeType, AttributeFlags, Block, NestedBlock, Schema, Validator};

use super::{id, name, zone};

const BACKEND_RULES: &[TransitionRule] = &[TransitionRule::ExactlyOne {
    block: "health_check",
    variants: &["tcp", "http", "https", "mysql"],
}];

/// `scaleway_lb_backend`, created under its load balancer.
pub fn backend() -> ResourceDescriptor {
    let uri_check = || {
        Block::new()
            .with_attribute("uri", Attribute::required_string())
            .with_attribute("method", Attribute::optional_computed_string())
            .with_attribute(
                "code",
                Attribute::optional_int64().with_validator(Validator::IntRange { min: 100, max: 599 }),
            )
    };
    let health_check = Block::new()
        .with_attribute(
            "port",
            Attribute::optional_int64()
                .computed()
                .with_validator(Validator::IntRange { min: 1, max: 65535 }),
        )
        .with_attribute("check_max_retries", Attribute::optional_int64().computed())
        .with_block("tcp", NestedBlock::single(Block::new()).with_api_name("tcp_config"))
        .with_block("http", NestedBlock::single(uri_check()).with_api_name("http_config"))
        .with_block("https", NestedBlock::single(uri_check()).with_api_name("https_config"))
        .with_block(
            "mysql",
            NestedBlock::single(Block::new().with_attribute("user", Attribute::required_string()))
                .with_api_name("mysql_config"),
        );

    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute(
            "lb_id",
            Attribute::required_string().with_force_new().id_reference(),
        )
        .with_attribute("name", name())
        .with_attribute(
            "forward_protocol",
            Attribute::required_string().with_validator(Validator::one_of(&["tcp", "http"])),
        )
        .with_attribute(
            "forward_port",
            Attribute::required_int64().with_validator(Validator::IntRange { min: 1, max: 65535 }),
        )
        .with_attribute(
            "server_ips",
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional(),
            ),
        )
        .with_attribute("zone", zone())
        .with_block(
            "health_check",
            NestedBlock::single(health_check).with_api_name("health_check"),
        );

    ResourceDescriptor::new(
        "scaleway_lb_backend",
        LocalityKind::Zonal,
        Endpoint::new("lb/v1", "backends").parent("lbs", "lb_id"),
        schema,
    )
    .with_rules(BACKEND_RULES)
    .with_naming(Naming::Random("lb-bkd"))
    .lock_on(&["lb_id"])
    .sweep(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher;
    use serde_json::json;

    #[test]
    fn test_health_check_needs_exactly_one_variant() {
        let backend = backend();
        let base = json!({
            "lb_id": "fr-par-1/11111111-1111-1111-1111-111111111111",
            "forward_protocol": "tcp",
            "forward_port": 80,
        });

        let mut two = base.clone();
        two["health_check"] = json!({"http": {"uri": "/"}, "mysql": {"user": "root"}});
        let diagnostics = dispatcher::validate(&backend, &two);
        assert!(diagnostics
            .iter()
            .any(|d| d.summary.contains("exactly one of tcp, http, https, mysql")));

        let mut one = base;
        one["health_check"] = json!({"port": 8080, "http": {"uri": "/health"}});
        assert!(dispatcher::validate(&backend, &one).is_empty());
    }
}
