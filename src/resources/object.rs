//! Object storage buckets and bucket policies.
//!
//! Both kinds are addressed by bucket name, so their ids are
//! `<region>/<bucket>`.

use crate::locality::LocalityKind;
use crate::resource::{Endpoint, IdScheme, Naming, ResourceDescriptor};
use crate::schema::{Attribute, DiffSuppress, Schema, Validator};

use super::{id, name, optional_bool, project_id, region, tags};

const PRODUCT: &str = "object/v1";

/// `scaleway_object_bucket`.
pub fn bucket() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute(
            "name",
            name()
                .with_force_new()
                .with_validator(Validator::StringLength { min: 3, max: 63 }),
        )
        .with_attribute("versioning", optional_bool(false))
        .with_attribute("endpoint", Attribute::computed_string())
        .with_attribute("tags", tags())
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("region", region());

    ResourceDescriptor::new(
        "scaleway_object_bucket",
        LocalityKind::Regional,
        Endpoint::new(PRODUCT, "buckets"),
        schema,
    )
    .with_id(IdScheme::Name("name"))
    .with_naming(Naming::Random("bucket"))
    .sweep(30)
}

/// `scaleway_object_bucket_policy`.
///
/// A bucket created moments ago may still answer 409 to a policy write,
/// so conflicts on create are retried.
pub fn bucket_policy() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute(
            "bucket",
            Attribute::required_string().with_force_new().api_skip(),
        )
        .with_attribute(
            "policy",
            Attribute::required_string()
                .with_validator(Validator::Json)
                .with_diff_suppress(DiffSuppress::PolicyDocument),
        )
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("region", region());

    ResourceDescriptor::new(
        "scaleway_object_bucket_policy",
        LocalityKind::Regional,
        Endpoint::new(PRODUCT, "bucket-policies"),
        schema,
    )
    .with_id(IdScheme::Name("bucket"))
    .retry_conflict_on_create()
    .lock_on(&["bucket"])
}
