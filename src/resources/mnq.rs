//! Messaging and Queuing: SQS queues.

use serde_json::json;

use crate::locality::LocalityKind;
use crate::naming::MAX_QUEUE_NAME_LEN;
use crate::resource::{Endpoint, Naming, ResourceDescriptor};
use crate::schema::{Attribute, Schema, Validator};

use super::{id, name, optional_bool, project_id, region};

/// `scaleway_mnq_sqs_queue`.
///
/// The name comes from `name` or from `name_prefix`; FIFO queue names end
/// in `.fifo`.
pub fn sqs_queue() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute(
            "name",
            name().with_force_new().with_validator(Validator::StringLength {
                min: 1,
                max: MAX_QUEUE_NAME_LEN,
            }),
        )
        .with_attribute(
            "name_prefix",
            Attribute::optional_string().with_force_new().api_skip(),
        )
        .with_attribute("fifo_queue", optional_bool(false).with_force_new())
        .with_attribute("content_based_deduplication", optional_bool(false))
        .with_attribute(
            "message_max_age",
            Attribute::optional_int64()
                .computed()
                .with_default(json!(345_600))
                .with_validator(Validator::IntRange {
                    min: 60,
                    max: 1_209_600,
                }),
        )
        .with_attribute(
            "visibility_timeout_seconds",
            Attribute::optional_int64()
                .computed()
                .with_default(json!(30))
                .with_validator(Validator::IntRange { min: 0, max: 43_200 }),
        )
        .with_attribute("url", Attribute::computed_string())
        .with_attribute("project_id", project_id("project_id"))
        .with_attribute("region", region());

    ResourceDescriptor::new(
        "scaleway_mnq_sqs_queue",
        LocalityKind::Regional,
        Endpoint::new("mnq/v1beta1", "sqs-queues"),
        schema,
    )
    .with_naming(Naming::Queue("fifo_queue"))
    .sweep(10)
}
