//! Marketplace image lookup.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::api::ApiTarget;
use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::locality::{extract_locality, LocalityKind};
use crate::resource::DataSource;
use crate::retry::with_retry;
use crate::schema::{Attribute, Schema, Validator};

const DEFAULT_INSTANCE_TYPE: &str = "DEV1-S";
const DEFAULT_IMAGE_TYPE: &str = "instance_local";

/// `scaleway_marketplace_image`: the local image with a label that fits
/// an instance type in a zone.
#[derive(Debug, Clone)]
pub struct MarketplaceImageDataSource {
    schema: Schema,
}

impl MarketplaceImageDataSource {
    /// The data source.
    pub fn new() -> Self {
        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("label", Attribute::required_string())
            .with_attribute(
                "instance_type",
                Attribute::optional_computed_string().with_default(json!(DEFAULT_INSTANCE_TYPE)),
            )
            .with_attribute(
                "image_type",
                Attribute::optional_computed_string()
                    .with_default(json!(DEFAULT_IMAGE_TYPE))
                    .with_validator(Validator::one_of(&["instance_local", "instance_sbs"])),
            )
            .with_attribute(
                "zone",
                Attribute::optional_computed_string().with_validator(Validator::Zone),
            );
        Self { schema }
    }
}

impl Default for MarketplaceImageDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for MarketplaceImageDataSource {
    fn name(&self) -> &'static str {
        "scaleway_marketplace_image"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let attr = |name: &str| {
            config
                .get(name)
                .and_then(Value::as_str)
                .filter(|v| !v.is_empty())
        };
        let label = attr("label")
            .ok_or_else(|| ProviderError::Validation("label is required".to_string()))?;
        let instance_type = attr("instance_type").unwrap_or(DEFAULT_INSTANCE_TYPE);
        let image_type = attr("image_type").unwrap_or(DEFAULT_IMAGE_TYPE);
        let locality = extract_locality(LocalityKind::Zonal, attr("zone"), ctx.config())?;

        let target = ApiTarget::new("marketplace/v2", "local-images", locality.clone());
        let api = ctx.api();
        let request = &target;
        let images = with_retry(ctx, "listing marketplace images", false, move || {
            api.list(request)
        })
        .await?;
        debug!(label, instance_type, candidates = images.len(), "looking up image");

        let image = images
            .iter()
            .find(|image| matches(image, label, instance_type, image_type))
            .ok_or_else(|| {
                ProviderError::NotFound(format!(
                    "no {} image labelled {:?} for instance type {} in {}",
                    image_type, label, instance_type, locality
                ))
            })?;
        let id = image
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::Internal("marketplace image has no id".to_string()))?;

        Ok(json!({
            "id": locality.format_id(id),
            "label": label,
            "instance_type": instance_type,
            "image_type": image_type,
            "zone": locality.to_string(),
        }))
    }
}

fn matches(image: &Value, label: &str, instance_type: &str, image_type: &str) -> bool {
    let field = |name: &str| image.get(name).and_then(Value::as_str);
    field("label") == Some(label)
        && field("type").map_or(true, |t| t == image_type)
        && image
            .get("compatible_commercial_types")
            .and_then(Value::as_array)
            .is_some_and(|types| {
                types
                    .iter()
                    .any(|t| t.as_str().is_some_and(|t| t.eq_ignore_ascii_case(instance_type)))
            })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::context::{Operation, ProviderMeta};
    use crate::locality::Zone;
    use crate::testing::FakeScaleway;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx(fake: Arc<FakeScaleway>) -> OperationContext {
        let config = ProviderConfig {
            zone: Some(Zone::parse("fr-par-1").unwrap()),
            ..ProviderConfig::default()
        };
        OperationContext::new(
            Arc::new(ProviderMeta::new(fake, config)),
            "scaleway_marketplace_image",
            Operation::ReadDataSource,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_picks_image_compatible_with_instance_type() {
        let fake = Arc::new(FakeScaleway::new());
        fake.seed(
            "local-images",
            "fr-par-1",
            json!({"label": "ubuntu_jammy", "type": "instance_local", "compatible_commercial_types": ["GP1-S"]}),
        );
        let wanted = fake.seed(
            "local-images",
            "fr-par-1",
            json!({"label": "ubuntu_jammy", "type": "instance_local", "compatible_commercial_types": ["DEV1-S", "DEV1-M"]}),
        );

        let source = MarketplaceImageDataSource::new();
        let state = source
            .read(&ctx(fake), json!({"label": "ubuntu_jammy", "instance_type": "DEV1-M"}))
            .await
            .unwrap();
        assert_eq!(state["id"], format!("fr-par-1/{}", wanted));
        assert_eq!(state["zone"], "fr-par-1");
    }

    #[tokio::test]
    async fn test_missing_image_is_not_found() {
        let fake = Arc::new(FakeScaleway::new());
        let source = MarketplaceImageDataSource::new();
        let err = source
            .read(&ctx(fake), json!({"label": "nope"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }
}
