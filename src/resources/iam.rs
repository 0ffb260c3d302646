//! IAM: SSH keys and the policy document builder.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::context::OperationContext;
use crate::error::ProviderError;
use crate::locality::LocalityKind;
use crate::policy::PolicyDocumentInput;
use crate::resource::{DataSource, Endpoint, Naming, ResourceDescriptor};
use crate::schema::{
    Attribute, AttributeFlags, AttributeType, Block, DiffSuppress, NestedBlock, Schema, Validator,
};

use super::{id, name, optional_bool, project_id};

/// `scaleway_iam_ssh_key`. Keys are not scoped to a zone or region.
pub fn ssh_key() -> ResourceDescriptor {
    let schema = Schema::v0()
        .with_attribute("id", id())
        .with_attribute("name", name())
        .with_attribute(
            "public_key",
            Attribute::required_string()
                .with_force_new()
                .with_validator(Validator::SshPublicKey)
                .with_diff_suppress(DiffSuppress::SshKey),
        )
        .with_attribute("disabled", optional_bool(false))
        .with_attribute("fingerprint", Attribute::computed_string())
        .with_attribute("created_at", Attribute::computed_string())
        .with_attribute("project_id", project_id("project_id"));

    ResourceDescriptor::new(
        "scaleway_iam_ssh_key",
        LocalityKind::Global,
        Endpoint::new("iam/v1alpha1", "ssh-keys"),
        schema,
    )
    .with_naming(Naming::Random("key"))
    .sweep(20)
}

/// `scaleway_iam_policy_document`: renders a policy document from
/// statements, source documents and override documents.
#[derive(Debug, Clone)]
pub struct PolicyDocumentDataSource {
    schema: Schema,
}

impl PolicyDocumentDataSource {
    /// The data source.
    pub fn new() -> Self {
        let strings = || {
            Attribute::new(
                AttributeType::list(AttributeType::String),
                AttributeFlags::optional(),
            )
        };
        let principal = Block::new()
            .with_attribute("type", Attribute::required_string())
            .with_attribute("identifiers", strings());
        let condition = Block::new()
            .with_attribute("test", Attribute::required_string())
            .with_attribute("variable", Attribute::required_string())
            .with_attribute("values", strings());
        let statement = Block::new()
            .with_attribute("sid", Attribute::optional_string())
            .with_attribute(
                "effect",
                Attribute::optional_string().with_validator(Validator::one_of(&["Allow", "Deny"])),
            )
            .with_attribute("actions", strings())
            .with_attribute("not_actions", strings())
            .with_attribute("resources", strings())
            .with_attribute("not_resources", strings())
            .with_block("principals", NestedBlock::set(principal.clone()))
            .with_block("not_principals", NestedBlock::set(principal))
            .with_block("condition", NestedBlock::set(condition));

        let schema = Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "version",
                Attribute::optional_string()
                    .with_validator(Validator::one_of(&["2012-10-17", "2008-10-17"])),
            )
            .with_attribute("policy_id", Attribute::optional_string())
            .with_attribute("source_policy_documents", strings())
            .with_attribute("override_policy_documents", strings())
            .with_attribute("json", Attribute::computed_string())
            .with_block("statement", NestedBlock::list(statement));
        Self { schema }
    }
}

impl Default for PolicyDocumentDataSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSource for PolicyDocumentDataSource {
    fn name(&self) -> &'static str {
        "scaleway_iam_policy_document"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn read(&self, _ctx: &OperationContext, config: Value) -> Result<Value, ProviderError> {
        let input = PolicyDocumentInput::from_value(&without_nulls(&config))?;
        let document = input.to_json()?;

        let mut hasher = DefaultHasher::new();
        document.hash(&mut hasher);
        let id = hasher.finish().to_string();
        debug!(id = %id, "rendered policy document");

        let mut state = config.as_object().cloned().unwrap_or_default();
        state.insert("id".to_string(), json!(id));
        state.insert("json".to_string(), json!(document));
        Ok(Value::Object(state))
    }
}

/// Unset attributes arrive as nulls; the builder treats them as absent.
fn without_nulls(value: &Value) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), without_nulls(v)))
                .collect::<Map<_, _>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(without_nulls).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::context::{Operation, ProviderMeta};
    use crate::policy;
    use crate::testing::FakeScaleway;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> OperationContext {
        let meta = Arc::new(ProviderMeta::new(
            Arc::new(FakeScaleway::new()),
            ProviderConfig::default(),
        ));
        OperationContext::new(
            meta,
            "scaleway_iam_policy_document",
            Operation::ReadDataSource,
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_renders_canonical_document() {
        let source = PolicyDocumentDataSource::new();
        let config = json!({
            "version": null,
            "policy_id": null,
            "source_policy_documents": null,
            "statement": [{
                "sid": "Read",
                "effect": null,
                "actions": ["s3:GetObject", "s3:ListBucket"],
                "resources": ["bucket/*"],
                "principals": [{"type": "SCW", "identifiers": ["application_id:abc"]}],
                "condition": null,
            }],
        });
        assert!(source.validate(&config).is_empty());

        let state = source.read(&ctx(), config).await.unwrap();
        let document = state["json"].as_str().unwrap();
        assert_eq!(policy::canonicalize(document).unwrap(), document);
        assert!(document.contains("\"Sid\": \"Read\""));
        assert!(!state["id"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_same_input_same_id() {
        let source = PolicyDocumentDataSource::new();
        let config = json!({"statement": [{"actions": ["s3:*"], "resources": ["*"]}]});
        let a = source.read(&ctx(), config.clone()).await.unwrap();
        let b = source.read(&ctx(), config).await.unwrap();
        assert_eq!(a["id"], b["id"]);
    }

    #[tokio::test]
    async fn test_duplicate_sids_are_rejected() {
        let source = PolicyDocumentDataSource::new();
        let config = json!({"statement": [
            {"sid": "A", "actions": ["s3:*"]},
            {"sid": "A", "actions": ["s3:GetObject"]},
        ]});
        let err = source.read(&ctx(), config).await.unwrap_err();
        assert!(err.to_string().contains("A"));
    }
}
