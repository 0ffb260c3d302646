//! [`ScalewayProvider`]: the [`ProviderService`] the binary serves.
//!
//! Every resource call is routed through the registry to its kind, runs
//! under an [`OperationContext`] with the kind's timeout and the
//! provider's cancellation token, and is wrapped in panic capture.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ScalewayApi;
use crate::config::{ConfigSources, ProviderConfig};
use crate::context::{Operation, OperationContext, ProviderMeta, Timeouts};
use crate::error::ProviderError;
use crate::http::HttpApi;
use crate::lock::LockTable;
use crate::logging::redact_sensitive;
use crate::panic::{capture_panics, ErrorSink, LogSink};
use crate::resource::{Resource, ResourceRegistry};
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::sweeper::{sweep_all, SweepLocalities, SweepSummary};
use crate::types::{ImportedResource, PlanResult};
use crate::validation;

/// The Scaleway provider.
pub struct ScalewayProvider {
    registry: Arc<ResourceRegistry>,
    meta: RwLock<Option<Arc<ProviderMeta>>>,
    locks: Arc<LockTable>,
    cancel: CancellationToken,
    sink: Arc<dyn ErrorSink>,
    sources: ConfigSources,
    api: Option<Arc<dyn ScalewayApi>>,
}

impl std::fmt::Debug for ScalewayProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayProvider")
            .field("registry", &self.registry)
            .field("configured", &self.meta().is_ok())
            .finish_non_exhaustive()
    }
}

impl ScalewayProvider {
    /// An unconfigured provider talking to the real API once configured.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ResourceRegistry::builtin().clone()),
            meta: RwLock::new(None),
            locks: Arc::new(LockTable::new()),
            cancel: CancellationToken::new(),
            sink: Arc::new(LogSink),
            sources: ConfigSources::system(),
            api: None,
        }
    }

    /// A provider already configured with `config` and using `api`.
    ///
    /// A later `configure` call keeps `api` and ignores the environment.
    pub fn with_api(api: Arc<dyn ScalewayApi>, config: ProviderConfig) -> Self {
        let provider = Self {
            sources: ConfigSources::isolated(),
            api: Some(api.clone()),
            ..Self::new()
        };
        provider.install(api, config);
        provider
    }

    /// Serve a different set of resource kinds.
    pub fn with_registry(mut self, registry: ResourceRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Report panics to `sink` instead of the log.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Resolve configuration from `sources` instead of the process.
    pub fn with_config_sources(mut self, sources: ConfigSources) -> Self {
        self.sources = sources;
        self
    }

    /// The resource kinds and data sources served.
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Delete leftover test resources of every sweepable kind.
    ///
    /// An incomplete sweep fails with [`ProviderError::Sweep`], which still
    /// carries what was deleted.
    pub async fn sweep(
        &self,
        localities: &SweepLocalities,
        prefix: &str,
    ) -> Result<SweepSummary, ProviderError> {
        let meta = self.meta()?;
        Ok(sweep_all(&self.registry, meta, localities, prefix, &self.cancel).await?)
    }

    fn install(&self, api: Arc<dyn ScalewayApi>, config: ProviderConfig) {
        let meta = ProviderMeta::new(api, config).with_locks(self.locks.clone());
        if let Ok(mut slot) = self.meta.write() {
            *slot = Some(Arc::new(meta));
        }
    }

    fn meta(&self) -> Result<Arc<ProviderMeta>, ProviderError> {
        self.meta
            .read()
            .map_err(|_| ProviderError::Internal("provider state lock poisoned".to_string()))?
            .clone()
            .ok_or_else(|| ProviderError::Configuration("provider is not configured".to_string()))
    }

    fn context(
        &self,
        kind: &'static str,
        operation: Operation,
        timeout: Duration,
    ) -> Result<OperationContext, ProviderError> {
        Ok(OperationContext::new(
            self.meta()?,
            kind,
            operation,
            timeout,
            self.cancel.child_token(),
        ))
    }

    fn resource_context(
        &self,
        resource: &dyn Resource,
        operation: Operation,
    ) -> Result<OperationContext, ProviderError> {
        self.context(
            resource.name(),
            operation,
            resource.timeouts().for_operation(operation),
        )
    }
}

impl Default for ScalewayProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error))
}

#[async_trait]
impl ProviderService for ScalewayProvider {
    fn schema(&self) -> ProviderSchema {
        self.registry.provider_schema(ProviderConfig::schema())
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(validation::validate(&ProviderConfig::schema(), &config))
    }

    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = validation::validate(&ProviderConfig::schema(), &config);
        if has_errors(&diagnostics) {
            return Ok(diagnostics);
        }
        let resolved = match ProviderConfig::from_value(&config, &self.sources) {
            Ok(resolved) => resolved,
            Err(diagnostics) => return Ok(diagnostics),
        };
        let api: Arc<dyn ScalewayApi> = match &self.api {
            Some(api) => api.clone(),
            None => Arc::new(HttpApi::new(&resolved)?),
        };
        info!(
            zone = ?resolved.zone,
            region = ?resolved.effective_region(),
            profile = ?resolved.profile,
            api_url = resolved.api_url(),
            "provider configured"
        );
        self.install(api, resolved);
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        info!("stopping provider, cancelling in-flight operations");
        self.cancel.cancel();
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.registry.resource(resource_type)?.validate(&config))
    }

    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let version = u64::try_from(version).map_err(|_| {
            ProviderError::Validation(format!("invalid state version {}", version))
        })?;
        resource.upgrade_state(version, state)
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let meta = self.meta()?;
        let prior = prior_state.filter(|state| !state.is_null());
        capture_panics(self.sink.as_ref(), Operation::Plan, resource.name(), async {
            resource.plan(&meta.config, prior.as_ref(), proposed_state)
        })
        .await
    }

    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.resource_context(resource.as_ref(), Operation::Create)?;
        debug!(
            kind = resource.name(),
            planned = %redact_sensitive(resource.schema(), &planned_state),
            "create requested"
        );
        capture_panics(
            self.sink.as_ref(),
            Operation::Create,
            resource.name(),
            resource.create(&ctx, planned_state),
        )
        .await
    }

    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        if current_state.is_null() {
            return Ok(Value::Null);
        }
        let ctx = self.resource_context(resource.as_ref(), Operation::Read)?;
        let state = capture_panics(
            self.sink.as_ref(),
            Operation::Read,
            resource.name(),
            resource.read(&ctx, current_state),
        )
        .await?;
        Ok(state.unwrap_or(Value::Null))
    }

    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.resource_context(resource.as_ref(), Operation::Update)?;
        debug!(
            kind = resource.name(),
            planned = %redact_sensitive(resource.schema(), &planned_state),
            "update requested"
        );
        capture_panics(
            self.sink.as_ref(),
            Operation::Update,
            resource.name(),
            resource.update(&ctx, prior_state, planned_state),
        )
        .await
    }

    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        if current_state.is_null() {
            return Ok(());
        }
        let ctx = self.resource_context(resource.as_ref(), Operation::Delete)?;
        capture_panics(
            self.sink.as_ref(),
            Operation::Delete,
            resource.name(),
            resource.delete(&ctx, current_state),
        )
        .await
    }

    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let resource = self.registry.resource(resource_type)?;
        let ctx = self.resource_context(resource.as_ref(), Operation::Import)?;
        let state = capture_panics(
            self.sink.as_ref(),
            Operation::Import,
            resource.name(),
            resource.import(&ctx, id),
        )
        .await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }

    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(self.registry.data_source(data_source_type)?.validate(&config))
    }

    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let data_source = self.registry.data_source(data_source_type)?;
        let diagnostics = data_source.validate(&config);
        if has_errors(&diagnostics) {
            return Err(ProviderError::from_diagnostics(&diagnostics));
        }
        let ctx = self.context(
            data_source.name(),
            Operation::ReadDataSource,
            Timeouts::DEFAULT,
        )?;
        capture_panics(
            self.sink.as_ref(),
            Operation::ReadDataSource,
            data_source.name(),
            data_source.read(&ctx, config),
        )
        .await
        .map_err(|err| err.in_operation(data_source.name(), None, Operation::ReadDataSource))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::locality::Zone;
    use crate::testing::FakeScaleway;
    use serde_json::json;

    const SECRET: &str = "11111111-1111-1111-1111-111111111111";

    fn config() -> ProviderConfig {
        ProviderConfig {
            secret_key: Some(SECRET.to_string()),
            zone: Some(Zone::parse("fr-par-1").unwrap()),
            ..ProviderConfig::default()
        }
    }

    #[tokio::test]
    async fn test_unconfigured_provider_refuses_crud() {
        let provider = ScalewayProvider::new().with_config_sources(ConfigSources::isolated());
        let err = provider
            .create("scaleway_instance_ip", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_diagnostics() {
        let provider = ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), config());
        let diagnostics = provider
            .configure(json!({"zone": "fr-par-1", "region": "nl-ams"}))
            .await
            .unwrap();
        assert!(has_errors(&diagnostics));

        let diagnostics = provider
            .configure(json!({"secret_key": SECRET, "zone": "nl-ams-1"}))
            .await
            .unwrap();
        assert!(diagnostics.is_empty());
        assert_eq!(provider.meta().unwrap().config.zone.as_ref().unwrap().as_str(), "nl-ams-1");
    }

    #[tokio::test]
    async fn test_unknown_kinds() {
        let provider = ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), config());
        let err = provider.read("scaleway_nope", json!({"id": "x"})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let err = provider
            .read_data_source("scaleway_nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_negative_state_version_is_rejected() {
        let provider = ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), config());
        let err = provider
            .upgrade_resource_state("scaleway_secret_version", -1, json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_stop_cancels_new_operations() {
        let fake = Arc::new(FakeScaleway::new());
        let provider = ScalewayProvider::with_api(fake.clone(), config());
        provider.stop().await.unwrap();
        let err = provider
            .create("scaleway_instance_ip", json!({"type": "routed_ipv4", "zone": "fr-par-1"}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_null_state_reads_and_deletes_are_no_ops() {
        let provider = ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), config());
        assert!(provider
            .read("scaleway_instance_ip", Value::Null)
            .await
            .unwrap()
            .is_null());
        provider
            .delete("scaleway_instance_ip", Value::Null)
            .await
            .unwrap();
    }

    #[test]
    fn test_schema_lists_every_kind() {
        let provider = ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), config());
        let schema = provider.schema();
        assert_eq!(schema.resources.len(), 12);
        assert_eq!(schema.data_sources.len(), 2);
        assert!(schema.provider.block.attributes["secret_key"].flags.sensitive);
    }

    #[tokio::test]
    async fn test_panicking_kind_is_reported_to_the_sink() {
        use crate::locality::LocalityKind;
        use crate::panic::RecordingSink;
        use crate::resource::{Endpoint, Hooks, ResourceDescriptor};
        use crate::schema::{Attribute, Schema};
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        fn explode(_: &Value, _: &mut Value) {
            panic!("expand hook exploded");
        }
        let broken = ResourceDescriptor::new(
            "scaleway_broken",
            LocalityKind::Zonal,
            Endpoint::new("instance/v1", "ips"),
            Schema::v0()
                .with_attribute("id", Attribute::computed_string())
                .with_attribute("zone", Attribute::optional_computed_string().api_skip()),
        )
        .with_hooks(Hooks {
            expand: Some(explode),
            flatten: None,
        });
        let mut registry = ResourceRegistry::new();
        registry.register_descriptor(broken);

        let fake = Arc::new(FakeScaleway::new());
        let sink = Arc::new(RecordingSink::new());
        let provider = ScalewayProvider::with_api(fake.clone(), config())
            .with_registry(registry)
            .with_error_sink(sink.clone());

        let outcome = AssertUnwindSafe(provider.create("scaleway_broken", json!({})))
            .catch_unwind()
            .await;
        assert!(outcome.is_err());
        assert!(fake.calls().is_empty());

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].resource_kind, "scaleway_broken");
        assert_eq!(reports[0].message, "expand hook exploded");
    }
}
