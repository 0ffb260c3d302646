//! The gRPC surface of the plugin.
//!
//! [`ProviderService`] is the host-facing API in plain Rust types; the
//! private `ProviderGrpcService` adapts it to the generated tonic trait,
//! decoding JSON payloads and turning errors into diagnostics.
//!
//! # Signal Handling
//!
//! On SIGTERM or SIGINT the server:
//! 1. calls the provider's `stop()`, cancelling every in-flight operation,
//! 2. stops accepting connections,
//! 3. waits up to [`ServeOptions::shutdown_timeout`] for requests to drain.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

use crate::error::ProviderError;
use crate::generated as proto;
use crate::schema::{Block, BlockNestingMode, Diagnostic, DiagnosticSeverity, ProviderSchema, Schema};
use crate::types::{
    ImportedResource, PlanResult, ProviderMetadata, HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};

/// What the host can ask of the provider.
///
/// Payloads are JSON values; a `Null` state means "no object".
#[async_trait::async_trait]
pub trait ProviderService: Send + Sync + 'static {
    /// The provider block, resource and data source schemas.
    fn schema(&self) -> ProviderSchema;

    /// Resource and data source names, derived from the schema.
    fn metadata(&self) -> ProviderMetadata {
        let schema = self.schema();
        ProviderMetadata {
            resources: schema.resources.keys().cloned().collect(),
            data_sources: schema.data_sources.keys().cloned().collect(),
            capabilities: Default::default(),
        }
    }

    /// Check the provider block without configuring anything.
    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = config;
        Ok(vec![])
    }

    /// Resolve credentials and defaults.
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError>;

    /// Cancel in-flight operations.
    async fn stop(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    /// Check a resource configuration, reporting every problem.
    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (resource_type, config);
        Ok(vec![])
    }

    /// Bring state written at `version` up to the current schema.
    async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        let _ = (resource_type, version);
        Ok(state)
    }

    /// Compute the changes from `prior_state` to `proposed_state`.
    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create a resource.
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError>;

    /// Refresh a resource; `Null` when it is gone.
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError>;

    /// Update a resource in place.
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete a resource.
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError>;

    /// Build state for an existing resource.
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let _ = id;
        Err(ProviderError::Unimplemented(format!(
            "import of {}",
            resource_type
        )))
    }

    /// Check a data source configuration.
    async fn validate_data_source_config(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let _ = (data_source_type, config);
        Ok(vec![])
    }

    /// Compute a data source's state.
    async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let _ = config;
        Err(ProviderError::UnknownResource(format!(
            "data source {}",
            data_source_type
        )))
    }
}

struct ProviderGrpcService<P: ProviderService> {
    provider: Arc<P>,
}

/// Empty payloads decode to `Null`.
fn decode(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes).unwrap_or(Value::Null)
}

/// `Null` encodes to an empty payload.
fn encode(value: &Value) -> Vec<u8> {
    if value.is_null() {
        return Vec::new();
    }
    serde_json::to_vec(value).unwrap_or_default()
}

fn diagnostics_to_proto(diagnostics: Vec<Diagnostic>) -> Vec<proto::Diagnostic> {
    diagnostics
        .into_iter()
        .map(|d| proto::Diagnostic {
            severity: match d.severity {
                DiagnosticSeverity::Error => proto::diagnostic::Severity::Error as i32,
                DiagnosticSeverity::Warning => proto::diagnostic::Severity::Warning as i32,
            },
            summary: d.summary,
            detail: d.detail.unwrap_or_default(),
            attribute: d.attribute.unwrap_or_default(),
        })
        .collect()
}

fn error_to_proto(err: &ProviderError) -> Vec<proto::Diagnostic> {
    let root = err.root();
    vec![proto::Diagnostic {
        severity: proto::diagnostic::Severity::Error as i32,
        summary: err.to_string(),
        detail: format!("{:?}: {}", root.kind(), root),
        attribute: String::new(),
    }]
}

/// Log the outcome of a validation-style call.
fn log_diagnostics(call: &str, subject: &str, diagnostics: &[Diagnostic]) {
    let errors = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .count();
    if errors > 0 {
        warn!(subject, errors, "{} found problems", call);
    } else {
        debug!(subject, "{} passed", call);
    }
}

fn schema_to_proto(schema: &Schema) -> proto::Schema {
    proto::Schema {
        version: i64::try_from(schema.version).unwrap_or(i64::MAX),
        block: Some(block_to_proto(&schema.block)),
    }
}

fn block_to_proto(block: &Block) -> proto::Block {
    proto::Block {
        attributes: block
            .attributes
            .iter()
            .map(|(name, attr)| proto::Attribute {
                name: name.clone(),
                r#type: serde_json::to_vec(&attr.attr_type).unwrap_or_default(),
                required: attr.flags.required,
                optional: attr.flags.optional,
                computed: attr.flags.computed,
                sensitive: attr.flags.sensitive,
                description: attr.description.clone().unwrap_or_default(),
                force_new: attr.force_new,
                default_value: attr.default.as_ref().map(encode).unwrap_or_default(),
            })
            .collect(),
        block_types: block
            .blocks
            .iter()
            .map(|(name, nested)| proto::NestedBlock {
                type_name: name.clone(),
                block: Some(block_to_proto(&nested.block)),
                nesting_mode: match nested.nesting_mode {
                    BlockNestingMode::Single => proto::nested_block::NestingMode::Single as i32,
                    BlockNestingMode::List => proto::nested_block::NestingMode::List as i32,
                    BlockNestingMode::Set => proto::nested_block::NestingMode::Set as i32,
                    BlockNestingMode::Map => proto::nested_block::NestingMode::Map as i32,
                },
                min_items: i32::try_from(nested.min_items).unwrap_or(i32::MAX),
                max_items: i32::try_from(nested.max_items).unwrap_or(i32::MAX),
            })
            .collect(),
        description: block.description.clone().unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl<P: ProviderService> proto::provider_server::Provider for ProviderGrpcService<P> {
    #[instrument(skip_all, name = "grpc.get_metadata")]
    async fn get_metadata(
        &self,
        _request: Request<proto::GetMetadataRequest>,
    ) -> Result<Response<proto::GetMetadataResponse>, Status> {
        let metadata = self.provider.metadata();
        debug!(
            resources = metadata.resources.len(),
            data_sources = metadata.data_sources.len(),
            "metadata served"
        );
        Ok(Response::new(proto::GetMetadataResponse {
            server_capabilities: Some(proto::ServerCapabilities {
                plan_destroy: metadata.capabilities.plan_destroy,
            }),
            resources: metadata.resources,
            data_sources: metadata.data_sources,
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.get_schema")]
    async fn get_schema(
        &self,
        _request: Request<proto::GetSchemaRequest>,
    ) -> Result<Response<proto::GetSchemaResponse>, Status> {
        let schema = self.provider.schema();
        Ok(Response::new(proto::GetSchemaResponse {
            provider: Some(schema_to_proto(&schema.provider)),
            resources: schema
                .resources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            data_sources: schema
                .data_sources
                .iter()
                .map(|(k, v)| (k.clone(), schema_to_proto(v)))
                .collect(),
            diagnostics: vec![],
        }))
    }

    #[instrument(skip_all, name = "grpc.validate_provider_config")]
    async fn validate_provider_config(
        &self,
        request: Request<proto::ValidateProviderConfigRequest>,
    ) -> Result<Response<proto::ValidateProviderConfigResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let diagnostics = match self.provider.validate_provider_config(config).await {
            Ok(diagnostics) => {
                log_diagnostics("provider config validation", "provider", &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "provider config validation failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(proto::ValidateProviderConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.configure")]
    async fn configure(
        &self,
        request: Request<proto::ConfigureRequest>,
    ) -> Result<Response<proto::ConfigureResponse>, Status> {
        let config = decode(&request.into_inner().config);
        let diagnostics = match self.provider.configure(config).await {
            Ok(diagnostics) => {
                log_diagnostics("configure", "provider", &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "configure failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(proto::ConfigureResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.stop")]
    async fn stop(
        &self,
        _request: Request<proto::StopRequest>,
    ) -> Result<Response<proto::StopResponse>, Status> {
        let error = match self.provider.stop().await {
            Ok(()) => String::new(),
            Err(e) => {
                error!(error = %e, "stop failed");
                e.to_string()
            },
        };
        Ok(Response::new(proto::StopResponse { error }))
    }

    #[instrument(skip_all, name = "grpc.validate_resource_config", fields(kind = %request.get_ref().resource_type))]
    async fn validate_resource_config(
        &self,
        request: Request<proto::ValidateResourceConfigRequest>,
    ) -> Result<Response<proto::ValidateResourceConfigResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = match self
            .provider
            .validate_resource_config(&req.resource_type, decode(&req.config))
            .await
        {
            Ok(diagnostics) => {
                log_diagnostics("resource validation", &req.resource_type, &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => {
                error!(error = %e, "resource validation failed");
                error_to_proto(&e)
            },
        };
        Ok(Response::new(proto::ValidateResourceConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.upgrade_resource_state", fields(kind = %request.get_ref().resource_type, version = request.get_ref().version))]
    async fn upgrade_resource_state(
        &self,
        request: Request<proto::UpgradeResourceStateRequest>,
    ) -> Result<Response<proto::UpgradeResourceStateResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .upgrade_resource_state(&req.resource_type, req.version, decode(&req.raw_state))
            .await
        {
            Ok(upgraded) => proto::UpgradeResourceStateResponse {
                upgraded_state: encode(&upgraded),
                diagnostics: vec![],
            },
            Err(e) => {
                error!(error = %e, "state upgrade failed");
                proto::UpgradeResourceStateResponse {
                    upgraded_state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.plan", fields(kind = %request.get_ref().resource_type))]
    async fn plan(
        &self,
        request: Request<proto::PlanRequest>,
    ) -> Result<Response<proto::PlanResponse>, Status> {
        let req = request.into_inner();
        let prior_state = Some(decode(&req.prior_state)).filter(|v| !v.is_null());
        let response = match self
            .provider
            .plan(
                &req.resource_type,
                prior_state,
                decode(&req.proposed_state),
                decode(&req.config),
            )
            .await
        {
            Ok(result) => {
                debug!(
                    changes = result.changes.len(),
                    requires_replace = result.requires_replace,
                    "plan computed"
                );
                proto::PlanResponse {
                    planned_state: encode(&result.planned_state),
                    changes: result.changes.into_iter().map(Into::into).collect(),
                    requires_replace: result.requires_replace,
                    diagnostics: vec![],
                }
            },
            Err(e) => {
                warn!(error = %e, "plan failed");
                proto::PlanResponse {
                    planned_state: vec![],
                    changes: vec![],
                    requires_replace: false,
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.create", fields(kind = %request.get_ref().resource_type))]
    async fn create(
        &self,
        request: Request<proto::CreateRequest>,
    ) -> Result<Response<proto::CreateResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .create(&req.resource_type, decode(&req.planned_state))
            .await
        {
            Ok(state) => proto::CreateResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => proto::CreateResponse {
                state: e.partial_state().map(encode).unwrap_or_default(),
                diagnostics: error_to_proto(&e),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.read", fields(kind = %request.get_ref().resource_type))]
    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> Result<Response<proto::ReadResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .read(&req.resource_type, decode(&req.current_state))
            .await
        {
            Ok(state) => proto::ReadResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => proto::ReadResponse {
                state: vec![],
                diagnostics: error_to_proto(&e),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.update", fields(kind = %request.get_ref().resource_type))]
    async fn update(
        &self,
        request: Request<proto::UpdateRequest>,
    ) -> Result<Response<proto::UpdateResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .update(
                &req.resource_type,
                decode(&req.prior_state),
                decode(&req.planned_state),
            )
            .await
        {
            Ok(state) => proto::UpdateResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => proto::UpdateResponse {
                state: e.partial_state().map(encode).unwrap_or_default(),
                diagnostics: error_to_proto(&e),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.delete", fields(kind = %request.get_ref().resource_type))]
    async fn delete(
        &self,
        request: Request<proto::DeleteRequest>,
    ) -> Result<Response<proto::DeleteResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = match self
            .provider
            .delete(&req.resource_type, decode(&req.current_state))
            .await
        {
            Ok(()) => vec![],
            Err(e) => error_to_proto(&e),
        };
        Ok(Response::new(proto::DeleteResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.import_resource_state", fields(kind = %request.get_ref().resource_type, id = %request.get_ref().id))]
    async fn import_resource_state(
        &self,
        request: Request<proto::ImportResourceStateRequest>,
    ) -> Result<Response<proto::ImportResourceStateResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .import_resource(&req.resource_type, &req.id)
            .await
        {
            Ok(imported) => proto::ImportResourceStateResponse {
                imported: imported
                    .into_iter()
                    .map(|r| proto::ImportedResource {
                        state: encode(&r.state),
                        resource_type: r.resource_type,
                    })
                    .collect(),
                diagnostics: vec![],
            },
            Err(e) => proto::ImportResourceStateResponse {
                imported: vec![],
                diagnostics: error_to_proto(&e),
            },
        };
        Ok(Response::new(response))
    }

    #[instrument(skip_all, name = "grpc.validate_data_source_config", fields(kind = %request.get_ref().data_source_type))]
    async fn validate_data_source_config(
        &self,
        request: Request<proto::ValidateDataSourceConfigRequest>,
    ) -> Result<Response<proto::ValidateDataSourceConfigResponse>, Status> {
        let req = request.into_inner();
        let diagnostics = match self
            .provider
            .validate_data_source_config(&req.data_source_type, decode(&req.config))
            .await
        {
            Ok(diagnostics) => {
                log_diagnostics("data source validation", &req.data_source_type, &diagnostics);
                diagnostics_to_proto(diagnostics)
            },
            Err(e) => error_to_proto(&e),
        };
        Ok(Response::new(proto::ValidateDataSourceConfigResponse { diagnostics }))
    }

    #[instrument(skip_all, name = "grpc.read_data_source", fields(kind = %request.get_ref().data_source_type))]
    async fn read_data_source(
        &self,
        request: Request<proto::ReadDataSourceRequest>,
    ) -> Result<Response<proto::ReadDataSourceResponse>, Status> {
        let req = request.into_inner();
        let response = match self
            .provider
            .read_data_source(&req.data_source_type, decode(&req.config))
            .await
        {
            Ok(state) => proto::ReadDataSourceResponse {
                state: encode(&state),
                diagnostics: vec![],
            },
            Err(e) => {
                warn!(error = %e, "data source read failed");
                proto::ReadDataSourceResponse {
                    state: vec![],
                    diagnostics: error_to_proto(&e),
                }
            },
        };
        Ok(Response::new(response))
    }
}

/// Options for the plugin server.
#[derive(Debug, Clone)]
pub struct ServeOptions {
    /// How long in-flight requests may take to drain after a shutdown
    /// signal. Default: 30 seconds.
    pub shutdown_timeout: Duration,
}

impl Default for ServeOptions {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServeOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the drain timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// The line printed on stdout once the server listens.
pub fn handshake_line(addr: SocketAddr) -> String {
    format!("{}|{}|{}", HANDSHAKE_PREFIX, PROTOCOL_VERSION, addr)
}

/// Resolve on SIGTERM or SIGINT (CTRL+C elsewhere).
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            },
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "cannot install signal handlers, waiting for CTRL+C");
                if tokio::signal::ctrl_c().await.is_err() {
                    std::future::pending::<()>().await;
                }
            },
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        info!("received CTRL+C");
    }
}

/// Serve `provider` on a free local port until a shutdown signal.
pub async fn serve<P: ProviderService>(provider: P) -> Result<(), ProviderError> {
    serve_with_options(provider, ServeOptions::default()).await
}

/// Like [`serve`], with options.
pub async fn serve_with_options<P: ProviderService>(
    provider: P,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    serve_on_with_options(provider, SocketAddr::from(([127, 0, 0, 1], 0)), options).await
}

/// Serve `provider` on `addr`.
pub async fn serve_on<P: ProviderService>(provider: P, addr: SocketAddr) -> Result<(), ProviderError> {
    serve_on_with_options(provider, addr, ServeOptions::default()).await
}

/// Like [`serve_on`], with options.
pub async fn serve_on_with_options<P: ProviderService>(
    provider: P,
    addr: SocketAddr,
    options: ServeOptions,
) -> Result<(), ProviderError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ProviderError::Transport(format!("binding {}: {}", addr, e)))?;
    serve_listener(provider, listener, options, wait_for_shutdown_signal()).await
}

/// Serve on an already bound listener until `shutdown` resolves.
///
/// Prints the handshake line, then on `shutdown` stops the provider and
/// drains requests for at most `options.shutdown_timeout`.
pub async fn serve_listener<P, F>(
    provider: P,
    listener: TcpListener,
    options: ServeOptions,
    shutdown: F,
) -> Result<(), ProviderError>
where
    P: ProviderService,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| ProviderError::Transport(e.to_string()))?;
    println!("{}", handshake_line(addr));
    info!(address = %addr, "provider server listening");

    let provider = Arc::new(provider);
    let stopping = Arc::new(Notify::new());
    let on_shutdown = {
        let provider = Arc::clone(&provider);
        let stopping = Arc::clone(&stopping);
        async move {
            shutdown.await;
            if let Err(e) = provider.stop().await {
                warn!(error = %e, "provider stop returned an error");
            }
            stopping.notify_one();
        }
    };

    let server = Server::builder()
        .add_service(proto::provider_server::ProviderServer::new(ProviderGrpcService {
            provider,
        }))
        .serve_with_incoming_shutdown(
            tokio_stream::wrappers::TcpListenerStream::new(listener),
            on_shutdown,
        );
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result?,
        _ = stopping.notified() => {
            match tokio::time::timeout(options.shutdown_timeout, &mut server).await {
                Ok(result) => result?,
                Err(_) => warn!(
                    timeout = ?options.shutdown_timeout,
                    "requests still running after the drain timeout"
                ),
            }
        },
    }

    info!("provider shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::locality::Zone;
    use crate::provider::ScalewayProvider;
    use crate::testing::FakeScaleway;
    use proto::provider_server::Provider;
    use serde_json::json;

    fn service(fake: Arc<FakeScaleway>) -> ProviderGrpcService<ScalewayProvider> {
        let config = ProviderConfig {
            zone: Some(Zone::parse("fr-par-1").unwrap()),
            ..ProviderConfig::default()
        };
        ProviderGrpcService {
            provider: Arc::new(ScalewayProvider::with_api(fake, config)),
        }
    }

    #[test]
    fn test_handshake_line() {
        let addr: SocketAddr = "127.0.0.1:50051".parse().unwrap();
        assert_eq!(handshake_line(addr), "SCALEWAY_PROVIDER|1|127.0.0.1:50051");
    }

    #[test]
    fn test_null_payloads() {
        assert_eq!(decode(b""), Value::Null);
        assert_eq!(decode(b"not json"), Value::Null);
        assert!(encode(&Value::Null).is_empty());
        assert_eq!(decode(&encode(&json!({"a": 1}))), json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_read_of_deleted_resource_returns_empty_state() {
        let fake = Arc::new(FakeScaleway::new());
        let service = service(fake);
        let response = service
            .read(Request::new(proto::ReadRequest {
                resource_type: "scaleway_instance_ip".to_string(),
                current_state: encode(&json!({
                    "id": "fr-par-1/11111111-1111-1111-1111-111111111111",
                    "zone": "fr-par-1",
                })),
            }))
            .await
            .unwrap()
            .into_inner();
        assert!(response.diagnostics.is_empty());
        assert!(response.state.is_empty());
    }

    #[tokio::test]
    async fn test_errors_become_diagnostics() {
        let service = service(Arc::new(FakeScaleway::new()));
        let response = service
            .create(Request::new(proto::CreateRequest {
                resource_type: "scaleway_nope".to_string(),
                planned_state: encode(&json!({})),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.diagnostics.len(), 1);
        assert!(response.diagnostics[0].summary.contains("scaleway_nope"));
        assert!(response.state.is_empty());
    }

    #[tokio::test]
    async fn test_schema_is_served() {
        let service = service(Arc::new(FakeScaleway::new()));
        let schema = service
            .get_schema(Request::new(proto::GetSchemaRequest {}))
            .await
            .unwrap()
            .into_inner();
        let server = &schema.resources["scaleway_instance_server"];
        let block = server.block.as_ref().unwrap();
        assert!(block.attributes.iter().any(|a| a.name == "ip_id"));
        assert!(block.block_types.iter().any(|b| b.type_name == "root_volume"));
        assert!(schema.data_sources.contains_key("scaleway_iam_policy_document"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_the_provider() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(serve_listener(
            ScalewayProvider::with_api(Arc::new(FakeScaleway::new()), ProviderConfig::default()),
            listener,
            ServeOptions::new().with_shutdown_timeout(Duration::from_secs(1)),
            async move {
                rx.await.ok();
            },
        ));
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
