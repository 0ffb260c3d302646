//! Resource kinds and the registry that holds them.
//!
//! Every resource kind is a [`ResourceDescriptor`]: its schema, where its
//! API lives, how its id is built, its status values and its update rules.
//! [`DescriptorResource`] runs the generic CRUD engine in
//! [`crate::dispatcher`] over a descriptor, and [`ResourceRegistry`] maps
//! kind names to [`Resource`] implementations.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::api::ApiTarget;
use crate::config::ProviderConfig;
use crate::context::{OperationContext, Timeouts};
use crate::dispatcher;
use crate::error::ProviderError;
use crate::locality::{Locality, LocalityKind};
use crate::planner::TransitionRule;
use crate::schema::{Diagnostic, ProviderSchema, Schema};
use crate::sweeper::SweepOutcome;
use crate::types::PlanResult;
use crate::upgrade::{upgrade_state, StateUpgrader};
use crate::validation;

/// Where the API of a resource kind lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Product and version, such as `instance/v1`.
    pub product: &'static str,
    /// Collection name.
    pub collection: &'static str,
    /// Key wrapping single objects in responses.
    pub envelope: Option<&'static str>,
    /// Parent collection the resource is created under.
    pub parent: Option<Parent>,
    /// API field holding the resource id.
    pub id_field: &'static str,
}

/// A parent resource in the API path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parent {
    /// The parent's collection, such as `servers`.
    pub collection: &'static str,
    /// The state attribute holding the parent id.
    pub attribute: &'static str,
}

impl Endpoint {
    /// An endpoint addressed by `id`.
    pub const fn new(product: &'static str, collection: &'static str) -> Self {
        Self {
            product,
            collection,
            envelope: None,
            parent: None,
            id_field: "id",
        }
    }

    /// Set the response envelope.
    pub const fn envelope(mut self, envelope: &'static str) -> Self {
        self.envelope = Some(envelope);
        self
    }

    /// Create the resource under a parent.
    pub const fn parent(mut self, collection: &'static str, attribute: &'static str) -> Self {
        self.parent = Some(Parent {
            collection,
            attribute,
        });
        self
    }

    /// Read the resource id from another API field.
    pub const fn id_field(mut self, field: &'static str) -> Self {
        self.id_field = field;
        self
    }

    /// Target the collection in `locality`.
    pub fn target(&self, locality: &Locality) -> ApiTarget {
        ApiTarget::new(self.product, self.collection, locality.clone()).with_envelope(self.envelope)
    }
}

/// How the composite id of a resource kind is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdScheme {
    /// `<locality>/<uuid>`.
    Uuid,
    /// `<locality>/<name>`; the API addresses the resource by the value of
    /// the given attribute.
    Name(&'static str),
    /// `<locality>/<parent>/<child>`; the parent is [`Endpoint::parent`]
    /// and is part of every API path.
    Nested,
}

/// Status values of an asynchronous resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMachine {
    /// API field holding the status.
    pub field: &'static str,
    /// Statuses that mean "keep polling".
    pub transitional: &'static [&'static str],
    /// Statuses that mean ready. Empty means any other status.
    pub terminal: &'static [&'static str],
    /// Statuses that mean the resource is broken.
    pub failure: &'static [&'static str],
    /// Statuses that mean the resource has been deleted.
    pub deleted: &'static [&'static str],
    /// Whether delete returns before the resource is gone.
    pub async_delete: bool,
}

/// How a resource is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteMethod {
    /// `DELETE` on the resource.
    Delete,
    /// An action such as `terminate`, posted to `path`.
    Action {
        /// Sub-path of the action endpoint.
        path: &'static str,
        /// The action name.
        action: &'static str,
    },
}

/// How a resource kind fills in its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Naming {
    /// Names are left to the user or the API.
    Given,
    /// An unset `name` becomes `tf-<short>-<suffix>`.
    Random(&'static str),
    /// `name`, or a unique name derived from `name_prefix`; FIFO queues,
    /// flagged by the given boolean attribute, end in `.fifo`.
    Queue(&'static str),
}

/// Resource-specific adjustments to the generic mapping.
#[derive(Clone, Copy, Default)]
pub struct Hooks {
    /// Adjust a request body built from state.
    pub expand: Option<fn(&Value, &mut Value)>,
    /// Adjust state flattened from an API object.
    pub flatten: Option<fn(&Value, &mut Value)>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("expand", &self.expand.is_some())
            .field("flatten", &self.flatten.is_some())
            .finish()
    }
}

/// Static description of one resource kind.
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    /// Kind name, such as `scaleway_instance_ip`.
    pub name: &'static str,
    /// How the kind is scoped.
    pub locality: LocalityKind,
    /// Attributes and blocks.
    pub schema: Schema,
    /// Where the API lives.
    pub endpoint: Endpoint,
    /// How ids are built.
    pub id: IdScheme,
    /// Status values, for asynchronous kinds.
    pub states: Option<StateMachine>,
    /// Per-phase timeouts.
    pub timeouts: Timeouts,
    /// Update ordering and validity rules.
    pub rules: &'static [TransitionRule],
    /// Whether a 403 on read means the resource was deleted.
    pub read_gone_on_forbidden: bool,
    /// Whether a 409 on create is retried.
    pub retry_conflict_on_create: bool,
    /// Upgraders from every older schema version.
    pub upgraders: &'static [StateUpgrader],
    /// Name generation.
    pub naming: Naming,
    /// Attributes whose referenced resources are locked during mutations.
    pub lock_on: &'static [&'static str],
    /// How the resource is deleted.
    pub delete: DeleteMethod,
    /// Position in the sweep order, for kinds that can be swept.
    pub sweep_order: Option<u32>,
    /// Mapping adjustments.
    pub hooks: Hooks,
}

impl ResourceDescriptor {
    /// Describe a resource kind with default behaviour.
    pub fn new(
        name: &'static str,
        locality: LocalityKind,
        endpoint: Endpoint,
        schema: Schema,
    ) -> Self {
        Self {
            name,
            locality,
            schema,
            endpoint,
            id: IdScheme::Uuid,
            states: None,
            timeouts: Timeouts::default(),
            rules: &[],
            read_gone_on_forbidden: false,
            retry_conflict_on_create: false,
            upgraders: &[],
            naming: Naming::Given,
            lock_on: &[],
            delete: DeleteMethod::Delete,
            sweep_order: None,
            hooks: Hooks::default(),
        }
    }

    /// Set the id scheme.
    pub fn with_id(mut self, id: IdScheme) -> Self {
        self.id = id;
        self
    }

    /// Set the status values.
    pub fn with_states(mut self, states: StateMachine) -> Self {
        self.states = Some(states);
        self
    }

    /// Set the timeouts.
    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the update rules.
    pub fn with_rules(mut self, rules: &'static [TransitionRule]) -> Self {
        self.rules = rules;
        self
    }

    /// Treat a 403 on read as deletion.
    pub fn read_gone_on_forbidden(mut self) -> Self {
        self.read_gone_on_forbidden = true;
        self
    }

    /// Retry 409s on create.
    pub fn retry_conflict_on_create(mut self) -> Self {
        self.retry_conflict_on_create = true;
        self
    }

    /// Set the state upgraders.
    pub fn with_upgraders(mut self, upgraders: &'static [StateUpgrader]) -> Self {
        self.upgraders = upgraders;
        self
    }

    /// Set the naming rule.
    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Lock the resources referenced by these attributes during mutations.
    pub fn lock_on(mut self, attributes: &'static [&'static str]) -> Self {
        self.lock_on = attributes;
        self
    }

    /// Set the delete method.
    pub fn with_delete(mut self, delete: DeleteMethod) -> Self {
        self.delete = delete;
        self
    }

    /// Make the kind sweepable.
    pub fn sweep(mut self, order: u32) -> Self {
        self.sweep_order = Some(order);
        self
    }

    /// Set the mapping hooks.
    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }
}

/// A resource kind the provider can manage.
#[async_trait]
pub trait Resource: Send + Sync {
    /// The kind name.
    fn name(&self) -> &'static str;

    /// How the kind is scoped.
    fn locality_kind(&self) -> LocalityKind;

    /// The schema.
    fn schema(&self) -> &Schema;

    /// Per-phase timeouts.
    fn timeouts(&self) -> Timeouts;

    /// Validate a configuration, reporting every problem.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validation::validate(self.schema(), config)
    }

    /// Bring stored state up to the current schema version.
    fn upgrade_state(&self, version: u64, state: Value) -> Result<Value, ProviderError>;

    /// Compute the changes between prior state and desired configuration.
    fn plan(
        &self,
        config: &ProviderConfig,
        prior: Option<&Value>,
        proposed: Value,
    ) -> Result<PlanResult, ProviderError>;

    /// Create the resource; returns its state.
    async fn create(&self, ctx: &OperationContext, planned: Value)
        -> Result<Value, ProviderError>;

    /// Refresh the state; `None` when the resource is gone.
    async fn read(&self, ctx: &OperationContext, state: Value)
        -> Result<Option<Value>, ProviderError>;

    /// Update the resource in place; returns its new state.
    async fn update(
        &self,
        ctx: &OperationContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the resource.
    async fn delete(&self, ctx: &OperationContext, state: Value) -> Result<(), ProviderError>;

    /// Build the state of an existing resource from its id.
    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<Value, ProviderError>;

    /// Position in the sweep order; `None` if the kind is not swept.
    fn sweep_order(&self) -> Option<u32> {
        None
    }

    /// Delete every resource in `locality` whose name starts with `prefix`.
    async fn sweep(
        &self,
        ctx: &OperationContext,
        locality: &Locality,
        prefix: &str,
    ) -> Result<SweepOutcome, ProviderError> {
        let _ = (ctx, locality, prefix);
        Ok(SweepOutcome::default())
    }
}

/// A resource kind driven entirely by its descriptor.
#[derive(Debug, Clone)]
pub struct DescriptorResource {
    descriptor: ResourceDescriptor,
}

impl DescriptorResource {
    /// Wrap a descriptor.
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        Self { descriptor }
    }

    /// The descriptor.
    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl Resource for DescriptorResource {
    fn name(&self) -> &'static str {
        self.descriptor.name
    }

    fn locality_kind(&self) -> LocalityKind {
        self.descriptor.locality
    }

    fn schema(&self) -> &Schema {
        &self.descriptor.schema
    }

    fn timeouts(&self) -> Timeouts {
        self.descriptor.timeouts
    }

    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        dispatcher::validate(&self.descriptor, config)
    }

    fn upgrade_state(&self, version: u64, state: Value) -> Result<Value, ProviderError> {
        upgrade_state(
            self.descriptor.upgraders,
            version,
            self.descriptor.schema.version,
            state,
        )
    }

    fn plan(
        &self,
        config: &ProviderConfig,
        prior: Option<&Value>,
        proposed: Value,
    ) -> Result<PlanResult, ProviderError> {
        dispatcher::plan(&self.descriptor, config, prior, proposed)
    }

    async fn create(
        &self,
        ctx: &OperationContext,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        dispatcher::create(&self.descriptor, ctx, planned).await
    }

    async fn read(
        &self,
        ctx: &OperationContext,
        state: Value,
    ) -> Result<Option<Value>, ProviderError> {
        dispatcher::read(&self.descriptor, ctx, state).await
    }

    async fn update(
        &self,
        ctx: &OperationContext,
        prior: Value,
        planned: Value,
    ) -> Result<Value, ProviderError> {
        dispatcher::update(&self.descriptor, ctx, prior, planned).await
    }

    async fn delete(&self, ctx: &OperationContext, state: Value) -> Result<(), ProviderError> {
        dispatcher::delete(&self.descriptor, ctx, state).await
    }

    async fn import(&self, ctx: &OperationContext, id: &str) -> Result<Value, ProviderError> {
        dispatcher::import(&self.descriptor, ctx, id).await
    }

    fn sweep_order(&self) -> Option<u32> {
        self.descriptor.sweep_order
    }

    async fn sweep(
        &self,
        ctx: &OperationContext,
        locality: &Locality,
        prefix: &str,
    ) -> Result<SweepOutcome, ProviderError> {
        if self.descriptor.sweep_order.is_none() {
            return Ok(SweepOutcome::default());
        }
        dispatcher::sweep(&self.descriptor, ctx, locality, prefix).await
    }
}

/// A read-only data source.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// The data source name.
    fn name(&self) -> &'static str;

    /// The schema.
    fn schema(&self) -> &Schema;

    /// Validate a configuration.
    fn validate(&self, config: &Value) -> Vec<Diagnostic> {
        validation::validate(self.schema(), config)
    }

    /// Compute the data source's state.
    async fn read(&self, ctx: &OperationContext, config: Value) -> Result<Value, ProviderError>;
}

/// Resource kinds and data sources by name.
#[derive(Default, Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<&'static str, Arc<dyn Resource>>,
    data_sources: BTreeMap<&'static str, Arc<dyn DataSource>>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("resources", &self.resources.keys().collect::<Vec<_>>())
            .field("data_sources", &self.data_sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResourceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every resource kind and data source this provider ships.
    pub fn builtin() -> &'static ResourceRegistry {
        static BUILTIN: OnceLock<ResourceRegistry> = OnceLock::new();
        BUILTIN.get_or_init(crate::resources::registry)
    }

    /// Register a resource kind.
    pub fn register(&mut self, resource: Arc<dyn Resource>) -> &mut Self {
        self.resources.insert(resource.name(), resource);
        self
    }

    /// Register a descriptor-driven resource kind.
    pub fn register_descriptor(&mut self, descriptor: ResourceDescriptor) -> &mut Self {
        self.register(Arc::new(DescriptorResource::new(descriptor)))
    }

    /// Register a data source.
    pub fn register_data_source(&mut self, data_source: Arc<dyn DataSource>) -> &mut Self {
        self.data_sources.insert(data_source.name(), data_source);
        self
    }

    /// Look up a resource kind.
    pub fn resource(&self, name: &str) -> Result<&Arc<dyn Resource>, ProviderError> {
        self.resources
            .get(name)
            .ok_or_else(|| ProviderError::UnknownResource(name.to_string()))
    }

    /// Look up a data source.
    pub fn data_source(&self, name: &str) -> Result<&Arc<dyn DataSource>, ProviderError> {
        self.data_sources
            .get(name)
            .ok_or_else(|| ProviderError::UnknownResource(format!("data source {}", name)))
    }

    /// Every resource kind, by name.
    pub fn resources(&self) -> impl Iterator<Item = &Arc<dyn Resource>> {
        self.resources.values()
    }

    /// The schema of every resource kind and data source.
    pub fn provider_schema(&self, provider: Schema) -> ProviderSchema {
        let mut schema = ProviderSchema::new().with_provider_config(provider);
        for (name, resource) in &self.resources {
            schema = schema.with_resource(*name, resource.schema().clone());
        }
        for (name, data_source) in &self.data_sources {
            schema = schema.with_data_source(*name, data_source.schema().clone());
        }
        schema
    }
}
