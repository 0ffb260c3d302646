//! Testing utilities: an in-memory Scaleway and a provider harness.
//!
//! [`FakeScaleway`] implements [`ScalewayApi`] without a network. It keeps
//! objects per locality and collection, walks configured status
//! progressions as objects are polled, simulates server power actions and
//! the link between servers and their public IPs, and can inject failures
//! and latency. Every call is logged.
//!
//! [`ProviderTester`] drives a [`ProviderService`] through plan/apply
//! lifecycles without a gRPC server.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use scaleway_provider::testing::{FakeScaleway, ProviderTester};
//! use scaleway_provider::ScalewayProvider;
//! use serde_json::json;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_create_ip() {
//!     let fake = Arc::new(FakeScaleway::new());
//!     let tester = ProviderTester::new(ScalewayProvider::with_api(fake.clone(), config()));
//!     let ip = tester
//!         .lifecycle_create("scaleway_instance_ip", json!({"type": "nat"}))
//!         .await
//!         .unwrap();
//!     assert_eq!(ip["type"], "nat");
//! }
//! ```

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::api::{ApiError, ApiTarget, ScalewayApi};
use crate::error::ProviderError;
use crate::schema::{Diagnostic, DiagnosticSeverity, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// The kind of a logged API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `create`.
    Create,
    /// `get`.
    Get,
    /// `update`.
    Update,
    /// `delete`.
    Delete,
    /// `action`.
    Action,
    /// `list`.
    List,
}

/// One logged API call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    /// What was called.
    pub method: Method,
    /// The target path.
    pub path: String,
    /// The request body, if any.
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ObjectKey {
    locality: String,
    collection: String,
    parent: Option<String>,
    id: String,
}

#[derive(Debug, Clone)]
struct FakeObject {
    value: Value,
    field: Option<String>,
    pending: VecDeque<String>,
    deleting: bool,
}

impl FakeObject {
    /// Advance one step of the pending status progression.
    fn advance(&mut self) {
        if let (Some(field), Some(next)) = (&self.field, self.pending.pop_front()) {
            if let Some(obj) = self.value.as_object_mut() {
                obj.insert(field.clone(), json!(next));
            }
        }
    }

    fn set_status(&mut self, field: &str, now: &str, then: &[&str]) {
        self.field = Some(field.to_string());
        if let Some(obj) = self.value.as_object_mut() {
            obj.insert(field.to_string(), json!(now));
        }
        self.pending = then.iter().map(|s| s.to_string()).collect();
    }
}

#[derive(Debug, Default)]
struct FakeState {
    objects: BTreeMap<ObjectKey, FakeObject>,
    progressions: HashMap<String, (String, Vec<String>)>,
    deletions: HashMap<String, Vec<String>>,
    sequential: HashMap<String, String>,
    failures: VecDeque<(Method, String, ApiError)>,
    calls: Vec<Call>,
    latency: Duration,
    in_flight: HashMap<String, usize>,
    max_in_flight: usize,
    next_address: u32,
}

/// An in-memory Scaleway.
#[derive(Debug, Default)]
pub struct FakeScaleway {
    state: Mutex<FakeState>,
}

impl FakeScaleway {
    /// An empty Scaleway.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Objects of `collection` start in `states[0]` and move one state
    /// further on every read.
    pub fn with_progression(&self, collection: &str, field: &str, states: &[&str]) -> &Self {
        self.lock().progressions.insert(
            collection.to_string(),
            (field.to_string(), states.iter().map(|s| s.to_string()).collect()),
        );
        self
    }

    /// Deleted objects of `collection` walk through `states` before they
    /// disappear.
    pub fn with_deletion(&self, collection: &str, states: &[&str]) -> &Self {
        self.lock().deletions.insert(
            collection.to_string(),
            states.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Objects of `collection` get increasing numeric ids in `field`,
    /// counted per parent.
    pub fn with_sequential_ids(&self, collection: &str, field: &str) -> &Self {
        self.lock()
            .sequential
            .insert(collection.to_string(), field.to_string());
        self
    }

    /// Delay every call by `latency`.
    pub fn with_latency(&self, latency: Duration) -> &Self {
        self.lock().latency = latency;
        self
    }

    /// Fail the next `method` call on `collection` with `error`.
    pub fn fail_next(&self, method: Method, collection: &str, error: ApiError) -> &Self {
        self.lock()
            .failures
            .push_back((method, collection.to_string(), error));
        self
    }

    /// Insert an object directly, returning its id.
    pub fn seed(&self, collection: &str, locality: &str, value: Value) -> String {
        let mut value = value;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), json!(id));
        }
        let key = ObjectKey {
            locality: locality.to_string(),
            collection: collection.to_string(),
            parent: None,
            id: id.clone(),
        };
        self.lock().objects.insert(
            key,
            FakeObject {
                value,
                field: None,
                pending: VecDeque::new(),
                deleting: false,
            },
        );
        id
    }

    /// Remove an object behind the provider's back.
    pub fn forget(&self, collection: &str, id: &str) {
        self.lock()
            .objects
            .retain(|key, _| !(key.collection == collection && key.id == id));
    }

    /// Every object of `collection`, in any locality.
    pub fn objects(&self, collection: &str) -> Vec<Value> {
        self.lock()
            .objects
            .iter()
            .filter(|(key, _)| key.collection == collection)
            .map(|(_, object)| object.value.clone())
            .collect()
    }

    /// One object, by bare id.
    pub fn object(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .objects
            .iter()
            .find(|(key, _)| key.collection == collection && key.id == id)
            .map(|(_, object)| object.value.clone())
    }

    /// Every call made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls of one kind.
    pub fn count(&self, method: Method) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    /// Forget the call log.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of mutating calls ever in flight on one resource.
    pub fn max_concurrent_mutations(&self) -> usize {
        self.lock().max_in_flight
    }

    /// Log the call and apply injected failures and latency.
    async fn enter(
        &self,
        method: Method,
        target: &ApiTarget,
        body: Option<&Value>,
    ) -> Result<(), ApiError> {
        let (latency, failure) = {
            let mut state = self.lock();
            state.calls.push(Call {
                method,
                path: target.path(),
                body: body.cloned(),
            });
            let position = state
                .failures
                .iter()
                .position(|(m, c, _)| *m == method && c == target.collection);
            let failure = position
                .and_then(|i| state.failures.remove(i))
                .map(|(_, _, err)| err);
            (state.latency, failure)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Run a mutation, tracking how many run at once on the same resource.
    async fn mutate<T>(
        &self,
        method: Method,
        target: &ApiTarget,
        body: Option<&Value>,
        apply: impl FnOnce(&mut FakeState) -> Result<T, ApiError>,
    ) -> Result<T, ApiError> {
        let key = target.id.clone().unwrap_or_default();
        {
            let mut state = self.lock();
            let in_flight = state.in_flight.entry(key.clone()).or_default();
            *in_flight += 1;
            let now = *in_flight;
            state.max_in_flight = state.max_in_flight.max(now);
        }
        let entered = self.enter(method, target, body).await;
        let mut state = self.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&key) {
            *in_flight = in_flight.saturating_sub(1);
        }
        entered?;
        apply(&mut *state)
    }
}

fn locality_key(target: &ApiTarget) -> String {
    target.locality.to_string()
}

fn not_found(target: &ApiTarget) -> ApiError {
    ApiError::not_found(format!("resource {} not found", target.path()))
}

/// The singular of a parent collection, as used in API field names.
fn singular(collection: &str) -> &str {
    collection.strip_suffix('s').unwrap_or(collection)
}

impl FakeState {
    fn find(&self, target: &ApiTarget) -> Option<ObjectKey> {
        let id = target.id.as_deref()?;
        let locality = locality_key(target);
        let parent = target.parent.as_ref().map(|(_, p)| p.as_str());
        self.objects
            .keys()
            .find(|key| {
                key.locality == locality
                    && key.collection == target.collection
                    && key.id == id
                    && parent.map_or(true, |p| key.parent.as_deref() == Some(p))
            })
            .cloned()
    }

    fn find_in(&self, locality: &str, collection: &str, id: &str) -> Option<ObjectKey> {
        self.objects
            .keys()
            .find(|key| key.locality == locality && key.collection == collection && key.id == id)
            .cloned()
    }

    fn allocate_address(&mut self) -> String {
        self.next_address += 1;
        format!("51.15.{}.{}", self.next_address / 250, self.next_address % 250 + 1)
    }

    /// Point a server at `ip_id` and the IP back at the server.
    fn attach_ip(&mut self, locality: &str, server_id: &str, ip_id: &str) -> Result<(), ApiError> {
        let ip_key = self
            .find_in(locality, "ips", ip_id)
            .ok_or_else(|| ApiError::not_found(format!("ip {} not found", ip_id)))?;
        let address = self
            .objects
            .get(&ip_key)
            .and_then(|ip| ip.value.get("address").cloned())
            .unwrap_or(Value::Null);
        if let Some(ip) = self.objects.get_mut(&ip_key) {
            ip.value["server"] = json!({ "id": server_id });
        }
        if let Some(server_key) = self.find_in(locality, "servers", server_id) {
            if let Some(server) = self.objects.get_mut(&server_key) {
                server.value["public_ip"] = json!({ "id": ip_id, "address": address });
            }
        }
        Ok(())
    }

    fn detach_ip_of_server(&mut self, locality: &str, server_id: &str) {
        let ip_id = self
            .find_in(locality, "servers", server_id)
            .and_then(|key| self.objects.get(&key))
            .and_then(|server| server.value.pointer("/public_ip/id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(ip_key) = ip_id.and_then(|id| self.find_in(locality, "ips", &id)) {
            if let Some(ip) = self.objects.get_mut(&ip_key) {
                ip.value["server"] = Value::Null;
            }
        }
        if let Some(server_key) = self.find_in(locality, "servers", server_id) {
            if let Some(server) = self.objects.get_mut(&server_key) {
                server.value["public_ip"] = Value::Null;
            }
        }
    }

    fn detach_server_of_ip(&mut self, locality: &str, ip_id: &str) {
        let server_id = self
            .find_in(locality, "ips", ip_id)
            .and_then(|key| self.objects.get(&key))
            .and_then(|ip| ip.value.pointer("/server/id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(server_id) = server_id {
            self.detach_ip_of_server(locality, &server_id);
        }
    }

    fn create(&mut self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        let locality = locality_key(target);
        let parent = target.parent.as_ref().map(|(_, p)| p.clone());
        let mut value = match body {
            Value::Object(obj) => obj,
            _ => Map::new(),
        };

        let id = if let Some(field) = self.sequential.get(target.collection).cloned() {
            let next = self
                .objects
                .keys()
                .filter(|k| k.collection == target.collection && k.parent == parent)
                .count()
                + 1;
            value.insert(field, json!(next));
            next.to_string()
        } else if let Some(id) = &target.id {
            if self.find(target).is_some() {
                return Err(ApiError::conflict(format!("{} already exists", id)));
            }
            value.insert("name".to_string(), json!(id));
            id.clone()
        } else {
            let id = Uuid::new_v4().to_string();
            value.insert("id".to_string(), json!(id));
            id
        };

        if let Some((collection, parent_id)) = &target.parent {
            value.insert(format!("{}_id", singular(collection)), json!(parent_id));
        }
        match &target.locality {
            crate::locality::Locality::Zone(zone) => {
                value.insert("zone".to_string(), json!(zone.as_str()));
            },
            crate::locality::Locality::Region(region) => {
                value.insert("region".to_string(), json!(region.as_str()));
            },
            crate::locality::Locality::Global => {},
        }
        value
            .entry("project".to_string())
            .or_insert_with(|| json!("00000000-0000-0000-0000-000000000000"));

        let mut object = FakeObject {
            value: Value::Object(value),
            field: None,
            pending: VecDeque::new(),
            deleting: false,
        };
        match target.collection {
            "ips" => {
                let address = self.allocate_address();
                object.value["address"] = json!(address);
                object.value["server"] = Value::Null;
            },
            "servers" => object.set_status("state", "stopped", &[]),
            _ => {},
        }
        if let Some((field, states)) = self.progressions.get(target.collection) {
            if let Some((first, rest)) = states.split_first() {
                let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
                object.set_status(field, first, &rest);
            }
        }

        let key = ObjectKey {
            locality: locality.clone(),
            collection: target.collection.to_string(),
            parent,
            id: id.clone(),
        };
        let ip_id = object
            .value
            .pointer("/public_ip/id")
            .and_then(Value::as_str)
            .map(str::to_string);
        self.objects.insert(key.clone(), object);

        if target.collection == "servers" {
            if let Some(ip_id) = ip_id {
                if let Err(err) = self.attach_ip(&locality, &id, &ip_id) {
                    self.objects.remove(&key);
                    return Err(err);
                }
            }
        }
        self.objects
            .get(&key)
            .map(|o| o.value.clone())
            .ok_or_else(|| not_found(target))
    }

    fn get(&mut self, target: &ApiTarget) -> Result<Value, ApiError> {
        let key = self.find(target).ok_or_else(|| not_found(target))?;
        let gone = match self.objects.get_mut(&key) {
            Some(object) if object.deleting && object.pending.is_empty() => true,
            Some(object) => {
                object.advance();
                false
            },
            None => true,
        };
        if gone {
            self.objects.remove(&key);
            return Err(not_found(target));
        }
        self.objects
            .get(&key)
            .map(|o| o.value.clone())
            .ok_or_else(|| not_found(target))
    }

    fn update(&mut self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        let key = self.find(target).ok_or_else(|| not_found(target))?;
        let locality = key.locality.clone();
        let new_ip = if target.collection == "servers" {
            body.get("public_ip").map(|ip| {
                ip.get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
        } else {
            None
        };
        if let Some(object) = self.objects.get_mut(&key) {
            if let (Some(obj), Value::Object(changes)) = (object.value.as_object_mut(), body) {
                for (name, value) in changes {
                    if target.collection == "servers" && name == "public_ip" {
                        continue;
                    }
                    obj.insert(name, value);
                }
            }
        }
        if let Some(new_ip) = new_ip {
            self.detach_ip_of_server(&locality, &key.id);
            if let Some(ip_id) = new_ip {
                self.attach_ip(&locality, &key.id, &ip_id)?;
            }
        }
        self.objects
            .get(&key)
            .map(|o| o.value.clone())
            .ok_or_else(|| not_found(target))
    }

    fn delete(&mut self, target: &ApiTarget) -> Result<(), ApiError> {
        let key = self.find(target).ok_or_else(|| not_found(target))?;
        match target.collection {
            "servers" => self.detach_ip_of_server(&key.locality, &key.id),
            "ips" => self.detach_server_of_ip(&key.locality, &key.id),
            _ => {},
        }
        let deletion = self.deletions.get(target.collection).cloned();
        match (deletion, self.objects.get_mut(&key)) {
            (Some(states), Some(object)) if !states.is_empty() => {
                let field = object
                    .field
                    .clone()
                    .unwrap_or_else(|| "status".to_string());
                let rest: Vec<&str> = states[1..].iter().map(String::as_str).collect();
                object.set_status(&field, &states[0], &rest);
                object.deleting = true;
            },
            _ => {
                self.objects.remove(&key);
            },
        }
        Ok(())
    }

    fn action(&mut self, target: &ApiTarget, body: &Value) -> Result<Value, ApiError> {
        let key = self.find(target).ok_or_else(|| not_found(target))?;
        let action = body.get("action").and_then(Value::as_str).unwrap_or("");
        if action == "terminate" {
            self.detach_ip_of_server(&key.locality, &key.id);
        }
        let object = self.objects.get_mut(&key).ok_or_else(|| not_found(target))?;
        match action {
            "poweron" => object.set_status("state", "starting", &["running"]),
            "poweroff" => object.set_status("state", "stopping", &["stopped"]),
            "stop_in_place" => object.set_status("state", "stopping", &["stopped in place"]),
            "terminate" => {
                object.set_status("state", "stopping", &["stopped"]);
                object.deleting = true;
            },
            other => {
                return Err(ApiError::from_status(
                    400,
                    format!("unknown action {:?}", other),
                ))
            },
        }
        Ok(json!({ "task": { "id": Uuid::new_v4().to_string(), "description": action } }))
    }

    fn list(&self, target: &ApiTarget) -> Vec<Value> {
        let locality = locality_key(target);
        let parent = target.parent.as_ref().map(|(_, p)| p.as_str());
        self.objects
            .iter()
            .filter(|(key, object)| {
                key.locality == locality
                    && key.collection == target.collection
                    && parent.map_or(true, |p| key.parent.as_deref() == Some(p))
                    && !object.deleting
            })
            .map(|(_, object)| object.value.clone())
            .collect()
    }
}

#[async_trait]
impl ScalewayApi for FakeScaleway {
    async fn create(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        self.enter(Method::Create, target, Some(&body)).await?;
        self.lock().create(target, body)
    }

    async fn get(&self, target: &ApiTarget) -> Result<Value, ApiError> {
        self.enter(Method::Get, target, None).await?;
        self.lock().get(target)
    }

    async fn update(&self, target: &ApiTarget, body: Value) -> Result<Value, ApiError> {
        let request = body.clone();
        self.mutate(Method::Update, target, Some(&request), move |state| {
            state.update(target, body)
        })
        .await
    }

    async fn delete(&self, target: &ApiTarget) -> Result<(), ApiError> {
        self.mutate(Method::Delete, target, None, |state| state.delete(target))
            .await
    }

    async fn action(
        &self,
        target: &ApiTarget,
        _action: &str,
        body: Value,
    ) -> Result<Value, ApiError> {
        self.mutate(Method::Action, target, Some(&body), |state| {
            state.action(target, &body)
        })
        .await
    }

    async fn list(&self, target: &ApiTarget) -> Result<Vec<Value>, ApiError> {
        self.enter(Method::List, target, None).await?;
        Ok(self.lock().list(target))
    }
}

/// A test harness for provider implementations.
///
/// This wraps a `ProviderService` implementation and provides
/// simplified methods for testing without a gRPC server.
pub struct ProviderTester<P: ProviderService> {
    provider: P,
}

impl<P: ProviderService> ProviderTester<P> {
    /// Create a new tester for the given provider.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Get a reference to the underlying provider.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Get the provider's schema.
    pub fn schema(&self) -> ProviderSchema {
        self.provider.schema()
    }

    /// Get the list of resource type names.
    pub fn resource_types(&self) -> Vec<String> {
        self.provider.metadata().resources
    }

    /// Validate provider configuration.
    pub async fn validate_provider_config(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.validate_provider_config(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Configure the provider.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Stop the provider.
    pub async fn stop(&self) -> Result<(), ProviderError> {
        self.provider.stop().await
    }

    /// Validate a resource configuration.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation (no prior state).
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan a change of an existing resource.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Create a new resource.
    pub async fn create(
        &self,
        resource_type: &str,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.create(resource_type, planned_state).await
    }

    /// Read the current state of a resource; null when it is gone.
    pub async fn read(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, current_state).await
    }

    /// Update an existing resource.
    pub async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .update(resource_type, prior_state, planned_state)
            .await
    }

    /// Delete a resource.
    pub async fn delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, current_state).await
    }

    /// Import an existing resource.
    pub async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Upgrade resource state from an older schema version.
    pub async fn upgrade_resource_state(
        &self,
        resource_type: &str,
        version: i64,
        state: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .upgrade_resource_state(resource_type, version, state)
            .await
    }

    /// Read data from a data source.
    pub async fn read_data_source(
        &self,
        data_source_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        self.provider
            .read_data_source(data_source_type, config)
            .await
    }

    /// Run a full create lifecycle: plan → create → read.
    pub async fn lifecycle_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self.plan_create(resource_type, config).await?;
        let created = self.create(resource_type, plan.planned_state).await?;
        self.read(resource_type, created).await
    }

    /// Run a full update lifecycle: plan → update → read.
    pub async fn lifecycle_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let plan = self
            .plan_update(resource_type, prior_state.clone(), config)
            .await?;
        let updated = self
            .update(resource_type, prior_state, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Run a full delete lifecycle: plan → delete.
    pub async fn lifecycle_delete(
        &self,
        resource_type: &str,
        current_state: Value,
    ) -> Result<(), ProviderError> {
        let _ = self
            .plan_delete(resource_type, current_state.clone())
            .await?;
        self.delete(resource_type, current_state).await
    }

    /// Apply `config` the way a host does: plan, then create, update or
    /// destroy-and-recreate, then refresh.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<Value, ProviderError> {
        let Some(prior) = prior_state else {
            return self.lifecycle_create(resource_type, config).await;
        };
        let plan = self.plan_update(resource_type, prior.clone(), config.clone()).await?;
        if plan.is_empty() {
            return Ok(prior);
        }
        if plan.requires_replace {
            self.delete(resource_type, prior).await?;
            return self.lifecycle_create(resource_type, config).await;
        }
        let updated = self
            .update(resource_type, prior, plan.planned_state)
            .await?;
        self.read(resource_type, updated).await
    }

    /// Refresh `state` and plan `config` against it.
    pub async fn refresh_plan(
        &self,
        resource_type: &str,
        state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let refreshed = self.read(resource_type, state).await?;
        let prior = (!refreshed.is_null()).then_some(refreshed);
        self.provider
            .plan(resource_type, prior, config.clone(), config)
            .await
    }
}

/// Error type for test operations that may fail with diagnostics.
#[derive(Debug)]
pub enum TestError {
    /// The operation failed with diagnostics.
    Diagnostics(Vec<Diagnostic>),
    /// The operation failed with a provider error.
    Provider(ProviderError),
}

impl std::fmt::Display for TestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestError::Diagnostics(diags) => {
                writeln!(f, "Operation failed with {} diagnostic(s):", diags.len())?;
                for diag in diags {
                    write!(f, "  [{:?}] {}", diag.severity, diag.summary)?;
                    if let Some(detail) = &diag.detail {
                        write!(f, ": {}", detail)?;
                    }
                    if let Some(attr) = &diag.attribute {
                        write!(f, " (at {})", attr)?;
                    }
                    writeln!(f)?;
                }
                Ok(())
            },
            TestError::Provider(e) => write!(f, "Provider error: {}", e),
        }
    }
}

impl std::error::Error for TestError {}

impl From<ProviderError> for TestError {
    fn from(e: ProviderError) -> Self {
        TestError::Provider(e)
    }
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics
        .into_iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

/// Assert that a plan result indicates no changes.
///
/// # Panics
///
/// Panics if the plan has any changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {} change(s): {:?}",
        plan.changes.len(),
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires resource replacement.
///
/// # Panics
///
/// Panics if the plan does not require replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan does not require resource replacement.
///
/// # Panics
///
/// Panics if the plan requires replacement.
pub fn assert_plan_updates_in_place(plan: &PlanResult) {
    assert!(
        !plan.requires_replace,
        "Expected plan to update in place, but it requires replacement"
    );
}

/// Assert that a plan has a change for a specific attribute path.
///
/// # Panics
///
/// Panics if the plan does not have a change for the given path.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    let has_change = plan.changes.iter().any(|c| c.path == path);
    assert!(
        has_change,
        "Expected plan to change attribute '{}', but it was not changed. Changed attributes: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locality::{Locality, Zone};

    fn target(collection: &'static str) -> ApiTarget {
        ApiTarget::new(
            "instance/v1",
            collection,
            Locality::Zone(Zone::parse("fr-par-1").unwrap()),
        )
    }

    #[tokio::test]
    async fn test_fake_crud() {
        let fake = FakeScaleway::new();
        let created = fake.create(&target("ips"), json!({"type": "nat"})).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["zone"], "fr-par-1");
        assert!(created["address"].is_string());

        let fetched = fake.get(&target("ips").with_id(&id)).await.unwrap();
        assert_eq!(fetched, created);

        fake.update(&target("ips").with_id(&id), json!({"type": "routed_ipv4"}))
            .await
            .unwrap();
        assert_eq!(fake.object("ips", &id).unwrap()["type"], "routed_ipv4");
        assert_eq!(fake.list(&target("ips")).await.unwrap().len(), 1);

        fake.delete(&target("ips").with_id(&id)).await.unwrap();
        let err = fake.get(&target("ips").with_id(&id)).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(fake.count(Method::Get), 2);
    }

    #[tokio::test]
    async fn test_fake_progression() {
        let fake = FakeScaleway::new();
        fake.with_progression("volumes", "status", &["creating", "available"]);
        let created = fake.create(&target("volumes"), json!({})).await.unwrap();
        assert_eq!(created["status"], "creating");
        let id = created["id"].as_str().unwrap().to_string();
        let polled = fake.get(&target("volumes").with_id(&id)).await.unwrap();
        assert_eq!(polled["status"], "available");
        let again = fake.get(&target("volumes").with_id(&id)).await.unwrap();
        assert_eq!(again["status"], "available");
    }

    #[tokio::test]
    async fn test_fake_links_servers_and_ips() {
        let fake = FakeScaleway::new();
        let ip = fake.create(&target("ips"), json!({})).await.unwrap();
        let ip_id = ip["id"].as_str().unwrap().to_string();
        let server = fake
            .create(&target("servers"), json!({"public_ip": {"id": ip_id}}))
            .await
            .unwrap();
        let server_id = server["id"].as_str().unwrap().to_string();
        assert_eq!(server["public_ip"]["address"], ip["address"]);
        assert_eq!(fake.object("ips", &ip_id).unwrap()["server"]["id"], server_id.as_str());

        fake.action(&target("servers").with_id(&server_id), "action", json!({"action": "terminate"}))
            .await
            .unwrap();
        assert!(fake.object("ips", &ip_id).unwrap()["server"].is_null());
    }

    #[tokio::test]
    async fn test_fake_failure_injection() {
        let fake = FakeScaleway::new();
        fake.fail_next(Method::Create, "ips", ApiError::from_status(500, "boom"));
        assert!(fake.create(&target("ips"), json!({})).await.is_err());
        assert!(fake.create(&target("ips"), json!({})).await.is_ok());
        assert_eq!(fake.count(Method::Create), 2);
    }

    #[tokio::test]
    async fn test_fake_name_addressed_conflict() {
        let fake = FakeScaleway::new();
        let bucket = target("buckets").with_id("tf_tests_bucket");
        fake.create(&bucket, json!({})).await.unwrap();
        let err = fake.create(&bucket, json!({})).await.unwrap_err();
        assert_eq!(err.status, Some(409));
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![Diagnostic::error("Invalid name format")];
        assert_error_contains(&diagnostics, "name format");
    }
}
