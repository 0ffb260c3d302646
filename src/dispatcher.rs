//! The generic CRUD engine.
//!
//! Every descriptor-driven resource kind goes through these functions:
//! resolve the locality, validate before any remote call, build the
//! request from the schema, call the API with retries, hand off to the
//! waiter for asynchronous kinds and read the resource back.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument, warn};

use crate::api::ApiTarget;
use crate::config::ProviderConfig;
use crate::context::{Operation, OperationContext};
use crate::diff::{apply_defaults, diff, planned_state};
use crate::error::ProviderError;
use crate::locality::{
    expand_id, extract_locality, format_nested, parse_nested, parse_regional, parse_zoned,
    Locality, LocalityError, LocalityKind,
};
use crate::logging::redact_sensitive;
use crate::mapping;
use crate::naming::{queue_name, random_name};
use crate::planner::{self, Step};
use crate::resource::{DeleteMethod, IdScheme, Naming, ResourceDescriptor};
use crate::retry::with_retry;
use crate::schema::Diagnostic;
use crate::sweeper::SweepOutcome;
use crate::types::{AttributeChange, PlanResult};
use crate::validation::{self, is_empty};
use crate::wait::{wait_for, WaitSpec};

/// How long a freshly created resource may stay invisible to reads.
pub const VISIBILITY_WINDOW: Duration = Duration::from_secs(30);

/// A resource id split into the parts the API needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    /// Where the resource lives.
    pub locality: Locality,
    /// The bare parent id, for nested kinds.
    pub parent: Option<String>,
    /// The bare id (or name) the API addresses the resource by.
    pub id: String,
}

/// Validate a resource configuration, reporting every problem.
pub fn validate(desc: &ResourceDescriptor, config: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = validation::validate(&desc.schema, config);
    match planner::check(desc.rules, None, config, &[]) {
        Ok(()) => {},
        Err(ProviderError::Validation(message)) => diagnostics.push(Diagnostic::error(message)),
        Err(other) => diagnostics.push(Diagnostic::error(other.to_string())),
    }
    diagnostics
}

/// Plan the move from `prior` to `proposed`.
///
/// A null `proposed` plans a destroy.
pub fn plan(
    desc: &ResourceDescriptor,
    config: &ProviderConfig,
    prior: Option<&Value>,
    proposed: Value,
) -> Result<PlanResult, ProviderError> {
    if proposed.is_null() {
        let id = prior.and_then(state_id).unwrap_or_default();
        return Ok(PlanResult::from_changes(
            Value::Null,
            vec![AttributeChange::removed("id", json!(id))],
        ));
    }

    let mut desired = proposed;
    if !desired.is_object() {
        return Err(ProviderError::Validation(format!(
            "{} configuration must be an object",
            desc.name
        )));
    }
    apply_defaults(&desc.schema, &mut desired);
    validate_all(desc, &desired)?;

    if prior.is_none() {
        if let Some(field) = desc.locality.field() {
            if field_value(&desired, field).is_none() {
                let locality = extract_locality(desc.locality, None, config)?;
                set_attr(&mut desired, field, json!(locality.to_string()));
            }
        }
    }

    let changes = diff(&desc.schema, prior, &desired);
    planner::check(desc.rules, prior, &desired, &changes)?;
    let replace = prior.is_some() && changes.iter().any(|c| c.requires_replace);
    let planned = planned_state(&desc.schema, prior, &desired, replace);
    debug!(kind = desc.name, changes = changes.len(), replace, "planned");
    Ok(PlanResult::from_changes(planned, changes))
}

/// Create the resource and return its state.
#[instrument(skip_all, name = "create", fields(kind = desc.name))]
pub async fn create(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    planned: Value,
) -> Result<Value, ProviderError> {
    match create_inner(desc, ctx, planned).await {
        Ok(state) => {
            info!(id = state_id(&state).unwrap_or(""), "created");
            Ok(state)
        },
        Err(err) => {
            let id = err.partial_state().and_then(state_id).map(str::to_string);
            warn!(id = id.as_deref().unwrap_or(""), error = %err, "create failed");
            Err(err.in_operation(desc.name, id.as_deref(), Operation::Create))
        },
    }
}

async fn create_inner(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    planned: Value,
) -> Result<Value, ProviderError> {
    let state = prepare(desc, ctx.config(), planned)?;
    let locality = locality_of(desc, ctx.config(), &state)?;

    let mut body = mapping::expand(&desc.schema, &state);
    if let Some(hook) = desc.hooks.expand {
        hook(&state, &mut body);
    }

    let parent = match desc.endpoint.parent {
        Some(parent) => Some(bare_reference(&state, parent.attribute)?),
        None => None,
    };
    let mut target = desc.endpoint.target(&locality);
    if let (Some(p), Some(parent_id)) = (desc.endpoint.parent, &parent) {
        target = target.with_parent(p.collection, parent_id.clone());
    }
    let name = match desc.id {
        IdScheme::Name(attr) => {
            let name = bare_reference(&state, attr)?;
            target = target.with_id(name.clone());
            Some(name)
        },
        _ => None,
    };

    let _guards = ctx.meta.locks.lock_all(&lock_keys(desc, &state, None)).await;
    debug!(body = %redact_body(desc, &body), "creating");

    let api = ctx.api();
    let what = format!("creating {}", desc.name);
    let request = &target;
    let created = with_retry(ctx, &what, desc.retry_conflict_on_create, move || {
        api.create(request, body.clone())
    })
    .await?;

    let bare = match name {
        Some(name) => name,
        None => api_id(&created, desc.endpoint.id_field)?,
    };
    let parsed = ParsedId {
        locality,
        parent: match desc.id {
            IdScheme::Nested => parent,
            _ => None,
        },
        id: bare,
    };
    let id = compose_id(desc, &parsed);
    let mut known = state.clone();
    set_attr(&mut known, "id", json!(id));
    debug!(id = %id, "resource created, waiting for it to settle");

    let finish = async {
        let target = resource_target(desc, &parsed);
        wait_ready(desc, ctx, &target, &format!("{} {}", desc.name, id)).await?;
        for step in planner::plan_post_create(desc.rules, &known) {
            run_step(desc, ctx, &target, &known, &step).await?;
            wait_ready(desc, ctx, &target, &step.describe()).await?;
        }
        read_inner(desc, ctx, &known)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} vanished after create", id)))
    };
    finish.await.map_err(|err| ProviderError::Partial {
        state: known.clone(),
        source: Box::new(err),
    })
}

/// Refresh the state; `None` when the resource is gone.
#[instrument(skip_all, name = "read", fields(kind = desc.name))]
pub async fn read(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    state: Value,
) -> Result<Option<Value>, ProviderError> {
    let id = state_id(&state).map(str::to_string);
    let result = read_inner(desc, ctx, &state).await;
    match &result {
        Ok(Some(_)) => debug!(id = id.as_deref().unwrap_or(""), "refreshed"),
        Ok(None) => info!(id = id.as_deref().unwrap_or(""), "resource is gone, clearing state"),
        Err(err) => warn!(id = id.as_deref().unwrap_or(""), error = %err, "read failed"),
    }
    result.map_err(|err| err.in_operation(desc.name, id.as_deref(), Operation::Read))
}

async fn read_inner(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    prior: &Value,
) -> Result<Option<Value>, ProviderError> {
    let id = required_id(desc, prior)?;
    let fallback = locality_of(desc, ctx.config(), prior).ok();
    let parsed = parse_id(desc, id, fallback.as_ref())?;
    let target = resource_target(desc, &parsed);

    let api = ctx.api();
    let request = &target;
    let gone_on_forbidden = desc.read_gone_on_forbidden;
    let what = format!("reading {}", id);
    let fetched = with_retry(ctx, &what, false, move || async move {
        match api.get(request).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) if gone_on_forbidden && err.is_forbidden() => Ok(None),
            Err(err) => Err(err),
        }
    })
    .await?;

    let Some(obj) = fetched else {
        return Ok(None);
    };
    if let Some(sm) = desc.states {
        let status = obj.get(sm.field).and_then(Value::as_str).unwrap_or("");
        if sm.deleted.contains(&status) {
            debug!(id, status, "resource reports a deleted status");
            return Ok(None);
        }
    }
    Ok(Some(flatten_state(desc, &obj, prior, &parsed)))
}

/// Update the resource in place and return its new state.
///
/// When a step fails after others succeeded, the error carries the state
/// read back from the server.
#[instrument(skip_all, name = "update", fields(kind = desc.name))]
pub async fn update(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    prior: Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let id = state_id(&prior).map(str::to_string);
    match update_inner(desc, ctx, &prior, planned).await {
        Ok(state) => {
            info!(id = id.as_deref().unwrap_or(""), "updated");
            Ok(state)
        },
        Err(err) => {
            warn!(id = id.as_deref().unwrap_or(""), error = %err, "update failed");
            Err(err.in_operation(desc.name, id.as_deref(), Operation::Update))
        },
    }
}

async fn update_inner(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    prior: &Value,
    planned: Value,
) -> Result<Value, ProviderError> {
    let id = required_id(desc, prior)?.to_string();
    let mut desired = planned;
    if !desired.is_object() {
        return Err(ProviderError::Validation(format!(
            "{} configuration must be an object",
            desc.name
        )));
    }
    apply_defaults(&desc.schema, &mut desired);
    validate_all(desc, &desired)?;
    carry_identity(desc, prior, &mut desired, &id);

    let changes = diff(&desc.schema, Some(prior), &desired);
    let steps = planner::plan_update(&desc.schema, desc.rules, prior, &desired, &changes)?;
    if steps.is_empty() {
        debug!(id = %id, "nothing to change");
        return read_inner(desc, ctx, &desired)
            .await?
            .ok_or_else(|| ProviderError::NotFound(format!("{} is gone", id)));
    }

    let fallback = locality_of(desc, ctx.config(), prior)?;
    let parsed = parse_id(desc, &id, Some(&fallback))?;
    let target = resource_target(desc, &parsed);
    let _guards = ctx
        .meta
        .locks
        .lock_all(&lock_keys(desc, &desired, Some(&id)))
        .await;

    for (index, step) in steps.iter().enumerate() {
        debug!(step = index + 1, of = steps.len(), what = %step.describe(), "running update step");
        let result = async {
            run_step(desc, ctx, &target, &desired, step).await?;
            if desc.states.is_some() {
                wait_ready(desc, ctx, &target, &step.describe()).await?;
            }
            Ok::<_, ProviderError>(())
        }
        .await;

        if let Err(err) = result {
            warn!(
                what = %step.describe(),
                abandoned = steps.len() - index - 1,
                "update step failed"
            );
            let state = match read_inner(desc, ctx, prior).await {
                Ok(Some(state)) => state,
                _ => prior.clone(),
            };
            return Err(ProviderError::Partial {
                state,
                source: Box::new(err),
            });
        }
    }

    read_inner(desc, ctx, &desired)
        .await?
        .ok_or_else(|| ProviderError::NotFound(format!("{} vanished during update", id)))
}

/// Delete the resource. A resource that is already gone is not an error.
#[instrument(skip_all, name = "delete", fields(kind = desc.name))]
pub async fn delete(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    state: Value,
) -> Result<(), ProviderError> {
    let id = state_id(&state).map(str::to_string);
    match delete_inner(desc, ctx, &state).await {
        Ok(()) => {
            info!(id = id.as_deref().unwrap_or(""), "deleted");
            Ok(())
        },
        Err(err) => {
            warn!(id = id.as_deref().unwrap_or(""), error = %err, "delete failed");
            Err(err.in_operation(desc.name, id.as_deref(), Operation::Delete))
        },
    }
}

async fn delete_inner(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    state: &Value,
) -> Result<(), ProviderError> {
    let id = required_id(desc, state)?;
    let fallback = locality_of(desc, ctx.config(), state).ok();
    let parsed = parse_id(desc, id, fallback.as_ref())?;
    let target = resource_target(desc, &parsed);
    let _guards = ctx
        .meta
        .locks
        .lock_all(&lock_keys(desc, state, Some(id)))
        .await;

    let api = ctx.api();
    let request = &target;
    let method = desc.delete;
    let what = format!("deleting {}", id);
    let existed = with_retry(ctx, &what, false, move || async move {
        let result = match method {
            DeleteMethod::Delete => api.delete(request).await,
            DeleteMethod::Action { path, action } => api
                .action(request, path, json!({ "action": action }))
                .await
                .map(|_| ()),
        };
        match result {
            Ok(()) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    })
    .await?;

    if !existed {
        debug!(id, "already deleted");
        return Ok(());
    }

    let asynchronous = desc.states.is_some_and(|sm| sm.async_delete)
        || matches!(desc.delete, DeleteMethod::Action { .. });
    if asynchronous {
        wait_gone(desc, ctx, &target, &what).await?;
    }
    Ok(())
}

/// Build the state of an existing resource from its id.
#[instrument(skip_all, name = "import", fields(kind = desc.name, id = %id))]
pub async fn import(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    id: &str,
) -> Result<Value, ProviderError> {
    let result = async {
        let fallback = extract_locality(desc.locality, None, ctx.config()).ok();
        let parsed = parse_id(desc, id, fallback.as_ref())?;
        let minimal = identity_state(desc, &parsed);
        read_inner(desc, ctx, &minimal).await?.ok_or_else(|| {
            ProviderError::NotFound(format!("cannot import non-existent remote object {}", id))
        })
    }
    .await;
    match &result {
        Ok(_) => info!("imported"),
        Err(err) => warn!(error = %err, "import failed"),
    }
    result.map_err(|err| err.in_operation(desc.name, Some(id), Operation::Import))
}

/// Delete every resource of the kind in `locality` whose name starts with
/// `prefix`.
///
/// Individual failures are collected in the outcome; only a failure to
/// list is returned as an error.
#[instrument(skip_all, name = "sweep", fields(kind = desc.name, locality = %locality))]
pub async fn sweep(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    locality: &Locality,
    prefix: &str,
) -> Result<SweepOutcome, ProviderError> {
    let mut outcome = SweepOutcome::default();
    if desc.id == IdScheme::Nested {
        return Ok(outcome);
    }

    let api = ctx.api();
    let target = desc.endpoint.target(locality);
    let request = &target;
    let what = format!("listing {}", desc.endpoint.collection);
    let items = with_retry(ctx, &what, false, move || api.list(request)).await?;

    for item in items {
        let name = item.get("name").and_then(Value::as_str).unwrap_or("");
        if !name.starts_with(prefix) {
            outcome.skipped += 1;
            continue;
        }
        let bare = match desc.id {
            IdScheme::Name(_) => name.to_string(),
            _ => api_id(&item, desc.endpoint.id_field)?,
        };
        let parsed = ParsedId {
            locality: locality.clone(),
            parent: None,
            id: bare,
        };
        let id = compose_id(desc, &parsed);
        debug!(id = %id, name, "sweeping");
        match delete_inner(desc, ctx, &identity_state(desc, &parsed)).await {
            Ok(()) => outcome.deleted.push(id),
            Err(err) => {
                warn!(id = %id, error = %err, "failed to sweep");
                outcome.failed.push((id, err.to_string()));
            },
        }
    }
    Ok(outcome)
}

/// Split a composite id, attaching `fallback` to bare ids.
pub fn parse_id(
    desc: &ResourceDescriptor,
    id: &str,
    fallback: Option<&Locality>,
) -> Result<ParsedId, ProviderError> {
    let parsed = match (desc.id, desc.locality) {
        (IdScheme::Nested, kind) => {
            let nested = parse_nested(id, kind, fallback)?;
            ParsedId {
                locality: nested.locality,
                parent: Some(nested.parent),
                id: nested.child,
            }
        },
        (IdScheme::Name(_), kind) if !id.contains('/') => ParsedId {
            locality: match kind {
                LocalityKind::Global => Locality::Global,
                _ => fallback
                    .cloned()
                    .ok_or(LocalityError::MissingLocality { kind })?,
            },
            parent: None,
            id: id.to_string(),
        },
        (_, LocalityKind::Zonal) => {
            let zoned = parse_zoned(id, fallback.and_then(Locality::zone))?;
            ParsedId {
                locality: Locality::Zone(zoned.zone),
                parent: None,
                id: zoned.id,
            }
        },
        (_, LocalityKind::Regional) => {
            let regional = parse_regional(id, fallback.and_then(Locality::region))?;
            ParsedId {
                locality: Locality::Region(regional.region),
                parent: None,
                id: regional.id,
            }
        },
        (_, LocalityKind::Global) => ParsedId {
            locality: Locality::Global,
            parent: None,
            id: id.to_string(),
        },
    };
    Ok(parsed)
}

/// The composite id of a parsed id.
pub fn compose_id(desc: &ResourceDescriptor, parsed: &ParsedId) -> String {
    match (desc.id, &parsed.parent) {
        (IdScheme::Nested, Some(parent)) => format_nested(&parsed.locality, parent, &parsed.id),
        _ => parsed.locality.format_id(&parsed.id),
    }
}

fn resource_target(desc: &ResourceDescriptor, parsed: &ParsedId) -> ApiTarget {
    let mut target = desc.endpoint.target(&parsed.locality);
    if let (IdScheme::Nested, Some(p), Some(parent)) =
        (desc.id, desc.endpoint.parent, &parsed.parent)
    {
        target = target.with_parent(p.collection, parent.clone());
    }
    target.with_id(parsed.id.clone())
}

/// Defaults, validation, naming and scope of a state about to be created.
fn prepare(
    desc: &ResourceDescriptor,
    config: &ProviderConfig,
    planned: Value,
) -> Result<Value, ProviderError> {
    let mut state = planned;
    if !state.is_object() {
        return Err(ProviderError::Validation(format!(
            "{} configuration must be an object",
            desc.name
        )));
    }
    apply_defaults(&desc.schema, &mut state);
    validate_all(desc, &state)?;

    match desc.naming {
        Naming::Given => {},
        Naming::Random(short) => {
            if field_value(&state, "name").is_none() {
                set_attr(&mut state, "name", json!(random_name(short)));
            }
        },
        Naming::Queue(fifo_attr) => {
            let fifo = state.get(fifo_attr).and_then(Value::as_bool).unwrap_or(false);
            let name = queue_name(
                field_value(&state, "name"),
                field_value(&state, "name_prefix"),
                fifo,
            )?;
            set_attr(&mut state, "name", json!(name));
        },
    }

    if let Some(field) = desc.locality.field() {
        let locality = locality_of(desc, config, &state)?;
        set_attr(&mut state, field, json!(locality.to_string()));
    }
    if desc.schema.attribute("project_id").is_some() && field_value(&state, "project_id").is_none() {
        if let Some(project) = &config.project_id {
            set_attr(&mut state, "project_id", json!(project));
        }
    }
    Ok(state)
}

fn validate_all(desc: &ResourceDescriptor, value: &Value) -> Result<(), ProviderError> {
    let diagnostics = validate(desc, value);
    if diagnostics.iter().any(Diagnostic::is_error) {
        return Err(ProviderError::from_diagnostics(&diagnostics));
    }
    Ok(())
}

/// The locality of a resource: from its id, then its locality attribute,
/// then the provider defaults.
fn locality_of(
    desc: &ResourceDescriptor,
    config: &ProviderConfig,
    state: &Value,
) -> Result<Locality, ProviderError> {
    let field = desc.locality.field().and_then(|f| field_value(state, f));
    let from_id = state_id(state)
        .and_then(|id| id.split_once('/'))
        .and_then(|(head, _)| Locality::parse(head).ok());
    if let Some(from_id) = from_id {
        if let (Some(from_field), Some(prefix)) = (field, from_id.as_str()) {
            if prefix != from_field {
                return Err(LocalityError::Mismatch {
                    from_id: prefix.to_string(),
                    from_field: from_field.to_string(),
                }
                .into());
            }
        }
        if from_id.kind() == desc.locality {
            return Ok(from_id);
        }
    }
    Ok(extract_locality(desc.locality, field, config)?)
}

fn flatten_state(
    desc: &ResourceDescriptor,
    obj: &Value,
    prior: &Value,
    parsed: &ParsedId,
) -> Value {
    let mut state = mapping::flatten(&desc.schema, obj, prior, &parsed.locality);
    if let Some(map) = state.as_object_mut() {
        map.insert("id".to_string(), json!(compose_id(desc, parsed)));
        if let (Some(field), Some(locality)) = (desc.locality.field(), parsed.locality.as_str()) {
            if desc.schema.attribute(field).is_some() {
                map.insert(field.to_string(), json!(locality));
            }
        }
        if let IdScheme::Name(attr) = desc.id {
            let missing = map.get(attr).map_or(true, is_empty);
            if missing {
                map.insert(attr.to_string(), json!(parsed.id));
            }
        }
        if let (IdScheme::Nested, Some(p), Some(parent)) =
            (desc.id, desc.endpoint.parent, &parsed.parent)
        {
            map.insert(p.attribute.to_string(), json!(parsed.locality.format_id(parent)));
        }
    }
    if let Some(hook) = desc.hooks.flatten {
        hook(obj, &mut state);
    }
    state
}

/// The smallest state a read can start from.
fn identity_state(desc: &ResourceDescriptor, parsed: &ParsedId) -> Value {
    let mut state = Map::new();
    state.insert("id".to_string(), json!(compose_id(desc, parsed)));
    if let (Some(field), Some(locality)) = (desc.locality.field(), parsed.locality.as_str()) {
        state.insert(field.to_string(), json!(locality));
    }
    if let IdScheme::Name(attr) = desc.id {
        state.insert(attr.to_string(), json!(parsed.id));
    }
    if let (Some(p), Some(parent)) = (desc.endpoint.parent, &parsed.parent) {
        state.insert(p.attribute.to_string(), json!(parsed.locality.format_id(parent)));
    }
    Value::Object(state)
}

/// Copy the id and engine-managed attributes from prior state.
fn carry_identity(desc: &ResourceDescriptor, prior: &Value, desired: &mut Value, id: &str) {
    set_attr(desired, "id", json!(id));
    let Some(prior) = prior.as_object() else {
        return;
    };
    for (name, attr) in &desc.schema.block.attributes {
        let engine_managed = attr.api_skip || Some(name.as_str()) == desc.locality.field();
        if engine_managed && field_value(desired, name).is_none() {
            if let Some(value) = prior.get(name) {
                set_attr(desired, name, value.clone());
            }
        }
    }
}

async fn run_step(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    target: &ApiTarget,
    desired: &Value,
    step: &Step,
) -> Result<(), ProviderError> {
    let api = ctx.api();
    let what = step.describe();
    match step {
        Step::Patch { body, .. } => {
            let mut body = body.clone();
            if let Some(hook) = desc.hooks.expand {
                hook(desired, &mut body);
            }
            debug!(body = %redact_body(desc, &body), "patching");
            with_retry(ctx, &what, false, move || api.update(target, body.clone())).await?;
        },
        Step::Action { path, body } => {
            let path: &str = path;
            with_retry(ctx, &what, false, move || api.action(target, path, body.clone())).await?;
        },
    }
    Ok(())
}

/// Wait until the resource is visible and, for asynchronous kinds, in a
/// terminal status.
async fn wait_ready(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    target: &ApiTarget,
    what: &str,
) -> Result<Value, ProviderError> {
    let mut spec = WaitSpec::until_ready(what, ctx.deadline).tolerate_not_found(VISIBILITY_WINDOW);
    if let Some(sm) = desc.states {
        spec = spec
            .transitional(sm.transitional)
            .terminal(sm.terminal)
            .failure(sm.failure);
    }
    let field = desc.states.map(|sm| sm.field);
    let api = ctx.api();
    let outcome = wait_for(
        &spec,
        &ctx.cancel,
        move || api.get(target),
        move |obj: &Value| {
            field
                .and_then(|f| obj.get(f))
                .and_then(Value::as_str)
                .map(str::to_string)
        },
    )
    .await?;
    outcome
        .into_resource()
        .ok_or_else(|| ProviderError::NotFound(format!("{} disappeared", what)))
}

async fn wait_gone(
    desc: &ResourceDescriptor,
    ctx: &OperationContext,
    target: &ApiTarget,
    what: &str,
) -> Result<(), ProviderError> {
    let mut spec = WaitSpec::until_gone(what, ctx.deadline);
    if let Some(sm) = desc.states {
        spec = spec
            .transitional(sm.transitional)
            .failure(sm.failure)
            .deleted(sm.deleted);
    }
    let field = desc.states.map(|sm| sm.field);
    let api = ctx.api();
    wait_for(
        &spec,
        &ctx.cancel,
        move || api.get(target),
        move |obj: &Value| {
            field
                .and_then(|f| obj.get(f))
                .and_then(Value::as_str)
                .map(str::to_string)
        },
    )
    .await?;
    Ok(())
}

/// Ids of the resources to lock while mutating this one.
fn lock_keys(desc: &ResourceDescriptor, state: &Value, own: Option<&str>) -> Vec<String> {
    let mut keys: Vec<String> = own.map(str::to_string).into_iter().collect();
    for attr in desc.lock_on {
        if let Some(id) = field_value(state, attr) {
            keys.push(id.to_string());
        }
    }
    keys
}

/// The id the API returned, as a string.
fn api_id(obj: &Value, field: &str) -> Result<String, ProviderError> {
    match obj.get(field) {
        Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ProviderError::Internal(format!(
            "API response carries no {:?} field",
            field
        ))),
    }
}

fn bare_reference(state: &Value, attr: &str) -> Result<String, ProviderError> {
    let value = field_value(state, attr)
        .ok_or_else(|| ProviderError::Validation(format!("{} is required", attr)))?;
    match value.rsplit_once('/') {
        Some(_) => Ok(expand_id(value)?),
        None => Ok(value.to_string()),
    }
}

fn required_id<'a>(desc: &ResourceDescriptor, state: &'a Value) -> Result<&'a str, ProviderError> {
    state_id(state).ok_or_else(|| {
        ProviderError::Internal(format!("{} state carries no id", desc.name))
    })
}

fn state_id(state: &Value) -> Option<&str> {
    field_value(state, "id")
}

fn field_value<'a>(state: &'a Value, name: &str) -> Option<&'a str> {
    state
        .get(name)
        .and_then(Value::as_str)
        .filter(|v| !v.is_empty())
}

fn set_attr(state: &mut Value, name: &str, value: Value) {
    if let Some(obj) = state.as_object_mut() {
        obj.insert(name.to_string(), value);
    }
}

fn redact_body(desc: &ResourceDescriptor, body: &Value) -> Value {
    // Bodies use API names; redaction by schema name is best effort.
    redact_sensitive(&desc.schema, body)
}
