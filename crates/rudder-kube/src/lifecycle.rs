//! CRUD orchestration for one managed object.
//!
//! Each operation is a fresh invocation: parse the configuration, connect,
//! act, persist. The one ordering rule that runs through everything is that
//! a successful mutation is committed to the store before any step that can
//! still fail (the projection re-read, waiting). See [`crate::state`] for
//! the recovery flags that carry the rest of the protocol.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ManagedFieldsEntry;
use kube::api::DynamicObject;
use rand::Rng;
use rudder_core::{FieldPath, GvkRef, Manifest, PathSegment, ResourceConfig, annotations, quantity};
use serde_json::Value;

use crate::apply;
use crate::client::{DynamicClient, FIELD_MANAGER};
use crate::error::{KubeError, Result};
use crate::ownership;
use crate::projection;
use crate::state::{
    IMPORTED_WITHOUT_ANNOTATIONS, PENDING_PROJECTION, ResourceState, StateStore, flag, set_flag,
};
use crate::wait::{self, WaitSpec};

/// Everything one invocation needs, prepared up front so user-configuration
/// errors fail before any mutation.
pub struct ResourceContext {
    pub config: ResourceConfig,
    pub manifest: Manifest,
    pub gvk: GvkRef,
    pub ignore: Vec<FieldPath>,
    pub wait_spec: Option<WaitSpec>,
    pub fingerprint: String,
    pub client: DynamicClient,
}

impl ResourceContext {
    pub async fn prepare(config: ResourceConfig) -> Result<Self> {
        let manifest = Manifest::parse(&config.yaml_body)?;
        manifest.validate()?;
        let ignore = parse_ignore_fields(&config.ignore_fields)?;
        let gvk = manifest.gvk();
        let wait_spec = WaitSpec::resolve(config.wait_for.as_ref(), manifest.kind())?;
        config.cluster_connection.validate()?;
        let fingerprint = config.cluster_connection.fingerprint();
        let client = DynamicClient::connect(&config.cluster_connection).await?;
        Ok(Self {
            config,
            manifest,
            gvk,
            ignore,
            wait_spec,
            fingerprint,
            client,
        })
    }

    fn namespace(&self) -> Option<&str> {
        self.manifest.namespace()
    }

    fn name(&self) -> &str {
        self.manifest.name().unwrap_or_default()
    }
}

/// Random 128-bit instance id, hex-encoded. Stamped into the object's
/// annotations and immutable for the life of the resource.
pub fn generate_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

fn parse_ignore_fields(ignore_fields: &[String]) -> Result<Vec<FieldPath>> {
    let mut parsed = Vec::with_capacity(ignore_fields.len());
    for raw in ignore_fields {
        let path = FieldPath::parse(raw)?;
        if targets_internal_annotation(&path) {
            return Err(KubeError::IgnoreInternalAnnotation { path: raw.clone() });
        }
        parsed.push(path);
    }
    Ok(parsed)
}

fn targets_internal_annotation(path: &FieldPath) -> bool {
    match path.0.as_slice() {
        [
            PathSegment::Field(metadata),
            PathSegment::Field(annotations_member),
            PathSegment::Field(key),
            ..,
        ] => metadata == "metadata" && annotations_member == "annotations" && annotations::is_internal(key),
        _ => false,
    }
}

fn managed_fields(obj: &DynamicObject) -> &[ManagedFieldsEntry] {
    obj.metadata
        .managed_fields
        .as_deref()
        .unwrap_or_default()
}

/// Projection and ownership attributes from a live object.
fn compute_projection(ctx: &ResourceContext, obj: &DynamicObject) -> Result<(String, String)> {
    let body = serde_json::to_value(obj)?;
    let entries = managed_fields(obj);
    let owned = ownership::owned_paths(entries, FIELD_MANAGER);
    let projected = projection::project(&body, &owned, &ctx.ignore);
    Ok((
        projection::serialize_projection(&projected),
        ownership::field_ownership_json(entries),
    ))
}

fn extract_status(ctx: &ResourceContext, obj: &DynamicObject) -> Result<Option<Value>> {
    if let Some(spec) = &ctx.wait_spec
        && spec.populates_status()
    {
        let body = serde_json::to_value(obj)?;
        return Ok(spec.status_subtree(&body));
    }
    if ctx.config.track_status {
        let body = serde_json::to_value(obj)?;
        return Ok(body.get("status").cloned().filter(|s| !s.is_null()));
    }
    Ok(None)
}

fn is_quantity_leaf(path: &FieldPath) -> bool {
    let mut segments = path.0.iter().rev();
    let Some(PathSegment::Field(field)) = segments.next() else {
        return false;
    };
    let parent = match segments.next() {
        Some(PathSegment::Field(p)) => Some(p.as_str()),
        _ => None,
    };
    quantity::is_quantity_position(parent, field)
}

/// Whether the manifest would change the live value at `path`. Quantity
/// leaves compare canonically, the way the server stores them, so "1000m"
/// against a live "1" is not a change.
fn leaf_value_changed(path: &FieldPath, desired: &Value, live: &Value) -> bool {
    let want = path.lookup(desired);
    let have = path.lookup(live);
    if want == have {
        return false;
    }
    if let (Some(Value::String(want)), Some(Value::String(have))) = (want, have)
        && is_quantity_leaf(path)
        && let (Some(want), Some(have)) = (quantity::normalize(want), quantity::normalize(have))
    {
        return want != have;
    }
    true
}

fn base_state(ctx: &ResourceContext, id: String) -> ResourceState {
    ResourceState {
        id,
        connection_fingerprint: ctx.fingerprint.clone(),
        api_version: ctx.manifest.api_version().to_string(),
        kind: ctx.manifest.kind().to_string(),
        namespace: ctx.namespace().map(str::to_string),
        name: ctx.name().to_string(),
        yaml_body: ctx.config.yaml_body.clone(),
        ..ResourceState::default()
    }
}

fn ensure_same_cluster(ctx: &ResourceContext, prior: &ResourceState) -> Result<()> {
    if ctx.fingerprint != prior.connection_fingerprint {
        return Err(KubeError::ConnectionChanged);
    }
    Ok(())
}

/// Commit the mutation with an empty projection and arm the pending flag,
/// then surface the follow-up failure. The mutation itself is never lost.
fn commit_pending(store: &mut dyn StateStore, state: ResourceState, cause: KubeError) -> KubeError {
    if let Err(e) = store.persist(&state) {
        return e;
    }
    if let Err(e) = set_flag(store, PENDING_PROJECTION, true) {
        return e;
    }
    KubeError::PendingProjection {
        message: cause.to_string(),
    }
}

async fn apply_and_commit(
    ctx: &ResourceContext,
    store: &mut dyn StateStore,
    id: String,
) -> Result<(ResourceState, DynamicObject)> {
    let mut body = ctx.manifest.body().clone();
    apply::stamp_identity(&mut body, &id);

    apply::ssa_apply(
        &ctx.client,
        &ctx.gvk,
        ctx.namespace(),
        ctx.name(),
        &body,
        FIELD_MANAGER,
        ctx.config.force_conflicts,
    )
    .await?;

    // The mutation is live from here on. Any failure below commits first.
    let placeholder = base_state(ctx, id);

    let refreshed =
        match apply::refresh(&ctx.client, &ctx.gvk, ctx.namespace(), ctx.name()).await {
            Ok(obj) => obj,
            Err(e) => return Err(commit_pending(store, placeholder, e)),
        };

    let (projection, field_ownership) = match compute_projection(ctx, &refreshed) {
        Ok(attrs) => attrs,
        Err(e) => return Err(commit_pending(store, placeholder, e)),
    };

    let state = ResourceState {
        managed_state_projection: projection,
        field_ownership,
        ..placeholder
    };
    store.persist(&state)?;
    set_flag(store, PENDING_PROJECTION, false)?;
    Ok((state, refreshed))
}

async fn wait_and_finalize(
    ctx: &ResourceContext,
    store: &mut dyn StateStore,
    mut state: ResourceState,
    refreshed: DynamicObject,
) -> Result<ResourceState> {
    let observed = match &ctx.wait_spec {
        Some(spec) => {
            wait::wait_until(
                &ctx.client,
                &ctx.gvk,
                ctx.namespace(),
                ctx.name(),
                spec,
                ctx.manifest.kind(),
                ctx.config.apply_timeout,
            )
            .await?
        }
        None => refreshed,
    };

    let status = extract_status(ctx, &observed)?;
    if status != state.status {
        state.status = status;
        store.persist(&state)?;
    }
    Ok(state)
}

/// Create the object and persist its first state.
///
/// An existing object already claimed by another instance id is refused; an
/// existing unmanaged object falls through to apply, where SSA's own
/// conflict handling decides.
pub async fn create(ctx: &ResourceContext, store: &mut dyn StateStore) -> Result<ResourceState> {
    let id = generate_id();

    if let Some(existing) = ctx
        .client
        .get(&ctx.gvk, ctx.namespace(), ctx.name())
        .await?
    {
        let body = serde_json::to_value(&existing)?;
        if let Some(owner_id) = annotations::get(&body, annotations::RESOURCE_ID) {
            return Err(KubeError::AlreadyManaged {
                name: ctx.name().to_string(),
                owner_id,
            });
        }
    }

    let (state, refreshed) = apply_and_commit(ctx, store, id).await?;
    wait_and_finalize(ctx, store, state, refreshed).await
}

/// Refresh state from the cluster. `Ok(None)` means the object is gone and
/// the resource should drop out of state.
pub async fn read(
    ctx: &ResourceContext,
    prior: &ResourceState,
    store: &mut dyn StateStore,
) -> Result<Option<ResourceState>> {
    ensure_same_cluster(ctx, prior)?;

    let Some(live) = ctx
        .client
        .get(&ctx.gvk, ctx.namespace(), ctx.name())
        .await?
    else {
        return Ok(None);
    };

    let body = serde_json::to_value(&live)?;
    match annotations::get(&body, annotations::RESOURCE_ID) {
        Some(found) if found == prior.id => {}
        None if flag(store, IMPORTED_WITHOUT_ANNOTATIONS) => {}
        other => {
            return Err(KubeError::OwnershipMismatch {
                name: ctx.name().to_string(),
                expected: prior.id.clone(),
                found: other.map_or_else(|| "no annotation".to_string(), |id| format!("'{}'", id)),
            });
        }
    }

    let mut state = prior.clone();
    state.yaml_body = ctx.config.yaml_body.clone();
    match compute_projection(ctx, &live) {
        Ok((projection, field_ownership)) => {
            state.managed_state_projection = projection;
            state.field_ownership = field_ownership;
            set_flag(store, PENDING_PROJECTION, false)?;
        }
        Err(e) => {
            // A refresh never fails on projection alone; keep the prior
            // attributes and leave the flag armed for the next attempt.
            tracing::warn!(name = ctx.name(), error = %e, "projection refresh failed");
            set_flag(store, PENDING_PROJECTION, true)?;
        }
    }

    state.status = extract_status(ctx, &live)?.or(state.status.take());
    store.persist(&state)?;
    Ok(Some(state))
}

/// Re-apply the manifest, preserving the instance id from prior state.
pub async fn update(
    ctx: &ResourceContext,
    prior: &ResourceState,
    store: &mut dyn StateStore,
) -> Result<ResourceState> {
    ensure_same_cluster(ctx, prior)?;

    // Pre-check against live ownership so removing an ignore_fields entry
    // that another manager still owns fails before touching the cluster.
    if !ctx.config.force_conflicts
        && let Some(live) = ctx
            .client
            .get(&ctx.gvk, ctx.namespace(), ctx.name())
            .await?
    {
        let entries: Vec<ManagedFieldsEntry> = managed_fields(&live)
            .iter()
            .filter(|e| e.manager.as_deref() != Some(FIELD_MANAGER))
            .cloned()
            .collect();
        let others = ownership::ownership_map(&entries);
        let live_body = serde_json::to_value(&live)?;
        // Equal values share ownership without conflict under SSA, so only
        // paths the manifest would actually change can collide.
        let requested: Vec<FieldPath> = ownership::leaf_paths(ctx.manifest.body())
            .into_iter()
            .filter(|p| !ctx.ignore.iter().any(|ig| p.starts_with(ig)))
            .filter(|p| leaf_value_changed(p, ctx.manifest.body(), &live_body))
            .collect();
        let conflicts = ownership::detect_conflicts(&requested, &others);
        if !conflicts.is_empty() {
            let manager = conflicts[0].1.clone();
            let paths = conflicts.into_iter().map(|(path, _)| path).collect();
            return Err(KubeError::FieldConflict { paths, manager });
        }
    }

    let (state, refreshed) = apply_and_commit(ctx, store, prior.id.clone()).await?;
    let state = wait_and_finalize(ctx, store, state, refreshed).await?;

    // First successful update after an import finishes the adoption.
    set_flag(store, IMPORTED_WITHOUT_ANNOTATIONS, false)?;
    Ok(state)
}

/// Delete the object and wait for it to disappear.
pub async fn delete(ctx: &ResourceContext, prior: &ResourceState) -> Result<()> {
    if ctx.config.delete_protection {
        return Err(KubeError::DeleteProtection {
            name: ctx.name().to_string(),
        });
    }
    ensure_same_cluster(ctx, prior)?;

    if ctx
        .client
        .get(&ctx.gvk, ctx.namespace(), ctx.name())
        .await?
        .is_none()
    {
        return Ok(());
    }

    ctx.client
        .delete(&ctx.gvk, ctx.namespace(), ctx.name())
        .await?;

    match wait::wait_for_removal(
        &ctx.client,
        &ctx.gvk,
        ctx.namespace(),
        ctx.name(),
        ctx.config.delete_timeout,
    )
    .await
    {
        Ok(()) => Ok(()),
        Err(e @ KubeError::DeleteTimeout { .. }) if ctx.config.force_destroy => {
            tracing::warn!(name = ctx.name(), error = %e, "stripping finalizers per force_destroy");
            ctx.client
                .strip_finalizers(&ctx.gvk, ctx.namespace(), ctx.name())
                .await?;
            ctx.client
                .delete(&ctx.gvk, ctx.namespace(), ctx.name())
                .await?;
            wait::wait_for_removal(
                &ctx.client,
                &ctx.gvk,
                ctx.namespace(),
                ctx.name(),
                ctx.config.delete_timeout,
            )
            .await
        }
        Err(e) => Err(e),
    }
}

/// Adopt an existing object into state without mutating it.
///
/// An already-annotated object keeps its id. An unannotated one gets a fresh
/// id recorded in state only; the first update stamps it onto the object and
/// clears the import flag.
pub async fn import_existing(
    ctx: &ResourceContext,
    store: &mut dyn StateStore,
) -> Result<ResourceState> {
    let live = ctx
        .client
        .get(&ctx.gvk, ctx.namespace(), ctx.name())
        .await?
        .ok_or_else(|| KubeError::ImportNotFound {
            name: ctx.name().to_string(),
        })?;

    let body = serde_json::to_value(&live)?;
    let id = match annotations::get(&body, annotations::RESOURCE_ID) {
        Some(id) => id,
        None => {
            set_flag(store, IMPORTED_WITHOUT_ANNOTATIONS, true)?;
            generate_id()
        }
    };

    let (projection, field_ownership) = compute_projection(ctx, &live)?;
    let state = ResourceState {
        managed_state_projection: projection,
        field_ownership,
        status: extract_status(ctx, &live)?,
        ..base_state(ctx, id)
    };
    store.persist(&state)?;
    Ok(state)
}
