//! `CapabilityResolver` (§4.2): turns one `WorldInstance`'s `Booklet` into a
//! set of `CapabilityBinding` objects by delegating to
//! `bindery_resolver::DefaultResolver`.
//!
//! Reconcile is a thin I/O shell around the pure resolver crate: fetch the
//! `Booklet` and its `ModuleManifest`s, call `resolve`, diff the resulting
//! plan against the `CapabilityBinding`s already on the cluster, and apply
//! the difference. Every decision about *which* bindings should exist lives
//! in `bindery-resolver`; this module only decides how to make the cluster
//! match that decision.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::{watcher::Config, Config as ControllerConfig, Controller};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn, Span};

use bindery_resolver::{DefaultResolver, Diagnostics, Plan, PlanEntry, Resolve};
use bindery_types::{
    labels, naming, Booklet, CapabilityBinding, CapabilityBindingSpec, ConditionStatus, ConsumerRef, LocalRef,
    ModuleManifest, ProviderRef, Scope, WorldInstance, WorldInstanceStatus, WorldPhase, WorldShard,
};

use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::metrics::ReconcileTimer;
use crate::telemetry;

const CONTROLLER_NAME: &str = "capability-resolver";
const REQUEUE_STEADY: Duration = Duration::from_secs(60);
const REQUEUE_TRANSIENT: Duration = Duration::from_secs(5);

pub async fn run(client: Client, state: &State) {
    let namespace = state.watch_namespace();
    let worlds = match namespace {
        Some(ns) => Api::<WorldInstance>::namespaced(client.clone(), ns),
        None => Api::<WorldInstance>::all(client.clone()),
    };
    if let Err(e) = worlds.list(&ListParams::default().limit(1)).await {
        error!(error = %e, "WorldInstance CRD is not queryable; is it installed?");
        return;
    }
    let owned_bindings = match namespace {
        Some(ns) => Api::<CapabilityBinding>::namespaced(client.clone(), ns),
        None => Api::<CapabilityBinding>::all(client.clone()),
    };
    Controller::new(worlds, Config::default())
        .with_config(ControllerConfig::default().concurrency(state.concurrency()))
        .owns(owned_bindings, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|res| async move { res.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn recorder_for(client: Client) -> Recorder {
    Recorder::new(client, Reporter::from(CONTROLLER_NAME))
}

async fn emit_event(ctx: &Context, world: &WorldInstance, type_: EventType, reason: &str, note: &str) -> Result<()> {
    let recorder = recorder_for(ctx.client.clone());
    recorder
        .publish(
            &Event {
                type_,
                reason: reason.to_string(),
                note: Some(note.to_string()),
                action: "Reconciling".to_string(),
                secondary: None,
            },
            &world.object_ref(&()),
        )
        .await?;
    Ok(())
}

/// "first N, ...and M more" truncation for diagnostic messages (§4.2 step 8).
fn bounded_list_message(items: &[String], limit: usize) -> String {
    if items.len() <= limit {
        items.join(", ")
    } else {
        format!("{}, ...and {} more", items[..limit].join(", "), items.len() - limit)
    }
}

async fn patch_world_status(
    ctx: &Context,
    world: &WorldInstance,
    namespace: &str,
    status: &WorldInstanceStatus,
) -> Result<()> {
    let api: Api<WorldInstance> = Api::namespaced(ctx.client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&world.name_any(), &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch)).await?;
    Ok(())
}

#[instrument(skip(world, ctx), fields(trace_id))]
async fn reconcile(world: Arc<WorldInstance>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", tracing::field::display(&trace_id));
    let timer = ReconcileTimer::start(CONTROLLER_NAME);

    let result = reconcile_inner(&world, &ctx).await;

    timer.finish(&ctx.metrics, result.is_ok());
    result
}

async fn reconcile_inner(world: &WorldInstance, ctx: &Context) -> Result<Action> {
    let namespace = world.namespace().ok_or_else(|| Error::MissingNamespace(world.name_any()))?;
    let world_name = world.name_any();
    info!(world = %world_name, namespace = %namespace, "reconciling capability bindings");

    let booklets: Api<Booklet> = Api::namespaced(ctx.client.clone(), &namespace);
    let booklet = match booklets.get_opt(&world.spec.booklet_ref.name).await? {
        Some(b) => b,
        None => {
            warn!(booklet = %world.spec.booklet_ref.name, "referenced Booklet not found yet");
            report_missing_booklet(ctx, world, &namespace, &world.spec.booklet_ref.name).await?;
            return Ok(Action::await_change());
        }
    };

    let manifests_api: Api<ModuleManifest> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut modules = Vec::with_capacity(booklet.spec.modules.len());
    let mut missing_required = Vec::new();
    for module_ref in &booklet.spec.modules {
        match manifests_api.get_opt(&module_ref.name).await? {
            Some(m) => modules.push(m),
            None => missing_required.push(module_ref.name.clone()),
        }
    }
    if !missing_required.is_empty() {
        warn!(missing = ?missing_required, "referenced ModuleManifest(s) not found yet");
        report_missing_modules(ctx, world, &namespace, &missing_required).await?;
        return Ok(Action::await_change());
    }

    let resolution = DefaultResolver.resolve(&world_name, &modules);

    let shards = list_world_shards(ctx, &namespace, &world_name).await?;
    if shards.is_empty() && resolution.plan.entries.iter().any(|e| e.scope.normalize() == Scope::WorldShard) {
        report_waiting_for_shards(ctx, world, &namespace).await?;
        return Ok(Action::requeue(REQUEUE_TRANSIENT));
    }

    let existing = list_existing_bindings(ctx, &namespace, &world_name).await?;
    let game = booklet.name_any();
    let desired = desired_bindings(&world_name, &shards, &resolution.plan);
    apply_diff(ctx, &namespace, &game, world, &shards, &existing, &desired).await?;

    report_status(ctx, world, &namespace, &resolution.diagnostics).await?;

    if resolution.diagnostics.has_required_gap() {
        Ok(Action::requeue(REQUEUE_TRANSIENT))
    } else {
        Ok(Action::requeue(REQUEUE_STEADY))
    }
}

async fn report_missing_booklet(
    ctx: &Context,
    world: &WorldInstance,
    namespace: &str,
    booklet_name: &str,
) -> Result<()> {
    let now = Utc::now();
    let mut status = world.status.clone().unwrap_or_default();
    status.phase = WorldPhase::Error;
    let message = format!("Booklet {booklet_name} not found");
    status.message = Some(message.clone());
    status.conditions.set(
        bindery_types::world::condition_types::MODULES_RESOLVED,
        ConditionStatus::False,
        "GameDefinitionNotFound",
        &message,
        now,
    );
    status.conditions.set(
        bindery_types::world::condition_types::BINDINGS_RESOLVED,
        ConditionStatus::False,
        "ModulesNotReady",
        "waiting for the referenced Booklet to exist",
        now,
    );
    patch_world_status(ctx, world, namespace, &status).await?;
    emit_event(ctx, world, EventType::Warning, "GameDefinitionNotFound", &message).await
}

async fn report_missing_modules(
    ctx: &Context,
    world: &WorldInstance,
    namespace: &str,
    missing: &[String],
) -> Result<()> {
    let now = Utc::now();
    let mut status = world.status.clone().unwrap_or_default();
    status.phase = WorldPhase::Error;
    let message = bounded_list_message(missing, 4);
    status.message = Some(message.clone());
    status.conditions.set(
        bindery_types::world::condition_types::MODULES_RESOLVED,
        ConditionStatus::False,
        "ModuleManifestNotFound",
        &message,
        now,
    );
    patch_world_status(ctx, world, namespace, &status).await?;
    emit_event(ctx, world, EventType::Warning, "ModuleManifestNotFound", &message).await
}

async fn report_waiting_for_shards(ctx: &Context, world: &WorldInstance, namespace: &str) -> Result<()> {
    let now = Utc::now();
    let mut status = world.status.clone().unwrap_or_default();
    status.phase = WorldPhase::Provisioning;
    let message = "world-shard scoped capabilities are waiting for WorldShard children".to_string();
    status.message = Some(message.clone());
    status.conditions.set(
        bindery_types::world::condition_types::BINDINGS_RESOLVED,
        ConditionStatus::False,
        "WaitingForShards",
        &message,
        now,
    );
    patch_world_status(ctx, world, namespace, &status).await
}

async fn list_world_shards(ctx: &Context, namespace: &str, world_name: &str) -> Result<Vec<WorldShard>> {
    let api: Api<WorldShard> = Api::namespaced(ctx.client.clone(), namespace);
    let selector = labels::selector(&[(labels::world(), world_name.to_string())]);
    Ok(api.list(&ListParams::default().labels(&selector)).await?.items)
}

async fn list_existing_bindings(
    ctx: &Context,
    namespace: &str,
    world_name: &str,
) -> Result<Vec<CapabilityBinding>> {
    let api: Api<CapabilityBinding> = Api::namespaced(ctx.client.clone(), namespace);
    let selector = labels::selector(&[(labels::world(), world_name.to_string())]);
    let list = api.list(&ListParams::default().labels(&selector)).await?;
    Ok(list.items)
}

/// Builds the desired `(name, spec)` pairs for every plan entry (§4.2, §3
/// naming rule). World-shard-scoped entries expand to one binding per live
/// shard; every other scope produces exactly one. Pure and independently
/// testable.
fn desired_bindings(world_name: &str, shards: &[WorldShard], plan: &Plan) -> BTreeMap<String, CapabilityBindingSpec> {
    let mut out = BTreeMap::new();
    for entry in &plan.entries {
        if entry.scope.normalize() == Scope::WorldShard {
            for shard in shards {
                let shard_id = shard.spec.shard_id;
                let name = naming::stable_binding_name(
                    world_name,
                    &entry.consumer,
                    &entry.capability_id,
                    entry.scope.as_str(),
                    entry.multiplicity.as_str(),
                    Some(shard_id),
                );
                out.insert(name, spec_for_entry(world_name, entry, Some(shard_id)));
            }
        } else {
            let name = naming::stable_binding_name(
                world_name,
                &entry.consumer,
                &entry.capability_id,
                entry.scope.as_str(),
                entry.multiplicity.as_str(),
                None,
            );
            out.insert(name, spec_for_entry(world_name, entry, None));
        }
    }
    out
}

fn spec_for_entry(world_name: &str, entry: &PlanEntry, shard_id: Option<u32>) -> CapabilityBindingSpec {
    let world_ref = if entry.scope.is_global() {
        None
    } else {
        Some(LocalRef::new(world_name))
    };
    CapabilityBindingSpec {
        capability_id: entry.capability_id.clone(),
        scope: entry.scope,
        multiplicity: entry.multiplicity,
        world_ref,
        consumer: ConsumerRef {
            module_manifest_name: entry.consumer.clone(),
            requirement_hint: if entry.is_root { None } else { Some(entry.capability_id.clone()) },
        },
        provider: ProviderRef {
            module_manifest_name: entry.provider.clone(),
            capability_version: entry.provider_version.clone(),
        },
        shard_id,
    }
}

async fn apply_diff(
    ctx: &Context,
    namespace: &str,
    game: &str,
    world: &WorldInstance,
    shards: &[WorldShard],
    existing: &[CapabilityBinding],
    desired: &BTreeMap<String, CapabilityBindingSpec>,
) -> Result<()> {
    let api: Api<CapabilityBinding> = Api::namespaced(ctx.client.clone(), namespace);
    let existing_by_name: HashMap<String, &CapabilityBinding> =
        existing.iter().map(|b| (b.name_any(), b)).collect();

    let world_name = world.name_any();
    let world_owner_ref = world.controller_owner_ref(&()).ok_or_else(|| {
        Error::Store(format!("WorldInstance {world_name} has no uid yet to own children with"))
    })?;
    let shard_owner_ref_by_id: HashMap<u32, OwnerReference> =
        shards.iter().filter_map(|s| s.controller_owner_ref(&()).map(|o| (s.spec.shard_id, o))).collect();

    for (name, spec) in desired {
        match existing_by_name.get(name) {
            Some(current) if &current.spec == spec => continue,
            Some(_) => {
                let patch = serde_json::json!({ "spec": spec });
                api.patch(name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch)).await?;
            }
            None => {
                let owner_ref = match spec.shard_id {
                    Some(id) => shard_owner_ref_by_id.get(&id).cloned().unwrap_or_else(|| world_owner_ref.clone()),
                    None => world_owner_ref.clone(),
                };
                let object = CapabilityBinding {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        namespace: Some(namespace.to_string()),
                        labels: Some(labels::binding_labels(&world_name, game, spec.shard_id)),
                        owner_references: Some(vec![owner_ref]),
                        ..Default::default()
                    },
                    spec: spec.clone(),
                    status: None,
                };
                api.create(&Default::default(), &object).await.map(|_| ()).or_else(|e| match e {
                    kube::Error::Api(ref ae) if ae.code == 409 => Ok(()),
                    other => Err(other),
                })?;
            }
        }
    }

    for name in existing_by_name.keys() {
        if !desired.contains_key(name) {
            api.delete(name, &Default::default()).await.map(|_| ()).or_else(|e| match e {
                kube::Error::Api(ref ae) if ae.code == 404 => Ok(()),
                other => Err(other),
            })?;
        }
    }

    Ok(())
}

/// §4.2 step 8: surfaces resolver diagnostics onto `BindingsResolved`, and
/// step 9 emits a `BindingsResolved` event only on the transition into
/// `Running`, so steady-state reconciles stay quiet.
async fn report_status(
    ctx: &Context,
    world: &WorldInstance,
    namespace: &str,
    diagnostics: &Diagnostics,
) -> Result<()> {
    let now = Utc::now();
    let mut status = world.status.clone().unwrap_or_default();
    let was_running = status.phase == WorldPhase::Running;

    status.conditions.set(
        bindery_types::world::condition_types::MODULES_RESOLVED,
        ConditionStatus::True,
        "AllRequiredCapabilitiesResolved",
        "every required capability has a compatible provider",
        now,
    );

    if diagnostics.has_required_gap() {
        status.phase = WorldPhase::Error;
        let entries: Vec<String> = diagnostics
            .required()
            .map(|d| format!("{}@{:?}: {}", d.capability_id, d.scope, d.reason.as_str()))
            .collect();
        let message = bounded_list_message(&entries, 4);
        status.message = Some(message.clone());
        status.conditions.set(
            bindery_types::world::condition_types::BINDINGS_RESOLVED,
            ConditionStatus::False,
            "UnresolvedRequired",
            &message,
            now,
        );
    } else {
        status.phase = WorldPhase::Running;
        let optional_count = diagnostics.optional().count();
        let message = if optional_count > 0 {
            format!("capability bindings match the resolved plan; {optional_count} optional requirement(s) unresolved")
        } else {
            "capability bindings match the resolved plan".to_string()
        };
        status.message = Some(message.clone());
        status.conditions.set(
            bindery_types::world::condition_types::BINDINGS_RESOLVED,
            ConditionStatus::True,
            "BindingsApplied",
            &message,
            now,
        );
    }

    let became_running = !was_running && status.phase == WorldPhase::Running;
    patch_world_status(ctx, world, namespace, &status).await?;
    if became_running {
        emit_event(ctx, world, EventType::Normal, "BindingsResolved", "all required capabilities resolved").await?;
    }
    Ok(())
}

fn error_policy(world: Arc<WorldInstance>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(world = %world.name_any(), error = %error, "capability resolver reconcile failed");
    ctx.metrics.record_failure(CONTROLLER_NAME, 0.0);
    Action::requeue(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_types::{Multiplicity, Scope, WorldShardSpec};

    fn entry(consumer: &str, capability_id: &str, scope: Scope, provider: &str, is_root: bool) -> PlanEntry {
        PlanEntry {
            consumer: consumer.to_string(),
            capability_id: capability_id.to_string(),
            scope,
            multiplicity: Multiplicity::One,
            provider: provider.to_string(),
            provider_version: "1.0.0".to_string(),
            is_root,
        }
    }

    fn shard(world_name: &str, id: u32) -> WorldShard {
        WorldShard::new(
            &naming::stable_shard_name(world_name, id),
            WorldShardSpec { world_ref: LocalRef::new(world_name), shard_id: id },
        )
    }

    #[test]
    fn world_scoped_binding_references_the_world() {
        let e = entry("game-logic", "physics.engine", Scope::World, "physics-engine", false);
        let spec = spec_for_entry("w1", &e, None);
        assert_eq!(spec.world_ref.as_ref().map(|r| r.name.as_str()), Some("w1"));
    }

    #[test]
    fn cluster_scoped_root_binding_has_no_world_ref() {
        let e = entry("w1", bindery_types::ROOT_CAPABILITY_ID, Scope::Cluster, "telemetry-hub", true);
        let spec = spec_for_entry("w1", &e, None);
        assert_eq!(spec.world_ref, None);
    }

    #[test]
    fn desired_bindings_names_are_stable_across_calls() {
        let mut plan = Plan::default();
        plan.entries.push(entry("game-logic", "physics.engine", Scope::World, "physics-engine", false));
        let first = desired_bindings("w1", &[], &plan);
        let second = desired_bindings("w1", &[], &plan);
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn world_shard_scope_expands_one_binding_per_shard() {
        let mut plan = Plan::default();
        plan.entries.push(entry("game-logic", "physics.engine", Scope::WorldShard, "physics-engine", false));
        let shards = vec![shard("w1", 0), shard("w1", 1), shard("w1", 2)];
        let desired = desired_bindings("w1", &shards, &plan);
        assert_eq!(desired.len(), 3);
        let shard_ids: std::collections::BTreeSet<Option<u32>> = desired.values().map(|s| s.shard_id).collect();
        assert_eq!(shard_ids, [Some(0), Some(1), Some(2)].into_iter().collect());
    }

    #[test]
    fn world_shard_scope_with_no_shards_yields_no_bindings() {
        let mut plan = Plan::default();
        plan.entries.push(entry("game-logic", "physics.engine", Scope::WorldShard, "physics-engine", false));
        let desired = desired_bindings("w1", &[], &plan);
        assert!(desired.is_empty());
    }

    #[test]
    fn bounded_list_message_truncates_past_the_limit() {
        let items: Vec<String> = (0..6).map(|i| format!("m{i}")).collect();
        let message = bounded_list_message(&items, 4);
        assert_eq!(message, "m0, m1, m2, m3, ...and 2 more");
    }

    #[test]
    fn bounded_list_message_is_plain_join_under_the_limit() {
        let items = vec!["a".to_string(), "b".to_string()];
        assert_eq!(bounded_list_message(&items, 4), "a, b");
    }
}
