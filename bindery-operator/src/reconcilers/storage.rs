//! `StorageOrchestrator` collaborator (§4.6): maps a `WorldStorageClaim` to
//! either a `PersistentVolumeClaim` (server tiers) or an external URI
//! (client tier, e.g. player-local save data that never touches a pod
//! volume).

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::{watcher::Config, Config as ControllerConfig, Controller};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, instrument, warn, Span};

use bindery_types::{
    naming, StorageClaimPhase, StorageTier, WorldStorageClaim, WorldStorageClaimStatus,
};

use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::metrics::ReconcileTimer;
use crate::telemetry;

const CONTROLLER_NAME: &str = "storage-orchestrator";
const REQUEUE_STEADY: Duration = Duration::from_secs(120);

pub async fn run(client: Client, state: &State) {
    let namespace = state.watch_namespace();
    let claims = match namespace {
        Some(ns) => Api::<WorldStorageClaim>::namespaced(client.clone(), ns),
        None => Api::<WorldStorageClaim>::all(client.clone()),
    };
    if let Err(e) = claims.list(&ListParams::default().limit(1)).await {
        error!(error = %e, "WorldStorageClaim CRD is not queryable; is it installed?");
        return;
    }
    let pvcs = match namespace {
        Some(ns) => Api::<PersistentVolumeClaim>::namespaced(client.clone(), ns),
        None => Api::<PersistentVolumeClaim>::all(client.clone()),
    };
    Controller::new(claims, Config::default())
        .with_config(ControllerConfig::default().concurrency(state.concurrency()))
        .owns(pvcs, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|res| async move { res.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[instrument(skip(claim, ctx), fields(trace_id))]
async fn reconcile(claim: Arc<WorldStorageClaim>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", tracing::field::display(&trace_id));
    let timer = ReconcileTimer::start(CONTROLLER_NAME);
    let result = reconcile_inner(&claim, &ctx).await;
    timer.finish(&ctx.metrics, result.is_ok());
    result
}

async fn reconcile_inner(claim: &WorldStorageClaim, ctx: &Context) -> Result<Action> {
    let namespace = claim.namespace().ok_or_else(|| Error::MissingNamespace(claim.name_any()))?;
    let name = claim.name_any();

    let status = match decide(claim, &ctx.config) {
        Decision::External(uri) => {
            WorldStorageClaimStatus { phase: StorageClaimPhase::External, claim_name: None, external_uri: Some(uri) }
        }
        Decision::Pvc(pvc_name) => {
            let owner_ref = claim.controller_owner_ref(&()).ok_or_else(|| {
                Error::Store(format!("WorldStorageClaim {name} has no uid yet to own a PVC with"))
            })?;
            apply_pvc(ctx, &namespace, &pvc_name, claim, owner_ref).await?;
            let phase = observed_pvc_phase(ctx, &namespace, &pvc_name).await?;
            WorldStorageClaimStatus { phase, claim_name: Some(pvc_name), external_uri: None }
        }
        Decision::ConfigError(reason) => {
            warn!(claim = %name, reason, "storage claim has no resolvable storage class");
            WorldStorageClaimStatus { phase: StorageClaimPhase::Error, claim_name: None, external_uri: None }
        }
    };

    let api: Api<WorldStorageClaim> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch)).await?;

    let requeue = if status.phase == StorageClaimPhase::Error { Duration::from_secs(30) } else { REQUEUE_STEADY };
    Ok(Action::requeue(requeue))
}

enum Decision {
    External(String),
    Pvc(String),
    ConfigError(&'static str),
}

/// Pure §4.6 routing: client tier never gets a `PersistentVolumeClaim`;
/// server tiers get one named via [`naming::stable_pvc_name`], using the
/// claim's own `storageClassName` if set, else the operator's configured
/// default for that tier. A server-tier claim with neither is a
/// configuration error (§7).
fn decide(claim: &WorldStorageClaim, config: &crate::config::OperatorConfig) -> Decision {
    if claim.spec.tier.is_client() {
        return Decision::External(external_uri(claim));
    }
    let has_storage_class =
        claim.spec.storage_class_name.is_some() || config.default_storage_class_for(claim.spec.tier).is_some();
    if !has_storage_class {
        return Decision::ConfigError("no storageClassName on the claim and no operator default configured");
    }
    let shard_name = claim.spec.shard_ref.as_ref().map(|r| r.name.as_str()).unwrap_or("world");
    Decision::Pvc(naming::stable_pvc_name(&claim.spec.world_ref.name, shard_name, claim.spec.tier.as_str()))
}

/// Client-tier claims never materialize a pod volume (§4.6): the URI points
/// at wherever the client's own process keeps its local save/profile data,
/// mirroring the per-world/per-shard directory layout a client build reads
/// on disk.
fn external_uri(claim: &WorldStorageClaim) -> String {
    let world = &claim.spec.world_ref.name;
    match &claim.spec.shard_ref {
        Some(shard) => format!("file://$HOME/.platform/worlds/{world}/shards/{}", shard.name),
        None => format!("file://$HOME/.platform/worlds/{world}"),
    }
}

/// Mirrors the underlying `PersistentVolumeClaim`'s own observed phase
/// (§4.6: "Mirror the PVC phase into the claim's `status.phase`"). A PVC
/// that exists but hasn't reported a phase yet, or doesn't exist yet under
/// eventual consistency, reads as `Pending`.
async fn observed_pvc_phase(ctx: &Context, namespace: &str, pvc_name: &str) -> Result<StorageClaimPhase> {
    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let phase = api
        .get_opt(pvc_name)
        .await?
        .and_then(|pvc| pvc.status.and_then(|s| s.phase))
        .unwrap_or_else(|| "Pending".to_string());
    Ok(match phase.as_str() {
        "Bound" => StorageClaimPhase::Bound,
        _ => StorageClaimPhase::Pending,
    })
}

async fn apply_pvc(
    ctx: &Context,
    namespace: &str,
    pvc_name: &str,
    claim: &WorldStorageClaim,
    owner_ref: OwnerReference,
) -> Result<()> {
    let storage_class = claim
        .spec
        .storage_class_name
        .clone()
        .or_else(|| ctx.config.default_storage_class_for(claim.spec.tier).map(str::to_string));

    let api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), namespace);
    let pvc = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(pvc_name.to_string()),
            namespace: Some(namespace.to_string()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(claim.spec.access_modes.clone()),
            storage_class_name: storage_class,
            resources: Some(VolumeResourceRequirements {
                requests: Some(
                    [("storage".to_string(), Quantity(claim.spec.size.clone()))].into_iter().collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: None,
    };
    let patch = serde_json::to_value(&pvc).map_err(|e| Error::Store(e.to_string()))?;
    api.patch(pvc_name, &PatchParams::apply(CONTROLLER_NAME).force(), &Patch::Apply(patch)).await?;
    Ok(())
}

fn error_policy(claim: Arc<WorldStorageClaim>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(claim = %claim.name_any(), error = %error, "storage orchestrator reconcile failed");
    ctx.metrics.record_failure(CONTROLLER_NAME, 0.0);
    Action::requeue(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_types::{LocalRef, WorldStorageClaimSpec};
    use std::time::Duration as StdDuration;

    fn cfg(low: Option<&str>, high: Option<&str>) -> crate::config::OperatorConfig {
        crate::config::OperatorConfig {
            storageclass_server_low_latency: low.map(str::to_string),
            storageclass_server_high_latency: high.map(str::to_string),
            label_prefix: "platform".into(),
            autoscaler_poll_interval: StdDuration::from_secs(30),
            admin_port: 8080,
            watch_namespace: None,
            concurrency: 1,
        }
    }

    fn claim(tier: StorageTier, storage_class_name: Option<&str>) -> WorldStorageClaim {
        WorldStorageClaim::new(
            "save-data",
            WorldStorageClaimSpec {
                scope: "world".into(),
                tier,
                world_ref: LocalRef::new("w1"),
                shard_ref: None,
                size: "1Gi".into(),
                access_modes: vec!["ReadWriteOnce".into()],
                storage_class_name: storage_class_name.map(str::to_string),
            },
        )
    }

    #[test]
    fn client_tier_never_becomes_a_pvc() {
        let c = claim(StorageTier::Client, None);
        let config = cfg(None, None);
        assert!(matches!(decide(&c, &config), Decision::External(_)));
    }

    #[test]
    fn server_tier_with_claim_level_storage_class_bypasses_operator_default() {
        let c = claim(StorageTier::ServerLowLatency, Some("local-nvme"));
        let config = cfg(None, None);
        assert!(matches!(decide(&c, &config), Decision::Pvc(_)));
    }

    #[test]
    fn server_tier_with_no_storage_class_anywhere_is_a_config_error() {
        let c = claim(StorageTier::ServerHighLatency, None);
        let config = cfg(Some("ssd"), None);
        assert!(matches!(decide(&c, &config), Decision::ConfigError(_)));
    }

    #[test]
    fn server_tier_falls_back_to_operator_default() {
        let c = claim(StorageTier::ServerHighLatency, None);
        let config = cfg(Some("ssd"), Some("nvme"));
        match decide(&c, &config) {
            Decision::Pvc(name) => assert!(name.contains("server-high-latency")),
            _ => panic!("expected a PVC decision"),
        }
    }

    #[test]
    fn external_uri_is_a_home_relative_file_path() {
        let c = claim(StorageTier::Client, None);
        assert_eq!(external_uri(&c), "file://$HOME/.platform/worlds/w1");
    }

    #[test]
    fn external_uri_includes_the_shard_when_shard_scoped() {
        let mut c = claim(StorageTier::Client, None);
        c.spec.shard_ref = Some(LocalRef::new("ws-w1-0000"));
        assert_eq!(external_uri(&c), "file://$HOME/.platform/worlds/w1/shards/ws-w1-0000");
    }
}
