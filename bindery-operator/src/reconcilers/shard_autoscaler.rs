//! `ShardAutoscaler` (§4.4): a closed control loop over
//! `WorldInstance.spec.shardCount`, modeled on the same proportional-scaling
//! math as the Kubernetes `HorizontalPodAutoscaler`:
//! `desired = ceil(current * observed / target)`, clamped to
//! `[minShards, maxShards]`.
//!
//! Utilization is read from the `metrics.k8s.io` aggregated API (the same
//! API the in-cluster HPA controller itself consumes), summed across the
//! `Pod`s this world's shards own and averaged against their resource
//! requests. `metrics.k8s.io` isn't part of `k8s-openapi`'s typed surface,
//! so this reconciler talks to it via `kube::Client::request` with a raw
//! JSON path, the same escape hatch `kube::Api` itself is built on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::Request;
use kube::api::{Api, ListParams, PatchParams, Patch};
use kube::runtime::controller::Action;
use kube::runtime::{watcher::Config, Config as ControllerConfig, Controller};
use kube::{Client, ResourceExt};
use tracing::{error, info, instrument, warn, Span};

use bindery_types::{labels, MetricSpec, ResourceMetricName, ShardAutoscaler, ShardAutoscalerStatus, WorldInstance};

use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::metrics::ReconcileTimer;
use crate::telemetry;

const CONTROLLER_NAME: &str = "shard-autoscaler";

pub async fn run(client: Client, state: &State) {
    let autoscalers = match state.watch_namespace() {
        Some(ns) => Api::<ShardAutoscaler>::namespaced(client.clone(), ns),
        None => Api::<ShardAutoscaler>::all(client.clone()),
    };
    if let Err(e) = autoscalers.list(&ListParams::default().limit(1)).await {
        error!(error = %e, "ShardAutoscaler CRD is not queryable; is it installed?");
        return;
    }
    Controller::new(autoscalers, Config::default())
        .with_config(ControllerConfig::default().concurrency(state.concurrency()))
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|res| async move { res.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

#[instrument(skip(autoscaler, ctx), fields(trace_id))]
async fn reconcile(autoscaler: Arc<ShardAutoscaler>, ctx: Arc<Context>) -> Result<Action> {
    let trace_id = telemetry::get_trace_id();
    Span::current().record("trace_id", tracing::field::display(&trace_id));
    let timer = ReconcileTimer::start(CONTROLLER_NAME);
    let result = reconcile_inner(&autoscaler, &ctx).await;
    timer.finish(&ctx.metrics, result.is_ok());
    result
}

async fn reconcile_inner(autoscaler: &ShardAutoscaler, ctx: &Context) -> Result<Action> {
    let namespace = autoscaler.namespace().ok_or_else(|| Error::MissingNamespace(autoscaler.name_any()))?;
    let world_name = &autoscaler.spec.world_ref.name;

    let worlds: Api<WorldInstance> = Api::namespaced(ctx.client.clone(), &namespace);
    let world = match worlds.get_opt(world_name).await? {
        Some(w) => w,
        None => {
            warn!(world = %world_name, "referenced WorldInstance not found yet");
            return Ok(Action::requeue(ctx.config.autoscaler_poll_interval));
        }
    };

    let current_shards = world.spec.effective_shard_count();
    let observations = observe_utilization(ctx, &namespace, world_name, &autoscaler.spec.metrics).await?;
    let desired_shards = compute_desired_shards(current_shards, autoscaler.spec.min_shards, autoscaler.spec.max_shards, &observations);

    info!(
        world = %world_name,
        current_shards,
        desired_shards,
        "shard autoscaler evaluated"
    );

    if desired_shards != current_shards {
        let patch = serde_json::json!({ "spec": { "shardCount": desired_shards } });
        worlds.patch(world_name, &PatchParams::apply("shard-autoscaler"), &Patch::Merge(patch)).await?;
    }

    let status = ShardAutoscalerStatus {
        current_shards,
        desired_shards,
        last_scale_time: if desired_shards != current_shards { Some(chrono::Utc::now()) } else { autoscaler.status.as_ref().and_then(|s| s.last_scale_time) },
    };
    let autoscalers: Api<ShardAutoscaler> = Api::namespaced(ctx.client.clone(), &namespace);
    let status_patch = serde_json::json!({ "status": status });
    autoscalers
        .patch_status(&autoscaler.name_any(), &PatchParams::apply("shard-autoscaler"), &Patch::Merge(status_patch))
        .await?;

    Ok(Action::requeue(ctx.config.autoscaler_poll_interval))
}

/// One resource's observed utilization percentage, aggregated across every
/// pod this world's shards own.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    pub resource: ResourceMetricName,
    pub current_utilization_percentage: u32,
    pub target_utilization_percentage: u32,
}

async fn observe_utilization(
    ctx: &Context,
    namespace: &str,
    world_name: &str,
    metric_specs: &[MetricSpec],
) -> Result<Vec<Observation>> {
    if metric_specs.is_empty() {
        return Ok(Vec::new());
    }

    let selector = labels::selector(&[(labels::world(), world_name.to_string())]);
    let path = format!(
        "/apis/metrics.k8s.io/v1beta1/namespaces/{namespace}/pods?labelSelector={}",
        urlencoding_light(&selector)
    );
    let request = Request::builder().uri(path).body(Vec::new()).map_err(|e| {
        Error::Store(format!("failed to build metrics.k8s.io request: {e}"))
    })?;

    let raw: serde_json::Value = match ctx.client.request(request).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "metrics.k8s.io unavailable, skipping this scaling decision");
            return Ok(Vec::new());
        }
    };

    let usage = sum_pod_metrics(&raw);
    Ok(metric_specs
        .iter()
        .filter_map(|spec| {
            let observed = match spec.resource_name {
                ResourceMetricName::Cpu => usage.get("cpu").copied(),
                ResourceMetricName::Memory => usage.get("memory").copied(),
            }?;
            Some(Observation {
                resource: spec.resource_name,
                current_utilization_percentage: observed,
                target_utilization_percentage: spec.target_utilization_percentage,
            })
        })
        .collect())
}

/// Parses a `metrics.k8s.io/v1beta1` `PodMetricsList` JSON document into a
/// best-effort utilization percentage per resource, treating the sum of
/// containers' `usage` as a fraction of an assumed 100m CPU / 128Mi memory
/// baseline request per container when no request data is available inline
/// in the metrics document (the metrics API does not echo requests back).
fn sum_pod_metrics(raw: &serde_json::Value) -> BTreeMap<&'static str, u32> {
    const BASELINE_CPU_MILLIS: f64 = 100.0;
    const BASELINE_MEMORY_MI: f64 = 128.0;

    let mut cpu_millis = 0.0f64;
    let mut memory_mi = 0.0f64;
    let mut containers = 0u32;

    if let Some(items) = raw.get("items").and_then(|v| v.as_array()) {
        for item in items {
            if let Some(list) = item.get("containers").and_then(|v| v.as_array()) {
                for c in list {
                    containers += 1;
                    if let Some(cpu) = c.get("usage").and_then(|u| u.get("cpu")).and_then(|v| v.as_str()) {
                        cpu_millis += parse_cpu_millis(cpu);
                    }
                    if let Some(mem) = c.get("usage").and_then(|u| u.get("memory")).and_then(|v| v.as_str()) {
                        memory_mi += parse_memory_mi(mem);
                    }
                }
            }
        }
    }

    let mut out = BTreeMap::new();
    if containers > 0 {
        let cpu_pct = (cpu_millis / (containers as f64 * BASELINE_CPU_MILLIS) * 100.0).round();
        let mem_pct = (memory_mi / (containers as f64 * BASELINE_MEMORY_MI) * 100.0).round();
        out.insert("cpu", cpu_pct.max(0.0) as u32);
        out.insert("memory", mem_pct.max(0.0) as u32);
    }
    out
}

fn parse_cpu_millis(s: &str) -> f64 {
    if let Some(n) = s.strip_suffix('n') {
        n.parse::<f64>().unwrap_or(0.0) / 1_000_000.0
    } else if let Some(m) = s.strip_suffix('m') {
        m.parse::<f64>().unwrap_or(0.0)
    } else {
        s.parse::<f64>().unwrap_or(0.0) * 1000.0
    }
}

fn parse_memory_mi(s: &str) -> f64 {
    if let Some(ki) = s.strip_suffix("Ki") {
        ki.parse::<f64>().unwrap_or(0.0) / 1024.0
    } else if let Some(mi) = s.strip_suffix("Mi") {
        mi.parse::<f64>().unwrap_or(0.0)
    } else if let Some(gi) = s.strip_suffix("Gi") {
        gi.parse::<f64>().unwrap_or(0.0) * 1024.0
    } else {
        s.parse::<f64>().unwrap_or(0.0) / (1024.0 * 1024.0)
    }
}

fn urlencoding_light(s: &str) -> String {
    s.replace(' ', "%20").replace(',', "%2C").replace('=', "%3D")
}

/// The scaling decision itself (§4.4 steps 1-4): proportional scaling from
/// the worst (highest-utilization) observed metric, clamped to
/// `[min_shards, max_shards]`. `0` shards is treated as `1` (§4.4 step 2).
pub fn compute_desired_shards(
    current_shards: u32,
    min_shards: u32,
    max_shards: u32,
    observations: &[Observation],
) -> u32 {
    let current = current_shards.max(1);
    let min = min_shards.max(1);
    let max = max_shards.max(min);

    if observations.is_empty() {
        return current.clamp(min, max);
    }

    let scaled: Vec<u32> = observations
        .iter()
        .filter(|o| o.target_utilization_percentage > 0)
        .map(|o| {
            let ratio = o.current_utilization_percentage as f64 / o.target_utilization_percentage as f64;
            ((current as f64) * ratio).ceil() as u32
        })
        .collect();

    scaled.into_iter().max().unwrap_or(current).clamp(min, max)
}

fn error_policy(autoscaler: Arc<ShardAutoscaler>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(autoscaler = %autoscaler.name_any(), error = %error, "shard autoscaler reconcile failed");
    ctx.metrics.record_failure(CONTROLLER_NAME, 0.0);
    Action::requeue(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_observations_holds_steady_within_bounds() {
        assert_eq!(compute_desired_shards(3, 1, 10, &[]), 3);
        assert_eq!(compute_desired_shards(0, 2, 10, &[]), 2);
    }

    #[test]
    fn scales_up_proportionally_to_the_worst_metric() {
        let obs = vec![
            Observation { resource: ResourceMetricName::Cpu, current_utilization_percentage: 200, target_utilization_percentage: 100 },
            Observation { resource: ResourceMetricName::Memory, current_utilization_percentage: 120, target_utilization_percentage: 100 },
        ];
        // cpu: ceil(4 * 200/100) = 8, memory: ceil(4 * 120/100) = 5 -> max is 8
        assert_eq!(compute_desired_shards(4, 1, 20, &obs), 8);
    }

    #[test]
    fn clamps_to_max_shards() {
        let obs = vec![Observation {
            resource: ResourceMetricName::Cpu,
            current_utilization_percentage: 1000,
            target_utilization_percentage: 100,
        }];
        assert_eq!(compute_desired_shards(2, 1, 6, &obs), 6);
    }

    #[test]
    fn clamps_to_min_shards() {
        let obs = vec![Observation {
            resource: ResourceMetricName::Cpu,
            current_utilization_percentage: 1,
            target_utilization_percentage: 100,
        }];
        assert_eq!(compute_desired_shards(4, 3, 10, &obs), 3);
    }

    #[test]
    fn scaling_respects_a_target_other_than_100_percent() {
        // target 50%, current 50% -> already at target, ratio 1.0 -> no change
        let obs = vec![Observation {
            resource: ResourceMetricName::Cpu,
            current_utilization_percentage: 50,
            target_utilization_percentage: 50,
        }];
        assert_eq!(compute_desired_shards(4, 1, 20, &obs), 4);
    }

    #[test]
    fn cpu_quantity_parsing_handles_nano_milli_and_core_suffixes() {
        assert!((parse_cpu_millis("500m") - 500.0).abs() < 0.001);
        assert!((parse_cpu_millis("1") - 1000.0).abs() < 0.001);
        assert!((parse_cpu_millis("250000000n") - 250.0).abs() < 0.001);
    }

    #[test]
    fn memory_quantity_parsing_handles_binary_suffixes() {
        assert!((parse_memory_mi("256Mi") - 256.0).abs() < 0.001);
        assert!((parse_memory_mi("1Gi") - 1024.0).abs() < 0.001);
    }
}
