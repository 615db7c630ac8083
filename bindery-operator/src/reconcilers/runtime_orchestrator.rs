//! `RuntimeOrchestrator` (§4.5): turns resolved `CapabilityBinding`s into
//! running `Deployment`/`Service` pairs, wires consumers to providers via
//! env vars, and publishes each binding's `status.provider.endpoint`.
//!
//! Triggered by `CapabilityBinding` changes; since every `CapabilityBinding`
//! is owned by its `WorldInstance` (§4.2), reconciling a whole world any
//! time one of its bindings changes also re-materializes every *consumer*
//! of that binding's capability, which is how an endpoint update on one
//! binding reaches the `Deployment`s of modules that depend on it (§4.5
//! "re-enqueues bindings whose consumer module is the provider of some
//! other binding").
//!
//! Every module ends up as the `provider` of at least one binding — either
//! an ordinary one or its own synthetic root binding (§4.1 step 3) — so the
//! distinct `(shardId, provider)` pairs across a world's bindings are
//! exactly the set of runtime units this reconciler must materialize.
//! Colocation groups (§3, §4.5) fold several modules sharing a shard bucket
//! into one `Deployment`/`Service` (`Pod` strategy) or into several
//! affinity-linked ones (`Node` strategy).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, ContainerPort, EnvVar, Lifecycle, LifecycleHandler, PodAffinity, PodAffinityTerm,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, OwnerReference};
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::{watcher::Config, Config as ControllerConfig, Controller};
use kube::{Client, Resource, ResourceExt};
use tracing::{error, info, instrument, warn, Span};

use bindery_types::{
    labels, naming, Booklet, CapabilityBinding, ColocationStrategy, ConditionStatus, ModuleManifest,
    ProviderEndpoint, WorldInstance, WorldShard,
};

use crate::context::{Context, State};
use crate::error::{Error, Result};
use crate::metrics::ReconcileTimer;
use crate::telemetry;

const CONTROLLER_NAME: &str = "runtime-orchestrator";
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
    let (owned_bindings, owned_deployments, owned_services) = match namespace {
        Some(ns) => (
            Api::<CapabilityBinding>::namespaced(client.clone(), ns),
            Api::<Deployment>::namespaced(client.clone(), ns),
            Api::<Service>::namespaced(client.clone(), ns),
        ),
        None => (
            Api::<CapabilityBinding>::all(client.clone()),
            Api::<Deployment>::all(client.clone()),
            Api::<Service>::all(client.clone()),
        ),
    };
    Controller::new(worlds, Config::default())
        .with_config(ControllerConfig::default().concurrency(state.concurrency()))
        .owns(owned_bindings, Config::default())
        .owns(owned_deployments, Config::default())
        .owns(owned_services, Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state.to_context(client))
        .filter_map(|res| async move { res.ok() })
        .for_each(|_| futures::future::ready(()))
        .await;
}

fn recorder_for(client: Client) -> Recorder {
    Recorder::new(client, Reporter::from(CONTROLLER_NAME))
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

    let bindings_api: Api<CapabilityBinding> = Api::namespaced(ctx.client.clone(), &namespace);
    let selector = labels::selector(&[(labels::world(), world_name.clone())]);
    let bindings = bindings_api.list(&ListParams::default().labels(&selector)).await?.items;
    if bindings.is_empty() {
        return Ok(Action::requeue(REQUEUE_STEADY));
    }

    let booklets: Api<Booklet> = Api::namespaced(ctx.client.clone(), &namespace);
    let booklet = match booklets.get_opt(&world.spec.booklet_ref.name).await? {
        Some(b) => b,
        None => return Ok(Action::requeue(Duration::from_secs(5))),
    };

    let manifests: Api<ModuleManifest> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut module_by_name: BTreeMap<String, ModuleManifest> = BTreeMap::new();
    for module_ref in &booklet.spec.modules {
        if let Some(m) = manifests.get_opt(&module_ref.name).await? {
            module_by_name.insert(module_ref.name.clone(), m);
        }
    }

    let world_owner_ref = world.controller_owner_ref(&()).ok_or_else(|| {
        Error::Store(format!("WorldInstance {world_name} has no uid yet to own children with"))
    })?;

    let game = booklet.name_any();
    let groups = group_providers_by_colocation(&bindings, &booklet);
    info!(world = %world_name, groups = groups.len(), "orchestrating runtimes");

    let shards: Api<WorldShard> = Api::namespaced(ctx.client.clone(), &namespace);

    for group in &groups {
        let members: Vec<&ModuleManifest> =
            group.modules.iter().filter_map(|m| module_by_name.get(m)).collect();
        if members.iter().all(|m| !m.has_runtime()) {
            continue;
        }

        let owner_ref = match group.shard_id {
            Some(id) => {
                let shard_name = naming::stable_shard_name(&world_name, id);
                match shards.get_opt(&shard_name).await? {
                    Some(shard) => shard.controller_owner_ref(&()).unwrap_or_else(|| world_owner_ref.clone()),
                    None => return Ok(Action::requeue(Duration::from_secs(5))),
                }
            }
            None => world_owner_ref.clone(),
        };

        let env_by_module = env_vars_for_group(group, &bindings, &module_by_name, &namespace);
        if group.strategy == ColocationStrategy::Node && group.modules.len() > 1 {
            for member in members.iter().filter(|m| m.has_runtime()) {
                apply_node_colocated_member(
                    ctx,
                    &namespace,
                    &world_name,
                    &game,
                    group,
                    member,
                    &env_by_module,
                    &bindings,
                    &module_by_name,
                    owner_ref.clone(),
                )
                .await?;
            }
        } else {
            apply_pod_group(
                ctx,
                &namespace,
                &world_name,
                &game,
                group,
                &members,
                &env_by_module,
                &bindings,
                &module_by_name,
                owner_ref,
            )
            .await?;
        }
    }

    publish_endpoints(ctx, &namespace, &bindings, &module_by_name).await?;
    aggregate_world_runtime_ready(ctx, world, &namespace, &bindings, &module_by_name).await?;

    Ok(Action::requeue(REQUEUE_STEADY))
}

/// One unit of runtime deployment: either a single module or a colocation
/// group sharing one `Deployment`/`Service` (§4.5), scoped to a shard when
/// its bindings are `world-shard`-scoped.
pub struct RuntimeGroup {
    pub shard_id: Option<u32>,
    pub name: String,
    pub modules: Vec<String>,
    pub strategy: ColocationStrategy,
}

/// Groups the distinct `(shardId, provider)` pairs of `bindings` by the
/// `Booklet`'s colocation groups (§3, §4.5). Modules in no colocation group
/// become singleton groups named after themselves. Two modules colocated in
/// the manifest still materialize once per shard bucket they're bound in.
pub fn group_providers_by_colocation(bindings: &[CapabilityBinding], booklet: &Booklet) -> Vec<RuntimeGroup> {
    let mut providers: Vec<(Option<u32>, &str)> =
        bindings.iter().map(|b| (b.spec.shard_id, b.spec.provider.module_manifest_name.as_str())).collect();
    providers.sort();
    providers.dedup();

    let mut seen_groups: BTreeSet<(Option<u32>, String)> = BTreeSet::new();
    let mut out = Vec::new();
    for (shard_id, module) in providers {
        if let Some(group) = booklet.colocation_group_for(module) {
            if seen_groups.insert((shard_id, group.name.clone())) {
                out.push(RuntimeGroup {
                    shard_id,
                    name: group.name.clone(),
                    modules: group.modules.clone(),
                    strategy: group.strategy.unwrap_or(ColocationStrategy::Pod),
                });
            }
        } else {
            out.push(RuntimeGroup {
                shard_id,
                name: module.to_string(),
                modules: vec![module.to_string()],
                strategy: ColocationStrategy::Pod,
            });
        }
    }
    out
}

/// `PLATFORM_CAPABILITY_<FRAG>_{ENDPOINT,HOST,PORT}` env vars injected into
/// a consumer's container for every binding where it's the consumer and the
/// endpoint is already published (§4.5 "Environment"). A provider sharing
/// the same `Pod`-strategy group instead gets a `PLATFORM_UDS_<FRAG>` socket
/// path, since both containers share the pod's `platform-uds` volume;
/// everything else resolves to the provider's `Service` DNS name.
/// World-scoped deployments only see their own world's bindings (the
/// `bindings` slice is already world-scoped); shard-scoped bindings only
/// match a deployment in the same shard.
pub fn env_vars_for_group(
    group: &RuntimeGroup,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
    namespace: &str,
) -> BTreeMap<String, BTreeMap<String, String>> {
    let mut out: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for module in &group.modules {
        let mut env = BTreeMap::new();
        for binding in bindings
            .iter()
            .filter(|b| &b.spec.consumer.module_manifest_name == module)
            .filter(|b| b.spec.shard_id == group.shard_id)
            .filter(|b| b.endpoint_published())
        {
            let provider_name = &binding.spec.provider.module_manifest_name;
            let fragment = naming::capability_env_fragment(&binding.spec.capability_id);
            let pod_colocated = group.strategy == ColocationStrategy::Pod
                && group.modules.len() > 1
                && group.modules.contains(provider_name);
            if pod_colocated {
                env.insert(format!("PLATFORM_UDS_{fragment}"), format!("/var/run/platform/{provider_name}.sock"));
                continue;
            }
            let provider_port = module_by_name.get(provider_name).map(|m| m.effective_port()).unwrap_or(50051);
            let host = service_dns_name(provider_name, namespace);
            env.insert(format!("PLATFORM_CAPABILITY_{fragment}_ENDPOINT"), format!("{host}:{provider_port}"));
            env.insert(format!("PLATFORM_CAPABILITY_{fragment}_HOST"), host);
            env.insert(format!("PLATFORM_CAPABILITY_{fragment}_PORT"), provider_port.to_string());
        }
        if group.strategy == ColocationStrategy::Pod && group.modules.len() > 1 {
            env.insert("PLATFORM_UDS_DIR".to_string(), "/var/run/platform".to_string());
            env.insert("PLATFORM_MODULE_NAME".to_string(), module.clone());
        }
        out.insert(module.clone(), env);
    }
    out
}

fn service_dns_name(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}.svc.cluster.local")
}

/// Builds the shared-pod `Deployment`/`Service` for a `Pod`-strategy
/// colocation group (or a singleton group), one container per module
/// (§4.5 "Colocation strategy Pod").
async fn apply_pod_group(
    ctx: &Context,
    namespace: &str,
    world_name: &str,
    game: &str,
    group: &RuntimeGroup,
    members: &[&ModuleManifest],
    env_by_module: &BTreeMap<String, BTreeMap<String, String>>,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
    owner_ref: OwnerReference,
) -> Result<()> {
    let name = naming::stable_runtime_name(world_name, group.shard_id, &group.name, group.modules.len() > 1);
    let mut pod_labels = labels::binding_labels(world_name, game, group.shard_id);
    pod_labels.insert(labels::managed_by(), labels::managed_by_values::RUNTIME_ORCHESTRATOR.to_string());
    if group.modules.len() > 1 {
        pod_labels.insert(labels::coloc_group(), group.name.clone());
    } else {
        pod_labels.insert(labels::module(), group.name.clone());
    }

    let shares_pod = group.modules.len() > 1;
    let containers: Vec<Container> = members
        .iter()
        .filter(|m| m.has_runtime())
        .map(|m| build_container(m, env_by_module.get(&m.spec.id), shares_pod))
        .collect();
    if containers.is_empty() {
        return Ok(());
    }
    let init_containers = if shares_pod {
        None
    } else {
        members
            .first()
            .and_then(|m| {
                wait_for_deps_init_container(&dependency_targets(&m.spec.id, group, bindings, module_by_name, namespace))
            })
            .map(|c| vec![c])
    };
    let volumes = shares_pod.then(|| {
        vec![k8s_openapi::api::core::v1::Volume {
            name: "platform-uds".to_string(),
            empty_dir: Some(k8s_openapi::api::core::v1::EmptyDirVolumeSource::default()),
            ..Default::default()
        }]
    });

    let pod_affinity = members.first().and_then(|m| m.spec.scheduling.as_ref()).and_then(|s| s.affinity.clone());
    let tolerations: Vec<_> = members
        .iter()
        .filter_map(|m| m.spec.scheduling.as_ref())
        .flat_map(|s| s.tolerations.clone())
        .collect();
    let node_selector: BTreeMap<String, String> = members
        .iter()
        .filter_map(|m| m.spec.scheduling.as_ref())
        .flat_map(|s| s.node_selector.clone())
        .collect();
    let priority_class_name =
        members.iter().find_map(|m| m.spec.scheduling.as_ref().and_then(|s| s.priority_class_name.clone()));
    let termination_grace_period_seconds = members.iter().find_map(|m| m.termination_grace_period_seconds());

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(pod_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(pod_labels.clone()), ..Default::default() }),
                spec: Some(PodSpec {
                    containers,
                    affinity: pod_affinity,
                    tolerations: Some(tolerations).filter(|t| !t.is_empty()),
                    node_selector: Some(node_selector).filter(|m| !m.is_empty()),
                    priority_class_name,
                    termination_grace_period_seconds,
                    volumes,
                    init_containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };
    let patch = serde_json::to_value(&deployment).map_err(|e| Error::Store(e.to_string()))?;
    deployments.patch(&name, &PatchParams::apply(CONTROLLER_NAME).force(), &Patch::Apply(patch)).await?;

    let ports: Vec<ServicePort> = members
        .iter()
        .filter(|m| m.has_runtime())
        .map(|m| ServicePort { name: Some("grpc".to_string()), port: m.effective_port() as i32, ..Default::default() })
        .collect();
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    let service = Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec { selector: Some(pod_labels), ports: Some(ports), ..Default::default() }),
        status: None,
    };
    let patch = serde_json::to_value(&service).map_err(|e| Error::Store(e.to_string()))?;
    services.patch(&name, &PatchParams::apply(CONTROLLER_NAME).force(), &Patch::Apply(patch)).await?;

    Ok(())
}

/// Builds one `Deployment`/`Service` per module of a `Node`-strategy
/// colocation group, each carrying a required pod-affinity term on the
/// group's shared `coloc-group` label instead of sharing a pod (§4.5
/// "Colocation strategy Node").
async fn apply_node_colocated_member(
    ctx: &Context,
    namespace: &str,
    world_name: &str,
    game: &str,
    group: &RuntimeGroup,
    member: &ModuleManifest,
    env_by_module: &BTreeMap<String, BTreeMap<String, String>>,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
    owner_ref: OwnerReference,
) -> Result<()> {
    let name = naming::stable_runtime_name(world_name, group.shard_id, &member.spec.id, false);
    let mut pod_labels = labels::binding_labels(world_name, game, group.shard_id);
    pod_labels.insert(labels::coloc_group(), group.name.clone());
    pod_labels.insert(labels::managed_by(), labels::managed_by_values::RUNTIME_ORCHESTRATOR.to_string());
    pod_labels.insert(labels::module(), member.spec.id.clone());

    let container = build_container(member, env_by_module.get(&member.spec.id), false);
    let init_containers = wait_for_deps_init_container(&dependency_targets(
        &member.spec.id,
        group,
        bindings,
        module_by_name,
        namespace,
    ))
    .map(|c| vec![c]);
    let affinity = coloc_group_affinity(&group.name, world_name, group.shard_id);
    let scheduling = member.spec.scheduling.as_ref();

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), namespace);
    let deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref.clone()]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(pod_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(pod_labels.clone()), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    affinity: Some(affinity),
                    tolerations: scheduling.map(|s| s.tolerations.clone()).filter(|t| !t.is_empty()),
                    node_selector: scheduling.map(|s| s.node_selector.clone()).filter(|m| !m.is_empty()),
                    priority_class_name: scheduling.and_then(|s| s.priority_class_name.clone()),
                    termination_grace_period_seconds: member.termination_grace_period_seconds(),
                    init_containers,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    };
    let patch = serde_json::to_value(&deployment).map_err(|e| Error::Store(e.to_string()))?;
    deployments.patch(&name, &PatchParams::apply(CONTROLLER_NAME).force(), &Patch::Apply(patch)).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), namespace);
    let service = Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(pod_labels.clone()),
            owner_references: Some(vec![owner_ref]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(pod_labels),
            ports: Some(vec![ServicePort {
                name: Some("grpc".to_string()),
                port: member.effective_port() as i32,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    };
    let patch = serde_json::to_value(&service).map_err(|e| Error::Store(e.to_string()))?;
    services.patch(&name, &PatchParams::apply(CONTROLLER_NAME).force(), &Patch::Apply(patch)).await?;

    Ok(())
}

fn build_container(module: &ModuleManifest, env: Option<&BTreeMap<String, String>>, shares_pod: bool) -> Container {
    let mut env_vars: Vec<EnvVar> = module
        .spec
        .runtime
        .as_ref()
        .map(|r| {
            r.env
                .iter()
                .map(|(k, v)| EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() })
                .collect()
        })
        .unwrap_or_default();
    if let Some(extra) = env {
        for (k, v) in extra {
            env_vars.push(EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() });
        }
    }
    env_vars.sort_by(|a, b| a.name.cmp(&b.name));

    let lifecycle = module.pre_stop_command().map(|cmd| Lifecycle {
        pre_stop: Some(LifecycleHandler {
            exec: Some(k8s_openapi::api::core::v1::ExecAction { command: Some(vec!["/bin/sh".into(), "-c".into(), cmd]) }),
            ..Default::default()
        }),
        ..Default::default()
    });

    let volume_mounts = shares_pod.then(|| {
        vec![k8s_openapi::api::core::v1::VolumeMount {
            name: "platform-uds".to_string(),
            mount_path: "/var/run/platform".to_string(),
            ..Default::default()
        }]
    });

    Container {
        name: module.spec.id.clone(),
        image: module.effective_image(),
        command: module.spec.runtime.as_ref().map(|r| r.command.clone()).filter(|c| !c.is_empty()),
        args: module.spec.runtime.as_ref().map(|r| r.args.clone()).filter(|c| !c.is_empty()),
        env: Some(env_vars),
        ports: Some(vec![ContainerPort { container_port: module.effective_port() as i32, ..Default::default() }]),
        lifecycle,
        volume_mounts,
        ..Default::default()
    }
}

/// `wait-for-deps` init container (§4.5 "Readiness gate"): blocks with a
/// busybox TCP-connect retry loop until every dependency's `Service` is
/// reachable on its port. Omitted entirely when `dep_targets` is empty.
fn wait_for_deps_init_container(dep_targets: &[(String, u16)]) -> Option<Container> {
    if dep_targets.is_empty() {
        return None;
    }
    let checks: Vec<String> = dep_targets
        .iter()
        .map(|(host, port)| {
            format!("until nc -z {host} {port}; do echo waiting for {host}:{port}; sleep 2; done")
        })
        .collect();
    Some(Container {
        name: "wait-for-deps".to_string(),
        image: Some("busybox:1.36".to_string()),
        command: Some(vec!["/bin/sh".to_string(), "-c".to_string(), checks.join(" && ")]),
        ..Default::default()
    })
}

/// The `(host, port)` targets a deployment's `wait-for-deps` init container
/// should poll: one per distinct provider this module consumes from, for
/// bindings outside its own colocation group (§4.5 "Readiness gate").
fn dependency_targets(
    module: &str,
    group: &RuntimeGroup,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
    namespace: &str,
) -> Vec<(String, u16)> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for binding in bindings
        .iter()
        .filter(|b| b.spec.consumer.module_manifest_name == module)
        .filter(|b| b.spec.shard_id == group.shard_id)
    {
        let provider_name = &binding.spec.provider.module_manifest_name;
        if group.modules.contains(provider_name) || !seen.insert(provider_name.clone()) {
            continue;
        }
        let port = module_by_name.get(provider_name).map(|m| m.effective_port()).unwrap_or(50051);
        out.push((service_dns_name(provider_name, namespace), port));
    }
    out
}

/// Required pod-affinity term pinning a pod to any pod already carrying
/// the same `coloc-group`/`world`[/`shard`] labels (§4.5 "Colocation
/// strategy Node").
fn coloc_group_affinity(group_name: &str, world_name: &str, shard_id: Option<u32>) -> Affinity {
    let mut match_expressions = vec![
        LabelSelectorRequirement {
            key: labels::coloc_group(),
            operator: "In".to_string(),
            values: Some(vec![group_name.to_string()]),
        },
        LabelSelectorRequirement {
            key: labels::world(),
            operator: "In".to_string(),
            values: Some(vec![world_name.to_string()]),
        },
    ];
    if let Some(id) = shard_id {
        match_expressions.push(LabelSelectorRequirement {
            key: labels::shard(),
            operator: "In".to_string(),
            values: Some(vec![id.to_string()]),
        });
    }
    Affinity {
        pod_affinity: Some(PodAffinity {
            required_during_scheduling_ignored_during_execution: Some(vec![PodAffinityTerm {
                label_selector: Some(LabelSelector { match_expressions: Some(match_expressions), ..Default::default() }),
                topology_key: "kubernetes.io/hostname".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

async fn publish_endpoints(
    ctx: &Context,
    namespace: &str,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
) -> Result<()> {
    let api: Api<CapabilityBinding> = Api::namespaced(ctx.client.clone(), namespace);
    let now = Utc::now();
    for binding in bindings {
        let provider_name = &binding.spec.provider.module_manifest_name;
        let Some(provider) = module_by_name.get(provider_name) else { continue };

        let mut status = binding.status.clone().unwrap_or_default();
        let prev_reason = status
            .conditions
            .get(bindery_types::binding::condition_types::RUNTIME_READY)
            .map(|c| c.reason.clone());

        let (reason, note) = if !provider.has_runtime() {
            status.conditions.set(
                bindery_types::binding::condition_types::RUNTIME_READY,
                ConditionStatus::True,
                "NotServerOrchestrated",
                "provider has no runtime.image; nothing for the orchestrator to run",
                now,
            );
            ("NotServerOrchestrated", "provider has no runtime image")
        } else {
            let service_name =
                naming::stable_runtime_name(binding.world_name(), binding.spec.shard_id, provider_name, false);
            status.provider = Some(ProviderEndpoint {
                type_: "kubernetesService".to_string(),
                value: service_dns_name(&service_name, namespace),
                port: provider.effective_port(),
            });
            status.conditions.set(
                bindery_types::binding::condition_types::RUNTIME_READY,
                ConditionStatus::True,
                "EndpointPublished",
                "provider deployment and service are reconciled",
                now,
            );
            ("EndpointPublished", "endpoint published")
        };

        if prev_reason.as_deref() != Some(reason) {
            let recorder = recorder_for(ctx.client.clone());
            recorder
                .publish(
                    &Event {
                        type_: EventType::Normal,
                        reason: reason.to_string(),
                        note: Some(note.to_string()),
                        action: "Reconciling".to_string(),
                        secondary: None,
                    },
                    &binding.object_ref(&()),
                )
                .await?;
        }

        let patch = serde_json::json!({ "status": status });
        api.patch_status(&binding.name_any(), &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch))
            .await?;
    }
    Ok(())
}

/// §4.5 "World RuntimeReady aggregation": rolls every binding's
/// server-orchestration state up into one condition on the `WorldInstance`.
pub fn runtime_ready_reason(
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
) -> (ConditionStatus, &'static str) {
    if bindings.is_empty() {
        return (ConditionStatus::True, "NoServerWorkloads");
    }
    let mut any_missing_provider = false;
    let mut all_ready = true;
    for binding in bindings {
        match module_by_name.get(&binding.spec.provider.module_manifest_name) {
            None => {
                any_missing_provider = true;
                all_ready = false;
            }
            Some(provider) => {
                if provider.has_runtime() && !binding.endpoint_published() {
                    all_ready = false;
                }
            }
        }
    }
    if any_missing_provider {
        (ConditionStatus::False, "ProviderNotFound")
    } else if all_ready {
        (ConditionStatus::True, "EndpointsPublished")
    } else {
        (ConditionStatus::False, "WaitingForEndpoints")
    }
}

async fn aggregate_world_runtime_ready(
    ctx: &Context,
    world: &WorldInstance,
    namespace: &str,
    bindings: &[CapabilityBinding],
    module_by_name: &BTreeMap<String, ModuleManifest>,
) -> Result<()> {
    let (status, reason) = runtime_ready_reason(bindings, module_by_name);
    let api: Api<WorldInstance> = Api::namespaced(ctx.client.clone(), namespace);
    let mut world_status = world.status.clone().unwrap_or_default();
    world_status.conditions.set(
        bindery_types::world::condition_types::RUNTIME_READY,
        status,
        reason,
        "aggregated from this world's CapabilityBinding set",
        Utc::now(),
    );
    let patch = serde_json::json!({ "status": world_status });
    api.patch_status(&world.name_any(), &PatchParams::apply(CONTROLLER_NAME), &Patch::Merge(patch)).await?;
    Ok(())
}

fn error_policy(world: Arc<WorldInstance>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(world = %world.name_any(), error = %error, "runtime orchestrator reconcile failed");
    ctx.metrics.record_failure(CONTROLLER_NAME, 0.0);
    Action::requeue(Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_types::{BookletSpec, ColocationGroup, ModuleRef};

    fn manifest(id: &str, port: Option<u16>) -> ModuleManifest {
        let mut spec = bindery_types::ModuleManifestSpec { id: id.to_string(), ..Default::default() };
        spec.runtime = Some(bindery_types::ModuleRuntime { image: Some("img".into()), port, ..Default::default() });
        ModuleManifest::new(id, spec)
    }

    fn test_binding(consumer: &str, provider: &str, shard_id: Option<u32>) -> CapabilityBinding {
        use bindery_types::{CapabilityBindingSpec, ConsumerRef, Multiplicity, ProviderRef, Scope};
        CapabilityBinding::new(
            "b1",
            CapabilityBindingSpec {
                capability_id: "physics.engine".into(),
                scope: if shard_id.is_some() { Scope::WorldShard } else { Scope::World },
                multiplicity: Multiplicity::One,
                world_ref: Some("w1".into()),
                consumer: ConsumerRef { module_manifest_name: consumer.into(), requirement_hint: None },
                provider: ProviderRef { module_manifest_name: provider.into(), capability_version: "1.0.0".into() },
                shard_id,
            },
        )
    }

    #[test]
    fn modules_outside_any_colocation_group_are_singleton_groups() {
        let booklet = Booklet::new("b", BookletSpec { modules: vec![ModuleRef { name: "solo".into() }], colocation: vec![] });
        let binding = test_binding("consumer", "solo", None);
        let groups = group_providers_by_colocation(&[binding], &booklet);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].modules, vec!["solo".to_string()]);
    }

    #[test]
    fn colocated_modules_share_one_group() {
        let booklet = Booklet::new(
            "b",
            BookletSpec {
                modules: vec![ModuleRef { name: "a".into() }, ModuleRef { name: "b".into() }],
                colocation: vec![ColocationGroup {
                    name: "pair".into(),
                    modules: vec!["a".into(), "b".into()],
                    strategy: Some(ColocationStrategy::Pod),
                }],
            },
        );
        let bindings = vec![test_binding("c1", "a", None), test_binding("c2", "b", None)];
        let groups = group_providers_by_colocation(&bindings, &booklet);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "pair");
    }

    #[test]
    fn same_colocation_group_materializes_once_per_shard() {
        let booklet = Booklet::new(
            "b",
            BookletSpec {
                modules: vec![ModuleRef { name: "a".into() }, ModuleRef { name: "b".into() }],
                colocation: vec![ColocationGroup {
                    name: "pair".into(),
                    modules: vec!["a".into(), "b".into()],
                    strategy: Some(ColocationStrategy::Pod),
                }],
            },
        );
        let bindings = vec![
            test_binding("c1", "a", Some(0)),
            test_binding("c2", "b", Some(0)),
            test_binding("c3", "a", Some(1)),
        ];
        let groups = group_providers_by_colocation(&bindings, &booklet);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn node_strategy_group_is_preserved_not_collapsed_into_pod() {
        let booklet = Booklet::new(
            "b",
            BookletSpec {
                modules: vec![ModuleRef { name: "a".into() }, ModuleRef { name: "b".into() }],
                colocation: vec![ColocationGroup {
                    name: "spread".into(),
                    modules: vec!["a".into(), "b".into()],
                    strategy: Some(ColocationStrategy::Node),
                }],
            },
        );
        let bindings = vec![test_binding("c1", "a", None), test_binding("c2", "b", None)];
        let groups = group_providers_by_colocation(&bindings, &booklet);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].strategy, ColocationStrategy::Node);
    }

    #[test]
    fn env_vars_are_only_emitted_once_the_endpoint_is_published() {
        let mut modules = BTreeMap::new();
        modules.insert("physics-engine".to_string(), manifest("physics-engine", Some(9000)));
        let group = RuntimeGroup { shard_id: None, name: "game-logic".into(), modules: vec!["game-logic".into()], strategy: ColocationStrategy::Pod };
        let bindings = vec![test_binding("game-logic", "physics-engine", None)];
        let env = env_vars_for_group(&group, &bindings, &modules, "ns1");
        assert!(env["game-logic"].is_empty());
    }

    #[test]
    fn env_vars_point_at_provider_service_dns_once_published() {
        let mut modules = BTreeMap::new();
        modules.insert("physics-engine".to_string(), manifest("physics-engine", Some(9000)));
        let group = RuntimeGroup { shard_id: None, name: "game-logic".into(), modules: vec!["game-logic".into()], strategy: ColocationStrategy::Pod };
        let mut binding = test_binding("game-logic", "physics-engine", None);
        binding.status = Some(bindery_types::CapabilityBindingStatus {
            phase: bindery_types::BindingPhase::Running,
            provider: Some(ProviderEndpoint { type_: "kubernetesService".into(), value: "x".into(), port: 9000 }),
            conditions: Default::default(),
        });
        let bindings = vec![binding];
        let env = env_vars_for_group(&group, &bindings, &modules, "ns1");
        let game_env = &env["game-logic"];
        assert_eq!(game_env.get("PLATFORM_CAPABILITY_PHYSICS_ENGINE_PORT"), Some(&"9000".to_string()));
        assert_eq!(
            game_env.get("PLATFORM_CAPABILITY_PHYSICS_ENGINE_HOST"),
            Some(&"physics-engine.ns1.svc.cluster.local".to_string())
        );
        assert_eq!(
            game_env.get("PLATFORM_CAPABILITY_PHYSICS_ENGINE_ENDPOINT"),
            Some(&"physics-engine.ns1.svc.cluster.local:9000".to_string())
        );
    }

    #[test]
    fn coloc_group_affinity_targets_the_shared_labels() {
        let affinity = coloc_group_affinity("spread", "w1", Some(2));
        let term = &affinity.pod_affinity.unwrap().required_during_scheduling_ignored_during_execution.unwrap()[0];
        assert_eq!(term.topology_key, "kubernetes.io/hostname");
        let exprs = term.label_selector.as_ref().unwrap().match_expressions.as_ref().unwrap();
        assert_eq!(exprs.len(), 3);
    }

    #[test]
    fn runtime_ready_reason_reports_no_server_workloads_when_no_bindings() {
        assert_eq!(runtime_ready_reason(&[], &BTreeMap::new()), (ConditionStatus::True, "NoServerWorkloads"));
    }

    #[test]
    fn runtime_ready_reason_reports_provider_not_found() {
        let bindings = vec![test_binding("c", "missing", None)];
        assert_eq!(runtime_ready_reason(&bindings, &BTreeMap::new()), (ConditionStatus::False, "ProviderNotFound"));
    }

    #[test]
    fn runtime_ready_reason_reports_waiting_for_endpoints() {
        let mut modules = BTreeMap::new();
        modules.insert("physics-engine".to_string(), manifest("physics-engine", Some(9000)));
        let bindings = vec![test_binding("c", "physics-engine", None)];
        assert_eq!(runtime_ready_reason(&bindings, &modules), (ConditionStatus::False, "WaitingForEndpoints"));
    }
}
