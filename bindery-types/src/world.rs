use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::local_ref::LocalRef;

/// High-level lifecycle phase surfaced on `WorldInstance.status.phase` (§3).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum WorldPhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Error,
}

/// A running instance of a `Booklet`, optionally partitioned into shards
/// (§3, glossary).
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "WorldInstance",
    plural = "worldinstances",
    shortname = "world",
    namespaced,
    status = "WorldInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorldInstanceSpec {
    pub booklet_ref: LocalRef,
    #[serde(default)]
    pub realm_ref: Option<LocalRef>,
    /// Must be `>= 1`; `0` is treated as `1` by the `ShardAutoscaler` (§4.4
    /// step 2) and by the `WorldShard` reconciler.
    #[serde(default = "default_shard_count")]
    pub shard_count: u32,
}

fn default_shard_count() -> u32 {
    1
}

impl WorldInstanceSpec {
    /// `spec.shardCount`, with the `0` -> `1` normalization used throughout
    /// the spec (§4.4 step 2).
    pub fn effective_shard_count(&self) -> u32 {
        self.shard_count.max(1)
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorldInstanceStatus {
    #[serde(default)]
    pub phase: WorldPhase,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub conditions: Conditions,
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

/// Condition type names used on `WorldInstance.status.conditions` (§3).
pub mod condition_types {
    pub const MODULES_RESOLVED: &str = "ModulesResolved";
    pub const BINDINGS_RESOLVED: &str = "BindingsResolved";
    pub const RUNTIME_READY: &str = "RuntimeReady";
}
