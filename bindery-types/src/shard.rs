use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::local_ref::LocalRef;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum ShardPhase {
    #[default]
    Pending,
    Ready,
}

/// One of `shardCount` independent partitions of a `WorldInstance` (§3).
///
/// Children of `WorldInstance`; the invariant the `WorldShard` reconciler
/// (§4.3) maintains is that the set of live shards for a world is always
/// exactly `{0..shardCount-1}`.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "WorldShard",
    plural = "worldshards",
    shortname = "wshard",
    namespaced,
    status = "WorldShardStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorldShardSpec {
    pub world_ref: LocalRef,
    pub shard_id: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorldShardStatus {
    #[serde(default)]
    pub phase: ShardPhase,
}
