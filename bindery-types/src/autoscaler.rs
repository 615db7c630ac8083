use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::local_ref::LocalRef;

/// The resource tracked by a `ShardAutoscaler` metric entry (§4.4).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResourceMetricName {
    Cpu,
    Memory,
}

/// One `Resource` metric entry with a target utilization percentage (§4.4
/// step 3).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MetricSpec {
    pub resource_name: ResourceMetricName,
    pub target_utilization_percentage: u32,
}

/// A closed control loop over `WorldInstance.spec.shardCount` (§4.4).
#[derive(CustomResource, Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "ShardAutoscaler",
    plural = "shardautoscalers",
    shortname = "sas",
    namespaced,
    status = "ShardAutoscalerStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ShardAutoscalerSpec {
    pub world_ref: LocalRef,
    pub min_shards: u32,
    pub max_shards: u32,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ShardAutoscalerStatus {
    #[serde(default)]
    pub current_shards: u32,
    #[serde(default)]
    pub desired_shards: u32,
    #[serde(default)]
    pub last_scale_time: Option<DateTime<Utc>>,
}
