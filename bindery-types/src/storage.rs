use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::local_ref::LocalRef;

/// `WorldStorageClaim.spec.tier` (§3, §4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum StorageTier {
    Client,
    ServerLowLatency,
    ServerHighLatency,
}

impl StorageTier {
    pub fn parse(s: &str) -> StorageTier {
        match s {
            "client" | "Client" => StorageTier::Client,
            "server-high-latency" | "ServerHighLatency" => StorageTier::ServerHighLatency,
            _ => StorageTier::ServerLowLatency,
        }
    }

    pub fn is_client(self) -> bool {
        matches!(self, StorageTier::Client)
    }

    /// The env var this operator reads for this tier's default
    /// `storageClassName` when the claim doesn't specify one (§6
    /// "Operator configuration").
    pub fn default_storage_class_env_var(self) -> &'static str {
        match self {
            StorageTier::ServerHighLatency => "PLATFORM_STORAGECLASS_SERVER_HIGH_LATENCY",
            _ => "PLATFORM_STORAGECLASS_SERVER_LOW_LATENCY",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StorageTier::Client => "client",
            StorageTier::ServerLowLatency => "server-low-latency",
            StorageTier::ServerHighLatency => "server-high-latency",
        }
    }
}

/// A persistent-storage request declared via annotations on a
/// `ModuleManifest` (§3 "Storage annotations", §4.5 "Volumes").
#[derive(Clone, Debug)]
pub struct ModuleStorageRequest {
    pub tier: StorageTier,
    pub size: String,
    pub scope: String,
    pub access_modes: Vec<String>,
    pub mount_path: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum StorageClaimPhase {
    #[default]
    Pending,
    Bound,
    External,
    Error,
}

/// Maps to either a `PersistentVolumeClaim` (server tiers) or an external
/// URI (client tier) via the `StorageOrchestrator` collaborator (§4.6).
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "WorldStorageClaim",
    plural = "worldstorageclaims",
    shortname = "wsc",
    namespaced,
    status = "WorldStorageClaimStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct WorldStorageClaimSpec {
    pub scope: String,
    pub tier: StorageTier,
    pub world_ref: LocalRef,
    #[serde(default)]
    pub shard_ref: Option<LocalRef>,
    /// A Kubernetes quantity string, e.g. `1Gi` (§3).
    pub size: String,
    #[serde(default = "default_access_modes")]
    pub access_modes: Vec<String>,
    #[serde(default)]
    pub storage_class_name: Option<String>,
}

fn default_access_modes() -> Vec<String> {
    vec!["ReadWriteOnce".to_string()]
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorldStorageClaimStatus {
    #[serde(default)]
    pub phase: StorageClaimPhase,
    #[serde(default)]
    pub claim_name: Option<String>,
    #[serde(default)]
    pub external_uri: Option<String>,
}

impl Default for StorageTier {
    fn default() -> Self {
        StorageTier::ServerLowLatency
    }
}
