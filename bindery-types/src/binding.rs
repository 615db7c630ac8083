use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::local_ref::LocalRef;
use crate::scope::{Multiplicity, Scope};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum BindingPhase {
    #[default]
    Pending,
    Provisioning,
    Running,
    Error,
}

/// The consumer side of a binding (§3).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerRef {
    pub module_manifest_name: String,
    /// The original `requires[]` entry this binding satisfies, kept for
    /// diagnostics and idempotent re-derivation.
    #[serde(default)]
    pub requirement_hint: Option<String>,
}

/// The chosen provider side of a binding (§3, §4.1 step 2d).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRef {
    pub module_manifest_name: String,
    pub capability_version: String,
}

/// `status.provider.endpoint` (§3, §4.5 "Endpoint publication").
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProviderEndpoint {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
    pub port: u16,
}

/// The reified edge from a consumer module's requirement to a chosen
/// provider module, with its runtime endpoint published in status (§3,
/// glossary "Binding").
///
/// Produced and garbage-collected exclusively by the `CapabilityResolver`
/// reconciler (§4.2); its `status.provider.endpoint` is written by
/// `RuntimeOrchestrator` (§4.5).
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "CapabilityBinding",
    plural = "capabilitybindings",
    shortname = "cbind",
    namespaced,
    status = "CapabilityBindingStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityBindingSpec {
    pub capability_id: String,
    pub scope: Scope,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    /// `None` for cluster/region/realm-scoped root bindings, whose
    /// `worldRef` is the synthetic world `global` (§3 "Realm").
    #[serde(default)]
    pub world_ref: Option<LocalRef>,
    pub consumer: ConsumerRef,
    pub provider: ProviderRef,
    /// Present only for `world-shard`-scoped bindings (§3).
    #[serde(default)]
    pub shard_id: Option<u32>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityBindingStatus {
    #[serde(default)]
    pub phase: BindingPhase,
    #[serde(default)]
    pub provider: Option<ProviderEndpoint>,
    #[serde(default)]
    pub conditions: Conditions,
}

pub mod condition_types {
    pub const RUNTIME_READY: &str = "RuntimeReady";
}

impl CapabilityBinding {
    pub fn world_name(&self) -> &str {
        self.spec
            .world_ref
            .as_ref()
            .map(|r| r.name.as_str())
            .unwrap_or(crate::GLOBAL_WORLD)
    }

    pub fn endpoint_published(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.provider.is_some())
            .unwrap_or(false)
    }
}
