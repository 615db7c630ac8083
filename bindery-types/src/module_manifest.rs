use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Toleration};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::scope::{DependencyMode, Multiplicity, Scope, Statefulness};

/// A single capability a module provides (§3).
///
/// ```yaml
/// provides:
/// - capabilityId: physics.engine
///   version: 1.3.0
///   scope: world-shard
///   multiplicity: "1"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityProvide {
    pub capability_id: String,
    /// A semver version string (§4.1). Providers whose version fails to
    /// parse are silently dropped from the provider set.
    pub version: String,
    pub scope: Scope,
    #[serde(default)]
    pub multiplicity: Multiplicity,
}

/// A single capability requirement (§3).
///
/// ```yaml
/// requires:
/// - capabilityId: physics.engine
///   versionConstraint: "^1.2.0"
///   scope: world-shard
///   dependencyMode: required
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRequire {
    pub capability_id: String,
    /// Defaults to `*` if blank (§4.1 step 2a).
    #[serde(default)]
    pub version_constraint: Option<String>,
    pub scope: Scope,
    #[serde(default)]
    pub multiplicity: Multiplicity,
    #[serde(default)]
    pub dependency_mode: DependencyMode,
}

/// Container runtime parameters (§3). Optional — modules with no `runtime`
/// are not server-orchestrated (§4.5: "mark the binding
/// `RuntimeReady=True(NotServerOrchestrated)` and return").
///
/// ```yaml
/// runtime:
///   image: registry.example.com/physics-engine:1.3.0
///   port: 50051
///   command: ["/bin/physics-engine"]
///   env:
///     LOG_LEVEL: info
///   terminationGracePeriodSeconds: 30
///   preStopCommand: "/bin/drain.sh"
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRuntime {
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub termination_grace_period_seconds: Option<i64>,
    #[serde(default)]
    pub pre_stop_command: Option<String>,
}

/// Scheduling hints propagated verbatim onto the generated `Deployment`
/// (§4.5 "Scheduling").
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleScheduling {
    #[serde(default)]
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub priority_class_name: Option<String>,
}

/// `scaling.defaultScope`/`scaling.statefulness` (§3): the scope used for a
/// module's synthetic root binding when nothing requires it (§4.1 step 3).
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModuleScaling {
    #[serde(default)]
    pub default_scope: Option<Scope>,
    #[serde(default)]
    pub statefulness: Statefulness,
}

/// Identity, capability contracts, and runtime shape of one game module.
///
/// Externally authored and watched (§3): operators edit these by hand or
/// generate them from a build pipeline; Bindery only ever reads them.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "ModuleManifest",
    plural = "modulemanifests",
    shortname = "modmf",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ModuleManifestSpec {
    /// Module identity, e.g. `physics-engine`. Distinct from the capability
    /// ids it provides/requires.
    pub id: String,
    /// The module's own semver version (distinct from the versions it
    /// provides capabilities at, though they're commonly the same).
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub provides: Vec<CapabilityProvide>,
    #[serde(default)]
    pub requires: Vec<CapabilityRequire>,
    #[serde(default)]
    pub runtime: Option<ModuleRuntime>,
    #[serde(default)]
    pub scheduling: Option<ModuleScheduling>,
    #[serde(default)]
    pub scaling: Option<ModuleScaling>,
}

impl ModuleManifest {
    /// `runtime.image`, falling back to the legacy `platform/runtime-image`
    /// annotation (§4.5: "neither `runtime.image` nor a legacy
    /// runtime-image annotation").
    pub fn effective_image(&self) -> Option<String> {
        self.spec
            .runtime
            .as_ref()
            .and_then(|r| r.image.clone())
            .or_else(|| self.annotation(&crate::labels::annotations::runtime_image()))
    }

    /// `runtime.port`, falling back to the legacy annotation, falling back
    /// to `50051` (§4.5 "Service").
    pub fn effective_port(&self) -> u16 {
        self.spec
            .runtime
            .as_ref()
            .and_then(|r| r.port)
            .or_else(|| {
                self.annotation(&crate::labels::annotations::runtime_port())
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(50051)
    }

    pub fn has_runtime(&self) -> bool {
        self.effective_image().is_some()
    }

    pub fn termination_grace_period_seconds(&self) -> Option<i64> {
        self.spec
            .runtime
            .as_ref()
            .and_then(|r| r.termination_grace_period_seconds)
            .or_else(|| {
                self.annotation(&crate::labels::annotations::termination_grace_period())
                    .and_then(|v| v.parse().ok())
            })
    }

    pub fn pre_stop_command(&self) -> Option<String> {
        self.spec
            .runtime
            .as_ref()
            .and_then(|r| r.pre_stop_command.clone())
            .or_else(|| self.annotation(&crate::labels::annotations::pre_stop_command()))
    }

    /// Storage tier/size/scope/access-modes/mount-path declared via
    /// annotations (§3 "Storage annotations", §4.6). Returns `None` when no
    /// storage tier annotation is present.
    pub fn storage_request(&self) -> Option<crate::storage::ModuleStorageRequest> {
        let tier = self.annotation(&crate::labels::annotations::storage_tier())?;
        Some(crate::storage::ModuleStorageRequest {
            tier: crate::storage::StorageTier::parse(&tier),
            size: self
                .annotation(&crate::labels::annotations::storage_size())
                .unwrap_or_else(|| "1Gi".to_string()),
            scope: self
                .annotation(&crate::labels::annotations::storage_scope())
                .unwrap_or_else(|| "world".to_string()),
            access_modes: self
                .annotation(&crate::labels::annotations::storage_access_modes())
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_else(|| vec!["ReadWriteOnce".to_string()]),
            mount_path: self
                .annotation(&crate::labels::annotations::storage_mount_path())
                .unwrap_or_else(|| "/var/platform/state".to_string()),
        })
    }

    fn annotation(&self, key: &str) -> Option<String> {
        self.metadata.annotations.as_ref()?.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with_annotations(pairs: &[(&str, &str)]) -> ModuleManifest {
        let mut m = ModuleManifest::new("physics", ModuleManifestSpec::default());
        let mut annotations = std::collections::BTreeMap::new();
        for (k, v) in pairs {
            annotations.insert(k.to_string(), v.to_string());
        }
        m.metadata.annotations = Some(annotations);
        m
    }

    #[test]
    fn effective_image_falls_back_to_legacy_annotation() {
        let key = crate::labels::annotations::runtime_image();
        let m = manifest_with_annotations(&[(&key, "example/physics:1.0")]);
        assert_eq!(m.effective_image().as_deref(), Some("example/physics:1.0"));
    }

    #[test]
    fn effective_port_defaults_to_50051() {
        let m = ModuleManifest::new("physics", ModuleManifestSpec::default());
        assert_eq!(m.effective_port(), 50051);
    }

    #[test]
    fn no_runtime_image_means_no_runtime() {
        let m = ModuleManifest::new("physics", ModuleManifestSpec::default());
        assert!(!m.has_runtime());
    }
}
