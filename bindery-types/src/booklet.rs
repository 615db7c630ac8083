use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named `ModuleManifest` belonging to a `Booklet` (§3).
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ModuleRef {
    pub name: String,
}

/// Co-location strategy for a `ColocationGroup` (§3, §4.5).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum ColocationStrategy {
    /// Modules share one `Deployment`, one container per module (§4.5).
    Pod,
    /// Modules get a required pod-affinity term on a shared
    /// `coloc-group` label instead of sharing a pod (§4.5).
    Node,
}

/// A set of modules that should run together (§3).
///
/// ```yaml
/// colocation:
/// - modules: [physics, interaction]
///   strategy: Pod
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ColocationGroup {
    /// Group name, used in the `coloc-group` label and the synthetic
    /// `Deployment` name `rt-…-coloc-<group>` (§4.5).
    pub name: String,
    pub modules: Vec<String>,
    #[serde(default)]
    pub strategy: Option<ColocationStrategy>,
}

/// A named collection of `ModuleManifest`s composed into a game, plus any
/// co-location groups among them (§3).
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "Booklet",
    plural = "booklets",
    shortname = "bklt",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BookletSpec {
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub colocation: Vec<ColocationGroup>,
}

impl Booklet {
    /// The colocation group (if any) that `module` belongs to.
    pub fn colocation_group_for(&self, module: &str) -> Option<&ColocationGroup> {
        self.spec
            .colocation
            .iter()
            .find(|g| g.modules.iter().any(|m| m == module))
    }
}
