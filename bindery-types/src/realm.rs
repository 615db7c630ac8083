use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A shared context for multiple `WorldInstance`s (§3, glossary).
///
/// Root bindings for globally-scoped modules (`cluster`/`region`/`realm`
/// scope, after [`crate::Scope::normalize`]) are attached to the synthetic
/// world `global` rather than to any one `WorldInstance`; a `Realm` is what
/// groups the `WorldInstance`s that share those root bindings.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "bindery.dev",
    version = "v1alpha1",
    kind = "Realm",
    plural = "realms",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct RealmSpec {
    #[serde(default)]
    pub description: Option<String>,
}
