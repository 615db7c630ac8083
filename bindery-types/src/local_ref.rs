use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A reference to another object in the same namespace, by name.
///
/// Every cross-object pointer in the data model (`WorldInstance.bookletRef`,
/// `WorldShard.worldRef`, `ShardAutoscaler.worldRef`, ...) is namespace-local
/// (§1 non-goals: "no cross-namespace resolution"), so a bare name is enough.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LocalRef {
    pub name: String,
}

impl LocalRef {
    pub fn new(name: impl Into<String>) -> Self {
        LocalRef { name: name.into() }
    }
}

impl From<&str> for LocalRef {
    fn from(name: &str) -> Self {
        LocalRef::new(name)
    }
}
