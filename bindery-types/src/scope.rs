use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The granularity at which a capability is resolved (§3, glossary).
///
/// `Region` and `Session` are declared but not fully exercised by the spec
/// (§9 Open Questions); [`Scope::normalize`] folds them onto `Realm` and
/// `World` respectively everywhere scope is compared, so no other call site
/// needs to remember the equivalence.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Scope {
    #[default]
    Cluster,
    Region,
    Realm,
    World,
    WorldShard,
    Session,
}

impl Scope {
    /// Folds `Region` onto `Realm` and `Session` onto `World` (§9).
    pub fn normalize(self) -> Scope {
        match self {
            Scope::Region => Scope::Realm,
            Scope::Session => Scope::World,
            other => other,
        }
    }

    /// True for scopes resolved once per world rather than once per cluster
    /// (i.e. everything except `Cluster`/`Region`/`Realm` after normalizing).
    pub fn is_world_scoped(self) -> bool {
        matches!(self.normalize(), Scope::World | Scope::WorldShard)
    }

    pub fn is_global(self) -> bool {
        !self.is_world_scoped()
    }

    /// The label/name fragment for this scope (lowercase kebab-case, as
    /// serialized: `world-shard`, not `worldshard`).
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Cluster => "cluster",
            Scope::Region => "region",
            Scope::Realm => "realm",
            Scope::World => "world",
            Scope::WorldShard => "world-shard",
            Scope::Session => "session",
        }
    }
}

/// Whether a capability binding is one-to-one or one-to-many (glossary).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Multiplicity {
    #[default]
    One,
    Many,
}

impl Multiplicity {
    pub fn as_str(self) -> &'static str {
        match self {
            Multiplicity::One => "1",
            Multiplicity::Many => "many",
        }
    }

    /// The compatibility table from §4.1: `1` requires `1` or `many`; `many`
    /// requires only `many`.
    pub fn compatible_with(self, provided: Multiplicity) -> bool {
        match self {
            Multiplicity::One => true,
            Multiplicity::Many => matches!(provided, Multiplicity::Many),
        }
    }
}

/// Whether an unmet requirement is fatal to the world (§4.1, §4.2).
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DependencyMode {
    #[default]
    Required,
    Optional,
}

/// `scaling.statefulness` (§3); informational only at this point in the
/// pipeline, but preserved since `RuntimeOrchestrator` consults it indirectly
/// via colocation strategy and readiness gating.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum Statefulness {
    #[default]
    Stateless,
    Stateful,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_and_session_normalize() {
        assert_eq!(Scope::Region.normalize(), Scope::Realm);
        assert_eq!(Scope::Session.normalize(), Scope::World);
        assert_eq!(Scope::World.normalize(), Scope::World);
    }

    #[test]
    fn multiplicity_table() {
        assert!(Multiplicity::One.compatible_with(Multiplicity::One));
        assert!(Multiplicity::One.compatible_with(Multiplicity::Many));
        assert!(!Multiplicity::Many.compatible_with(Multiplicity::One));
        assert!(Multiplicity::Many.compatible_with(Multiplicity::Many));
    }
}
