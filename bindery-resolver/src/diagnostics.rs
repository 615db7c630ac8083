//! Why a requirement didn't resolve (§4.1 step 2c/2d, §7 "configuration
//! errors").

use bindery_types::{DependencyMode, Scope};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UnresolvedReason {
    /// `versionConstraint` failed to parse (§4.1 step 2a).
    InvalidVersionConstraint,
    /// No provider satisfied capability id, scope, multiplicity, and
    /// constraint (§4.1 step 2c).
    NoCompatibleProvider,
}

impl UnresolvedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnresolvedReason::InvalidVersionConstraint => "invalid versionConstraint",
            UnresolvedReason::NoCompatibleProvider => "no compatible provider found",
        }
    }
}

/// One requirement that could not be satisfied.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UnresolvedEntry {
    pub consumer: String,
    pub capability_id: String,
    pub scope: Scope,
    pub dependency_mode: DependencyMode,
    pub reason: UnresolvedReason,
    pub detail: String,
}

/// Everything the resolver couldn't satisfy, split by severity (§7): a
/// required gap blocks the world (`ModulesResolved=False`), an optional gap
/// is recorded but non-fatal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    pub unresolved: Vec<UnresolvedEntry>,
}

impl Diagnostics {
    pub fn push(&mut self, entry: UnresolvedEntry) {
        self.unresolved.push(entry);
    }

    pub fn required(&self) -> impl Iterator<Item = &UnresolvedEntry> {
        self.unresolved
            .iter()
            .filter(|e| matches!(e.dependency_mode, DependencyMode::Required))
    }

    pub fn optional(&self) -> impl Iterator<Item = &UnresolvedEntry> {
        self.unresolved
            .iter()
            .filter(|e| matches!(e.dependency_mode, DependencyMode::Optional))
    }

    pub fn has_required_gap(&self) -> bool {
        self.required().next().is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.unresolved.is_empty()
    }
}
