//! The output of resolution (§4.1 steps 2-4): a flat, canonically ordered
//! list of bindings plus the unresolved requirements that didn't make it in.

use bindery_types::{Multiplicity, Scope};
use serde::{Deserialize, Serialize};

/// One resolved (consumer, capability, provider) triple.
///
/// For an ordinary binding, `consumer` is the requiring module's `id`. For a
/// root binding (§4.1 step 3) `consumer` is the world's own name and
/// `capability_id` is [`bindery_types::ROOT_CAPABILITY_ID`] — the spec's
/// wording ("consumer = the world's name") is taken literally rather than
/// modeled as a distinct variant, since every other field on a root binding
/// behaves like an ordinary one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub consumer: String,
    pub capability_id: String,
    pub scope: Scope,
    pub multiplicity: Multiplicity,
    pub provider: String,
    pub provider_version: String,
    pub is_root: bool,
}

impl PlanEntry {
    fn sort_key(&self) -> (&str, &str, Scope, &str, &str) {
        (
            &self.consumer,
            &self.capability_id,
            self.scope,
            &self.provider,
            &self.provider_version,
        )
    }
}

impl PartialOrd for PlanEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PlanEntry {
    /// Canonical ordering (§4.1 step 4): `(consumer, capabilityId, scope,
    /// provider, providerVersion)`.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

/// The complete, canonically sorted output of one resolution pass.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sorts `entries` into the canonical order from scratch. Call after any
    /// bulk mutation; [`crate::resolve::DefaultResolver`] always returns an
    /// already-sorted plan.
    pub fn canonicalize(&mut self) {
        self.entries.sort();
    }

    pub fn bindings_for_consumer<'a>(&'a self, consumer: &'a str) -> impl Iterator<Item = &'a PlanEntry> {
        self.entries.iter().filter(move |e| e.consumer == consumer)
    }

    pub fn providers_of<'a>(&'a self, capability_id: &'a str) -> impl Iterator<Item = &'a PlanEntry> {
        self.entries.iter().filter(move |e| e.capability_id == capability_id)
    }
}
