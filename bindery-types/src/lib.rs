#![allow(non_snake_case)]

//! Declarative Store object definitions for the Bindery game-platform
//! operator.
//!
//! Every type in this crate is a plain data definition: a `kube::CustomResource`
//! struct, a status struct, or a small value type shared across several of
//! them (scopes, multiplicities, conditions, label/annotation constants, name
//! derivation). None of it talks to a cluster — that is `bindery-operator`'s
//! job. Keeping this crate free of `kube::Client` usage means it can be
//! depended on by both the operator binary and the pure `bindery-resolver`
//! crate without pulling in any I/O.

pub type Result<T> = std::result::Result<T, Error>;

mod error;
pub use error::Error;

/// Stable label/annotation keys (§6) and the helpers that build them.
pub mod labels;

/// Canonical object-name derivation shared by the resolver and the runtime
/// orchestrator (§3, §4.5, §6, and the unified derivation from `SPEC_FULL.md`).
pub mod naming;

/// `Scope`, `Multiplicity`, `DependencyMode` and the other small enums shared
/// by every capability-bearing object.
pub mod scope;
pub use scope::{DependencyMode, Multiplicity, Scope, Statefulness};

/// `Condition` / `ConditionStatus` and the merge-on-transition helper.
pub mod condition;
pub use condition::{Condition, ConditionStatus, Conditions};

/// A namespaced reference to another object by name.
pub mod local_ref;
pub use local_ref::LocalRef;

pub mod module_manifest;
pub use module_manifest::{
    CapabilityProvide, CapabilityRequire, ModuleManifest, ModuleManifestSpec, ModuleRuntime,
    ModuleScaling, ModuleScheduling,
};

pub mod booklet;
pub use booklet::{Booklet, BookletSpec, ColocationGroup, ColocationStrategy, ModuleRef};

pub mod world;
pub use world::{WorldInstance, WorldInstanceSpec, WorldInstanceStatus, WorldPhase};

pub mod shard;
pub use shard::{ShardPhase, WorldShard, WorldShardSpec, WorldShardStatus};

pub mod binding;
pub use binding::{
    BindingPhase, CapabilityBinding, CapabilityBindingSpec, CapabilityBindingStatus, ConsumerRef,
    ProviderEndpoint, ProviderRef,
};

pub mod realm;
pub use realm::{Realm, RealmSpec};

pub mod storage;
pub use storage::{
    StorageClaimPhase, StorageTier, WorldStorageClaim, WorldStorageClaimSpec,
    WorldStorageClaimStatus,
};

pub mod autoscaler;
pub use autoscaler::{
    MetricSpec, ResourceMetricName, ShardAutoscaler, ShardAutoscalerSpec, ShardAutoscalerStatus,
};

/// The synthetic world name used for cluster/region/realm-scoped root
/// bindings (§3 "Realm").
pub const GLOBAL_WORLD: &str = "global";

/// The synthetic capability id emitted for every module that is not itself
/// required by anything else (§4.1 step 3, "Root binding" in the glossary).
pub const ROOT_CAPABILITY_ID: &str = "system.root";
