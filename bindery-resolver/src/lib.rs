//! Pure capability-resolution core (§4.1).
//!
//! Everything here is a plain function or value type: no `kube::Client`, no
//! clock, no randomness. `bindery-operator`'s `CapabilityResolver`
//! reconciler fetches `ModuleManifest`s from the Store, hands them to
//! [`DefaultResolver`], and writes the resulting [`plan::Plan`] out as
//! `CapabilityBinding` objects. Keeping the algorithm itself free of I/O is
//! what makes it exhaustively unit-testable without a cluster.

pub mod diagnostics;
pub mod plan;
pub mod resolve;
pub mod version;

pub use diagnostics::{Diagnostics, UnresolvedEntry, UnresolvedReason};
pub use plan::{Plan, PlanEntry};
pub use resolve::{DefaultResolver, Resolution, Resolve};
pub use version::VersionError;
