//! The five reconcilers (§4.2-§4.6). Each module owns one `Controller` loop
//! plus the pure helper functions its reconcile function calls into; [`run_all`]
//! starts every controller concurrently on the shared [`crate::context::State`].

pub mod capability_resolver;
pub mod runtime_orchestrator;
pub mod shard_autoscaler;
pub mod storage;
pub mod world_shard;

use kube::Client;

use crate::context::State;

/// Starts all five controllers and runs them to completion (i.e. forever,
/// barring a fatal watch error). Mirrors the one-`run()`-per-controller
/// convention from the retrieval pack's operator examples, fanned out with
/// `tokio::join!` rather than one `Controller` watching five kinds, since
/// each reconciler owns a distinct primary resource.
pub async fn run_all(client: Client, state: State) {
    tokio::join!(
        capability_resolver::run(client.clone(), &state),
        world_shard::run(client.clone(), &state),
        shard_autoscaler::run(client.clone(), &state),
        runtime_orchestrator::run(client.clone(), &state),
        storage::run(client, &state),
    );
}
