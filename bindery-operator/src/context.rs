//! Shared reconciler context (§A.1), grounded in the `Context`/`State` split
//! used by `libs-operator-src-controller.rs` in the retrieval pack: `State`
//! lives for the process lifetime and is handed to both the controller and
//! the admin server; `Context` is the per-`Controller::run` `Arc` every
//! reconcile function receives.

use std::sync::Arc;

use kube::Client;
use prometheus::Registry;

use crate::config::OperatorConfig;
use crate::metrics::ReconcileMetrics;

/// Injected into every reconcile/error_policy call.
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub metrics: Arc<ReconcileMetrics>,
}

/// Long-lived state shared between the five controllers and the admin
/// server.
#[derive(Clone)]
pub struct State {
    registry: Registry,
    metrics: Arc<ReconcileMetrics>,
    config: OperatorConfig,
}

impl State {
    pub fn new(config: OperatorConfig) -> Self {
        let registry = Registry::new();
        let metrics = Arc::new(ReconcileMetrics::new(&registry));
        State { registry, metrics, config }
    }

    pub fn to_context(&self, client: Client) -> Arc<Context> {
        Arc::new(Context {
            client,
            config: self.config.clone(),
            metrics: self.metrics.clone(),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The single namespace every controller should watch, or `None` to
    /// watch cluster-wide (§A.4 `BINDERY_WATCH_NAMESPACE`).
    pub fn watch_namespace(&self) -> Option<&str> {
        self.config.watch_namespace.as_deref()
    }

    /// Max concurrent reconciles per controller (§A.4 `BINDERY_CONCURRENCY`).
    pub fn concurrency(&self) -> u16 {
        self.config.concurrency
    }
}
