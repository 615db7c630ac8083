//! Operator configuration, read once from the environment at startup (§A.4,
//! §6 "Operator configuration").
//!
//! Mirrors the `shipcat_cli::init()` convention of reading everything the
//! process needs out of env vars exactly once and failing fast if a
//! required one is absent, rather than threading a config file or flags
//! through every call site.

use std::time::Duration;

use crate::error::Result;

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// `storageClassName` used for `server-low-latency` tier claims that
    /// don't specify one (§4.6).
    pub storageclass_server_low_latency: Option<String>,
    /// `storageClassName` used for `server-high-latency` tier claims (§4.6).
    pub storageclass_server_high_latency: Option<String>,
    /// Label/annotation key prefix, default `platform` (§6). Read lazily by
    /// `bindery_types::labels::prefix()` itself; kept here too so `crdgen`
    /// and `run` can log the effective value at startup.
    pub label_prefix: String,
    /// How long the `ShardAutoscaler` reconciler waits between scale
    /// decisions for one `WorldInstance` (§4.4's "closed control loop",
    /// tuned independently of the object's own requeue interval).
    pub autoscaler_poll_interval: Duration,
    /// Port the admin HTTP server binds (§A.6).
    pub admin_port: u16,
    /// Namespace every controller watches, or `None` to watch cluster-wide
    /// (§A.4 `BINDERY_WATCH_NAMESPACE`, empty/unset means all namespaces).
    pub watch_namespace: Option<String>,
    /// Max concurrent reconciles per controller (§A.4 `BINDERY_CONCURRENCY`).
    pub concurrency: u16,
}

const DEFAULT_AUTOSCALER_POLL_SECS: u64 = 30;
const DEFAULT_ADMIN_PORT: u16 = 8080;
const DEFAULT_CONCURRENCY: u16 = 1;

impl OperatorConfig {
    pub fn from_env() -> Result<Self> {
        let autoscaler_poll_interval = std::env::var("BINDERY_AUTOSCALER_POLL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_AUTOSCALER_POLL_SECS);

        let admin_port = std::env::var("BINDERY_ADMIN_PORT")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_ADMIN_PORT);

        let label_prefix = std::env::var("BINDERY_LABEL_PREFIX").unwrap_or_else(|_| "platform".to_string());

        let watch_namespace = std::env::var("BINDERY_WATCH_NAMESPACE").ok().filter(|v| !v.is_empty());

        let concurrency = std::env::var("BINDERY_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<u16>().ok())
            .unwrap_or(DEFAULT_CONCURRENCY);

        Ok(OperatorConfig {
            storageclass_server_low_latency: std::env::var("PLATFORM_STORAGECLASS_SERVER_LOW_LATENCY").ok(),
            storageclass_server_high_latency: std::env::var("PLATFORM_STORAGECLASS_SERVER_HIGH_LATENCY").ok(),
            label_prefix,
            autoscaler_poll_interval: Duration::from_secs(autoscaler_poll_interval),
            admin_port,
            watch_namespace,
            concurrency,
        })
    }

    /// The default `storageClassName` for `tier`, or `None` if the operator
    /// has no configured default and the claim must specify one itself
    /// (§4.6: unset + no claim-level override is a configuration error).
    pub fn default_storage_class_for(&self, tier: bindery_types::StorageTier) -> Option<&str> {
        if tier.is_client() {
            return None;
        }
        match tier.default_storage_class_env_var() {
            "PLATFORM_STORAGECLASS_SERVER_HIGH_LATENCY" => self.storageclass_server_high_latency.as_deref(),
            _ => self.storageclass_server_low_latency.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_tier_has_no_default_storage_class() {
        let cfg = OperatorConfig {
            storageclass_server_low_latency: Some("ssd".into()),
            storageclass_server_high_latency: Some("nvme".into()),
            label_prefix: "platform".into(),
            autoscaler_poll_interval: std::time::Duration::from_secs(30),
            admin_port: 8080,
            watch_namespace: None,
            concurrency: 1,
        };
        assert_eq!(cfg.default_storage_class_for(bindery_types::StorageTier::Client), None);
        assert_eq!(
            cfg.default_storage_class_for(bindery_types::StorageTier::ServerHighLatency),
            Some("nvme")
        );
        assert_eq!(
            cfg.default_storage_class_for(bindery_types::StorageTier::ServerLowLatency),
            Some("ssd")
        );
    }
}
