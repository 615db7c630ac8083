//! Stable label/annotation surface (§6).
//!
//! The spec namespaces every key under `platform/...` but explicitly asks
//! implementers to "namespace the prefix per deployment". We read the prefix
//! once from `BINDERY_LABEL_PREFIX` (default `platform`) the same way
//! `shipcat_cli::init()` reads `SHIPCAT_MANIFEST_DIR` — an env var consulted
//! at startup, never again. Reconcilers should go through [`Labels`] rather
//! than formatting strings themselves so a single env var controls every key
//! this operator writes or selects on.

use std::collections::BTreeMap;
use std::sync::OnceLock;

const DEFAULT_PREFIX: &str = "platform";

fn prefix() -> &'static str {
    static PREFIX: OnceLock<String> = OnceLock::new();
    PREFIX.get_or_init(|| {
        std::env::var("BINDERY_LABEL_PREFIX").unwrap_or_else(|_| DEFAULT_PREFIX.to_string())
    })
}

macro_rules! key_fn {
    ($fn_name:ident, $suffix:literal) => {
        pub fn $fn_name() -> String {
            format!("{}/{}", prefix(), $suffix)
        }
    };
}

key_fn!(managed_by, "managed-by");
key_fn!(world, "world");
key_fn!(game, "game");
key_fn!(shard, "shard");
key_fn!(module, "module");
key_fn!(coloc_group, "coloc-group");

/// `platform/managed-by` values identifying which reconciler owns an object.
pub mod managed_by_values {
    pub const CAPABILITY_RESOLVER: &str = "capabilityresolver";
    pub const RUNTIME_ORCHESTRATOR: &str = "runtimeorchestrator";
}

/// Annotation keys read off `ModuleManifest` (§6).
pub mod annotations {
    use super::prefix;

    macro_rules! annotation_fn {
        ($fn_name:ident, $suffix:literal) => {
            pub fn $fn_name() -> String {
                format!("{}/{}", prefix(), $suffix)
            }
        };
    }

    annotation_fn!(runtime_image, "runtime-image");
    annotation_fn!(runtime_port, "runtime-port");
    annotation_fn!(storage_tier, "storage-tier");
    annotation_fn!(storage_size, "storage-size");
    annotation_fn!(storage_scope, "storage-scope");
    annotation_fn!(storage_access_modes, "storage-access-modes");
    annotation_fn!(storage_mount_path, "storage-mount-path");
    annotation_fn!(termination_grace_period, "termination-grace-period");
    annotation_fn!(pre_stop_command, "pre-stop-command");
}

/// Builds the label set for a `CapabilityBinding` managed by the
/// `CapabilityResolver` reconciler (§3: `managed-by`, `world`, `game`, and
/// `shard=<N>` for shard-scoped bindings).
pub fn binding_labels(world_name: &str, game: &str, shard_id: Option<u32>) -> BTreeMap<String, String> {
    let mut m = BTreeMap::new();
    m.insert(managed_by(), managed_by_values::CAPABILITY_RESOLVER.to_string());
    m.insert(world(), world_name.to_string());
    m.insert(self::game(), game.to_string());
    if let Some(id) = shard_id {
        m.insert(shard(), id.to_string());
    }
    m
}

/// Label selector string `k=v,k=v,...` used to `List` by the above labels.
pub fn selector(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}
