//! Canonical object-name derivation (§3, §4.5, §6).
//!
//! The reference implementation the spec was distilled from has two
//! name-derivation functions — one general, one for shards — that lowercase
//! and strip differently (§9 Open Questions). We pick one: join the parts
//! with `-`, lowercase, replace every byte outside `[a-z0-9-]` with `-`,
//! collapse repeats, trim the edges, then truncate-with-hash if the object
//! store's 253-character identifier limit is exceeded. Both
//! `stable_binding_name` (§3) and `stable_runtime_name` (§4.5) are thin
//! callers of [`stable_name`] with their own ordered part list.

use sha1::{Digest, Sha1};

/// The object store's identifier length limit (DNS subdomain, §6).
pub const MAX_NAME_LEN: usize = 253;

/// Builds a DNS-subdomain-safe name from `parts`, truncating with an 8-hex
/// SHA-1 suffix of the *untruncated* joined string if it would otherwise
/// exceed [`MAX_NAME_LEN`] (§6 "Object-name invariant").
pub fn stable_name(parts: &[&str]) -> String {
    let joined = parts.join("-");
    let sanitized = sanitize(&joined);
    truncate_with_hash(&sanitized, &joined)
}

fn sanitize(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_dash = false;
    for ch in s.chars() {
        let lower = ch.to_ascii_lowercase();
        let mapped = if lower.is_ascii_alphanumeric() { lower } else { '-' };
        if mapped == '-' {
            if last_was_dash {
                continue;
            }
            last_was_dash = true;
        } else {
            last_was_dash = false;
        }
        out.push(mapped);
    }
    out.trim_matches('-').to_string()
}

fn truncate_with_hash(sanitized: &str, original_for_hash: &str) -> String {
    if sanitized.len() <= MAX_NAME_LEN {
        return sanitized.to_string();
    }
    let suffix = hash_suffix(original_for_hash);
    // "-" + 8 hex chars
    let keep = MAX_NAME_LEN - 1 - suffix.len();
    let mut truncated: String = sanitized.chars().take(keep).collect();
    truncated = truncated.trim_end_matches('-').to_string();
    format!("{truncated}-{suffix}")
}

/// The 8-hex-digit suffix derived from the SHA-1 of `s` (§3, §6).
pub fn hash_suffix(s: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(s.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(4).map(|b| format!("{b:02x}")).collect()
}

/// `CapabilityBinding` stable name (§3):
/// `cb-{world}-{consumer}-{capabilityId}-{scope}-{multiplicity}[-shard-{id}]`.
pub fn stable_binding_name(
    world: &str,
    consumer: &str,
    capability_id: &str,
    scope: &str,
    multiplicity: &str,
    shard_id: Option<u32>,
) -> String {
    let shard_part;
    let mut parts = vec!["cb", world, consumer, capability_id, scope, multiplicity];
    if let Some(id) = shard_id {
        shard_part = format!("shard-{id}");
        parts.push(&shard_part);
    }
    stable_name(&parts)
}

/// `WorldShard` stable name (§3): `ws-{world}-{4-digit shardId}`.
pub fn stable_shard_name(world: &str, shard_id: u32) -> String {
    format!("ws-{world}-{shard_id:04}")
}

/// Runtime (`Deployment`/`Service`) stable name (§4.5):
/// `rt-{world|global}[-shard-{id}]-{module or "coloc-"+group}`.
pub fn stable_runtime_name(
    world_or_global: &str,
    shard_id: Option<u32>,
    module_or_group: &str,
    is_colocation_group: bool,
) -> String {
    let shard_part;
    let module_part = if is_colocation_group {
        format!("coloc-{module_or_group}")
    } else {
        module_or_group.to_string()
    };
    let mut parts = vec!["rt", world_or_global];
    if let Some(id) = shard_id {
        shard_part = format!("shard-{id}");
        parts.push(&shard_part);
    }
    parts.push(&module_part);
    stable_name(&parts)
}

/// `WorldStorageClaim` PVC name (§4.6): `pvc-<world>-<shardName>-<tier>`.
pub fn stable_pvc_name(world: &str, shard_name: &str, tier: &str) -> String {
    stable_name(&["pvc", world, shard_name, tier])
}

/// Uppercases a capability id with `.` replaced by `_`, for
/// `PLATFORM_CAPABILITY_<CAP_ID>_*` env var names (§4.5, §6).
pub fn capability_env_fragment(capability_id: &str) -> String {
    capability_id.to_uppercase().replace('.', "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_and_lowercases() {
        assert_eq!(stable_name(&["Physics.Engine", "World 1"]), "physics-engine-world-1");
    }

    #[test]
    fn short_names_are_stable_and_collision_free_for_distinct_tuples() {
        let a = stable_binding_name("w1", "game", "physics.engine", "world", "1", None);
        let b = stable_binding_name("w1", "game", "physics.engine", "world-shard", "1", Some(0));
        assert_ne!(a, b);
        assert_eq!(a, stable_binding_name("w1", "game", "physics.engine", "world", "1", None));
    }

    #[test]
    fn truncates_long_names_with_hash_suffix() {
        let long_consumer = "c".repeat(400);
        let name = stable_binding_name("w1", &long_consumer, "physics.engine", "world", "1", None);
        assert!(name.len() <= MAX_NAME_LEN);
        assert!(name.len() > MAX_NAME_LEN - 10);
        // same inputs -> same truncated name
        let name2 = stable_binding_name("w1", &long_consumer, "physics.engine", "world", "1", None);
        assert_eq!(name, name2);
    }

    #[test]
    fn different_long_inputs_do_not_collide() {
        let a = stable_binding_name("w1", &"c".repeat(400), "physics.engine", "world", "1", None);
        let b = stable_binding_name("w1", &"c".repeat(400) , "physics.engine2", "world", "1", None);
        assert_ne!(a, b);
    }

    #[test]
    fn shard_name_is_four_digits() {
        assert_eq!(stable_shard_name("w1", 0), "ws-w1-0000");
        assert_eq!(stable_shard_name("w1", 42), "ws-w1-0042");
    }

    #[test]
    fn capability_env_fragment_maps_dots_to_underscores() {
        assert_eq!(capability_env_fragment("physics.engine"), "PHYSICS_ENGINE");
    }
}
