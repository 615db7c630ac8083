//! The resolution algorithm itself (§4.1).
//!
//! `DefaultResolver` is a pure value type: no cluster access, no clock, no
//! randomness. Given the same module set and world name it always returns
//! the same [`Plan`] and [`Diagnostics`] (§8 "Resolution is deterministic").
//! `CapabilityResolver` (in `bindery-operator`) is the thin, I/O-performing
//! wrapper that fetches `ModuleManifest`s from the Store and hands them to
//! this.

use std::collections::HashSet;

use bindery_types::{DependencyMode, ModuleManifest, Multiplicity, Scope, ROOT_CAPABILITY_ID};
use semver::Version;

use crate::diagnostics::{Diagnostics, UnresolvedEntry, UnresolvedReason};
use crate::plan::{Plan, PlanEntry};
use crate::version::{parse_constraint, parse_version, satisfies};

/// Output of one resolution pass.
#[derive(Clone, Debug, Default)]
pub struct Resolution {
    pub plan: Plan,
    pub diagnostics: Diagnostics,
}

/// Implemented by anything that turns a module set into a [`Resolution`].
/// The trait boundary exists so `bindery-operator` can mock resolution in
/// reconciler tests without constructing real `ModuleManifest`s end to end.
pub trait Resolve {
    fn resolve(&self, world_name: &str, modules: &[ModuleManifest]) -> Resolution;
}

/// The only implementation the spec describes (§4.1 steps 1-4).
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultResolver;

struct Candidate<'a> {
    module_id: &'a str,
    version: Version,
    version_raw: &'a str,
    scope: Scope,
    multiplicity: Multiplicity,
}

impl Resolve for DefaultResolver {
    fn resolve(&self, world_name: &str, modules: &[ModuleManifest]) -> Resolution {
        let mut diagnostics = Diagnostics::default();

        // Step 1: the provider set. Unparseable versions are silently
        // dropped rather than diagnosed — the spec treats this as the
        // provider simply not existing.
        let mut candidates_by_capability: std::collections::HashMap<&str, Vec<Candidate>> =
            std::collections::HashMap::new();
        for module in modules {
            for provide in &module.spec.provides {
                if let Ok(version) = parse_version(&provide.version) {
                    candidates_by_capability
                        .entry(provide.capability_id.as_str())
                        .or_default()
                        .push(Candidate {
                            module_id: module.spec.id.as_str(),
                            version,
                            version_raw: provide.version.as_str(),
                            scope: provide.scope.normalize(),
                            multiplicity: provide.multiplicity,
                        });
                }
            }
        }

        let mut entries = Vec::new();
        let mut emitted_providers: HashSet<&str> = HashSet::new();

        // Step 2: resolve every requirement.
        for module in modules {
            for req in &module.spec.requires {
                let raw_constraint = req.version_constraint.as_deref().unwrap_or("");
                let constraint = match parse_constraint(raw_constraint) {
                    Ok(c) => c,
                    Err(e) => {
                        diagnostics.push(UnresolvedEntry {
                            consumer: module.spec.id.clone(),
                            capability_id: req.capability_id.clone(),
                            scope: req.scope.normalize(),
                            dependency_mode: req.dependency_mode,
                            reason: UnresolvedReason::InvalidVersionConstraint,
                            detail: e.to_string(),
                        });
                        continue;
                    }
                };

                let req_scope = req.scope.normalize();
                let mut matches: Vec<&Candidate> = candidates_by_capability
                    .get(req.capability_id.as_str())
                    .into_iter()
                    .flatten()
                    .filter(|c| {
                        c.scope == req_scope
                            && req.multiplicity.compatible_with(c.multiplicity)
                            && satisfies(&c.version, &constraint)
                    })
                    .collect();

                if matches.is_empty() {
                    diagnostics.push(UnresolvedEntry {
                        consumer: module.spec.id.clone(),
                        capability_id: req.capability_id.clone(),
                        scope: req_scope,
                        dependency_mode: req.dependency_mode,
                        reason: UnresolvedReason::NoCompatibleProvider,
                        detail: format!(
                            "no provider satisfies capabilityId={} scope={:?} constraint={:?}",
                            req.capability_id, req_scope, raw_constraint
                        ),
                    });
                    continue;
                }

                // Step 2d: highest version wins, ties broken by module name
                // ascending (§4.1).
                matches.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.module_id.cmp(b.module_id)));

                let chosen: Vec<&Candidate> = match req.multiplicity {
                    Multiplicity::Many => matches,
                    Multiplicity::One => matches.into_iter().take(1).collect(),
                };

                for candidate in chosen {
                    emitted_providers.insert(candidate.module_id);
                    entries.push(PlanEntry {
                        consumer: module.spec.id.clone(),
                        capability_id: req.capability_id.clone(),
                        scope: req_scope,
                        multiplicity: req.multiplicity,
                        provider: candidate.module_id.to_string(),
                        provider_version: candidate.version_raw.to_string(),
                        is_root: false,
                    });
                }
            }
        }

        // Step 3: synthetic root bindings for modules nothing resolved to.
        for module in modules {
            if emitted_providers.contains(module.spec.id.as_str()) {
                continue;
            }
            let scope = module
                .spec
                .scaling
                .as_ref()
                .and_then(|s| s.default_scope)
                .unwrap_or(Scope::World)
                .normalize();
            entries.push(PlanEntry {
                consumer: world_name.to_string(),
                capability_id: ROOT_CAPABILITY_ID.to_string(),
                scope,
                multiplicity: Multiplicity::One,
                provider: module.spec.id.clone(),
                provider_version: module.spec.version.clone().unwrap_or_default(),
                is_root: true,
            });
        }

        let mut plan = Plan { entries };
        // Step 4: canonical order.
        plan.canonicalize();

        Resolution { plan, diagnostics }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_types::{
        CapabilityProvide, CapabilityRequire, ModuleManifestSpec, ModuleScaling,
    };

    fn module(id: &str, spec: ModuleManifestSpec) -> ModuleManifest {
        ModuleManifest::new(id, spec)
    }

    fn provide(capability_id: &str, version: &str, scope: Scope) -> CapabilityProvide {
        CapabilityProvide {
            capability_id: capability_id.to_string(),
            version: version.to_string(),
            scope,
            multiplicity: Multiplicity::One,
        }
    }

    fn require(capability_id: &str, constraint: &str, scope: Scope) -> CapabilityRequire {
        CapabilityRequire {
            capability_id: capability_id.to_string(),
            version_constraint: Some(constraint.to_string()),
            scope,
            multiplicity: Multiplicity::One,
            dependency_mode: DependencyMode::Required,
        }
    }

    #[test]
    fn happy_path_world_scope_binds_to_sole_provider() {
        let physics = module(
            "physics-engine",
            ModuleManifestSpec {
                id: "physics-engine".into(),
                provides: vec![provide("physics.engine", "1.3.0", Scope::World)],
                ..Default::default()
            },
        );
        let game = module(
            "game-logic",
            ModuleManifestSpec {
                id: "game-logic".into(),
                requires: vec![require("physics.engine", "^1.2.0", Scope::World)],
                ..Default::default()
            },
        );

        let resolution = DefaultResolver.resolve("w1", &[physics, game]);
        assert!(resolution.diagnostics.is_empty());
        let binding = resolution
            .plan
            .entries
            .iter()
            .find(|e| e.consumer == "game-logic" && e.capability_id == "physics.engine")
            .expect("binding present");
        assert_eq!(binding.provider, "physics-engine");
        assert_eq!(binding.provider_version, "1.3.0");
    }

    #[test]
    fn highest_version_wins_tie_broken_by_module_name() {
        let a = module(
            "provider-a",
            ModuleManifestSpec {
                id: "provider-a".into(),
                provides: vec![provide("physics.engine", "2.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let b = module(
            "provider-b",
            ModuleManifestSpec {
                id: "provider-b".into(),
                provides: vec![provide("physics.engine", "2.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let older = module(
            "provider-c",
            ModuleManifestSpec {
                id: "provider-c".into(),
                provides: vec![provide("physics.engine", "1.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let consumer = module(
            "consumer",
            ModuleManifestSpec {
                id: "consumer".into(),
                requires: vec![require("physics.engine", "*", Scope::World)],
                ..Default::default()
            },
        );

        let resolution = DefaultResolver.resolve("w1", &[a, b, older, consumer]);
        let binding = resolution
            .plan
            .entries
            .iter()
            .find(|e| e.consumer == "consumer")
            .unwrap();
        // a and b tie at 2.0.0; "provider-a" sorts before "provider-b".
        assert_eq!(binding.provider, "provider-a");
    }

    #[test]
    fn many_multiplicity_binds_to_every_compatible_provider() {
        let a = module(
            "sink-a",
            ModuleManifestSpec {
                id: "sink-a".into(),
                provides: vec![CapabilityProvide {
                    capability_id: "telemetry.sink".into(),
                    version: "1.0.0".into(),
                    scope: Scope::World,
                    multiplicity: Multiplicity::Many,
                }],
                ..Default::default()
            },
        );
        let b = module(
            "sink-b",
            ModuleManifestSpec {
                id: "sink-b".into(),
                provides: vec![CapabilityProvide {
                    capability_id: "telemetry.sink".into(),
                    version: "1.1.0".into(),
                    scope: Scope::World,
                    multiplicity: Multiplicity::Many,
                }],
                ..Default::default()
            },
        );
        let emitter = module(
            "emitter",
            ModuleManifestSpec {
                id: "emitter".into(),
                requires: vec![CapabilityRequire {
                    capability_id: "telemetry.sink".into(),
                    version_constraint: Some("*".into()),
                    scope: Scope::World,
                    multiplicity: Multiplicity::Many,
                    dependency_mode: DependencyMode::Required,
                }],
                ..Default::default()
            },
        );

        let resolution = DefaultResolver.resolve("w1", &[a, b, emitter]);
        let providers: Vec<&str> = resolution
            .plan
            .bindings_for_consumer("emitter")
            .map(|e| e.provider.as_str())
            .collect();
        assert_eq!(providers.len(), 2);
        assert!(providers.contains(&"sink-a"));
        assert!(providers.contains(&"sink-b"));
    }

    #[test]
    fn many_consumer_cannot_bind_to_one_provider() {
        let one = module(
            "only-one",
            ModuleManifestSpec {
                id: "only-one".into(),
                provides: vec![provide("queue.broker", "1.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let consumer = module(
            "consumer",
            ModuleManifestSpec {
                id: "consumer".into(),
                requires: vec![CapabilityRequire {
                    capability_id: "queue.broker".into(),
                    version_constraint: Some("*".into()),
                    scope: Scope::World,
                    multiplicity: Multiplicity::Many,
                    dependency_mode: DependencyMode::Required,
                }],
                ..Default::default()
            },
        );

        let resolution = DefaultResolver.resolve("w1", &[one, consumer]);
        assert!(resolution.diagnostics.has_required_gap());
        assert_eq!(
            resolution.diagnostics.unresolved[0].reason,
            UnresolvedReason::NoCompatibleProvider
        );
    }

    #[test]
    fn unresolved_required_capability_is_diagnosed() {
        let consumer = module(
            "lonely",
            ModuleManifestSpec {
                id: "lonely".into(),
                requires: vec![require("missing.capability", "*", Scope::World)],
                ..Default::default()
            },
        );
        let resolution = DefaultResolver.resolve("w1", &[consumer]);
        assert!(resolution.diagnostics.has_required_gap());
    }

    #[test]
    fn invalid_constraint_is_diagnosed_not_panicked() {
        let consumer = module(
            "lonely",
            ModuleManifestSpec {
                id: "lonely".into(),
                requires: vec![require("missing.capability", "not-a-constraint", Scope::World)],
                ..Default::default()
            },
        );
        let resolution = DefaultResolver.resolve("w1", &[consumer]);
        assert_eq!(
            resolution.diagnostics.unresolved[0].reason,
            UnresolvedReason::InvalidVersionConstraint
        );
    }

    #[test]
    fn unrequired_module_gets_a_root_binding() {
        let standalone = module(
            "standalone",
            ModuleManifestSpec {
                id: "standalone".into(),
                scaling: Some(ModuleScaling {
                    default_scope: Some(Scope::WorldShard),
                    ..Default::default()
                }),
                ..Default::default()
            },
        );
        let resolution = DefaultResolver.resolve("my-world", &[standalone]);
        let root = resolution
            .plan
            .entries
            .iter()
            .find(|e| e.is_root)
            .expect("root binding present");
        assert_eq!(root.consumer, "my-world");
        assert_eq!(root.provider, "standalone");
        assert_eq!(root.capability_id, ROOT_CAPABILITY_ID);
        assert_eq!(root.scope, Scope::WorldShard);
    }

    #[test]
    fn a_module_that_is_a_provider_gets_no_root_binding() {
        let physics = module(
            "physics-engine",
            ModuleManifestSpec {
                id: "physics-engine".into(),
                provides: vec![provide("physics.engine", "1.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let game = module(
            "game-logic",
            ModuleManifestSpec {
                id: "game-logic".into(),
                requires: vec![require("physics.engine", "*", Scope::World)],
                ..Default::default()
            },
        );
        let resolution = DefaultResolver.resolve("w1", &[physics, game]);
        assert!(!resolution.plan.entries.iter().any(|e| e.is_root && e.provider == "physics-engine"));
    }

    #[test]
    fn resolution_is_deterministic_across_module_order_permutations() {
        let a = module(
            "provider-a",
            ModuleManifestSpec {
                id: "provider-a".into(),
                provides: vec![provide("physics.engine", "2.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let b = module(
            "provider-b",
            ModuleManifestSpec {
                id: "provider-b".into(),
                provides: vec![provide("physics.engine", "2.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let consumer = module(
            "consumer",
            ModuleManifestSpec {
                id: "consumer".into(),
                requires: vec![require("physics.engine", "*", Scope::World)],
                ..Default::default()
            },
        );

        let forward = DefaultResolver.resolve("w1", &[a.clone(), b.clone(), consumer.clone()]);
        let reversed = DefaultResolver.resolve("w1", &[consumer, b, a]);
        assert_eq!(forward.plan, reversed.plan);
    }

    #[test]
    fn every_module_appears_as_a_provider_in_the_final_plan() {
        let a = module(
            "physics-engine",
            ModuleManifestSpec {
                id: "physics-engine".into(),
                provides: vec![provide("physics.engine", "1.0.0", Scope::World)],
                ..Default::default()
            },
        );
        let b = module(
            "game-logic",
            ModuleManifestSpec {
                id: "game-logic".into(),
                requires: vec![require("physics.engine", "*", Scope::World)],
                ..Default::default()
            },
        );
        let resolution = DefaultResolver.resolve("w1", &[a, b]);
        let providers: HashSet<&str> = resolution
            .plan
            .entries
            .iter()
            .map(|e| e.provider.as_str())
            .collect();
        assert!(providers.contains("physics-engine"));
        assert!(providers.contains("game-logic"));
    }
}
