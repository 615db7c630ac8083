//! The "reserved constraint library" wrapper (§4.1, §9).
//!
//! The spec deliberately keeps semver out of scope: "do not re-implement
//! semver; delegate to a well-tested constraint library ... then build a
//! thin wrapper to isolate API surface and allow substitution" (§9). This
//! module is that wrapper. Everything outside it talks in terms of
//! [`Version`]/[`VersionReq`] from the `semver` crate; if Bindery ever needs
//! to substitute a different constraint library, this is the only file that
//! changes.

use semver::{Version, VersionReq};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("invalid version {0:?}: {1}")]
    InvalidVersion(String, semver::Error),
    #[error("invalid version constraint {0:?}: {1}")]
    InvalidConstraint(String, semver::Error),
}

/// Parses a semver version string. Used when building the provider set
/// (§4.1 step 1) — callers silently drop providers whose version fails to
/// parse, per spec.
pub fn parse_version(raw: &str) -> Result<Version, VersionError> {
    Version::parse(raw.trim()).map_err(|e| VersionError::InvalidVersion(raw.to_string(), e))
}

/// Parses a version constraint string (§4.1 step 2a). Accepts the syntaxes
/// the spec requires: `=X`, `>=X <Y`, `^X`, `~X`, `*`. An empty string
/// defaults to `*`.
///
/// `semver::VersionReq` already implements caret (the default, bare `X`),
/// tilde, and exact (`=X`) comparators per SemVer 2.0.0 precedence, and a
/// bare `1.2.3` *is* `^1.2.3`, including the `^0.y.z` special case the spec
/// calls out. The one gap is that the spec's multi-comparator syntax
/// (`>=X <Y`, space-separated) differs from `semver`'s own comma-separated
/// syntax (`>=X, <Y`) — we normalize whitespace-separated comparators into
/// comma-separated ones before delegating.
pub fn parse_constraint(raw: &str) -> Result<VersionReq, VersionError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(VersionReq::STAR);
    }
    let normalized = normalize_comparators(trimmed);
    VersionReq::parse(&normalized).map_err(|e| VersionError::InvalidConstraint(raw.to_string(), e))
}

fn normalize_comparators(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(", ")
}

pub fn satisfies(version: &Version, constraint: &VersionReq) -> bool {
    constraint.matches(version)
}

/// Total order implementing SemVer precedence (`semver::Version` already
/// orders pre-release tags per SemVer 2.0.0).
pub fn compare(a: &Version, b: &Version) -> std::cmp::Ordering {
    a.cmp(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_is_the_default_comparator() {
        let req = parse_constraint("^1.2.0").unwrap();
        assert!(satisfies(&parse_version("1.9.9").unwrap(), &req));
        assert!(!satisfies(&parse_version("2.0.0").unwrap(), &req));
    }

    #[test]
    fn caret_zero_minor_pins_minor() {
        let req = parse_constraint("^0.2.3").unwrap();
        assert!(satisfies(&parse_version("0.2.9").unwrap(), &req));
        assert!(!satisfies(&parse_version("0.3.0").unwrap(), &req));
    }

    #[test]
    fn range_syntax_with_space_separated_comparators() {
        let req = parse_constraint(">=1.2.0 <2.0.0").unwrap();
        assert!(satisfies(&parse_version("1.9.0").unwrap(), &req));
        assert!(!satisfies(&parse_version("2.0.0").unwrap(), &req));
        assert!(!satisfies(&parse_version("1.1.9").unwrap(), &req));
    }

    #[test]
    fn exact_and_wildcard() {
        let exact = parse_constraint("=1.0.0").unwrap();
        assert!(satisfies(&parse_version("1.0.0").unwrap(), &exact));
        assert!(!satisfies(&parse_version("1.0.1").unwrap(), &exact));

        let star = parse_constraint("*").unwrap();
        assert!(satisfies(&parse_version("0.0.1").unwrap(), &star));

        let blank = parse_constraint("").unwrap();
        assert!(satisfies(&parse_version("99.0.0").unwrap(), &blank));
    }

    #[test]
    fn invalid_constraint_is_an_error() {
        assert!(parse_constraint("not a constraint").is_err());
    }

    #[test]
    fn prerelease_precedence_follows_semver() {
        let a = parse_version("1.0.0-alpha").unwrap();
        let b = parse_version("1.0.0-beta").unwrap();
        let c = parse_version("1.0.0").unwrap();
        assert_eq!(compare(&a, &b), std::cmp::Ordering::Less);
        assert_eq!(compare(&b, &c), std::cmp::Ordering::Less);
    }
}
