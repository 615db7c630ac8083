use thiserror::Error;

/// Errors produced while building or validating Declarative Store objects.
///
/// This crate never talks to a cluster, so every variant here is a pure data
/// problem: a malformed name, an annotation that doesn't parse, a quantity
/// string that isn't a quantity. Store-level failures (conflicts, not-found,
/// transport) belong to `bindery-operator::Error`, not here.
#[derive(Debug, Error)]
pub enum Error {
    #[error("'{0}' is not a valid DNS subdomain segment")]
    InvalidName(String),

    #[error("annotation {key:?} has an invalid value {value:?}: {reason}")]
    InvalidAnnotation {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown scope {0:?}")]
    UnknownScope(String),

    #[error("unknown multiplicity {0:?}")]
    UnknownMultiplicity(String),
}
