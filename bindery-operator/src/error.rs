//! Error classification (§7).
//!
//! The spec draws three lines, not one:
//! - **Store errors** (conflict, not-found-on-update, transport) are
//!   returned from the reconcile function so `kube::runtime::Controller`'s
//!   built-in backoff handles the retry (`error_policy` below).
//! - **Configuration errors** (a malformed annotation, an unparseable
//!   version constraint) are never returned — they're written onto the
//!   object's own `status.conditions` and the reconcile completes with a
//!   normal requeue, since retrying without a manifest edit cannot help.
//! - **Transient dependency errors** (a referenced `Booklet` or
//!   `WorldInstance` doesn't exist yet) ask for an explicit, shorter
//!   requeue rather than the exponential backoff store errors get, since
//!   the missing object showing up is expected, ordinary ordering, not a
//!   fault.
//!
//! Only the first kind is represented as `Err` here; the other two are
//! normal `Ok(Action)` returns from a reconciler after it has recorded a
//! condition, by design — see each reconciler module.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    #[error("{0} is missing a namespace")]
    MissingNamespace(String),

    #[error("{0}")]
    Store(String),

    #[error(transparent)]
    Types(#[from] bindery_types::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
