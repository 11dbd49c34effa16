//! # Error Types
//!
//! Error taxonomy for the reconciliation loop.
//!
//! Everything in here propagates to the controller's error policy, which
//! requeues the whole pass; the next pass re-derives what remains to be done
//! from the skip-if-unchanged and plan checks. The two deliberate exceptions
//! never reach this type: status-write conflicts are swallowed at the call
//! site (see [`is_conflict`]) and a missing certificate is a requeue, not an
//! error.

use thiserror::Error;

/// Errors surfaced by a reconciliation pass
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API failure (reads, finalizer updates, object apply)
    #[error("kubernetes api error: {0}")]
    Kube(#[from] kube::Error),

    /// Terraform subprocess failure (init, plan, apply, destroy, output)
    #[error("terraform {op} failed: {message}")]
    Terraform { op: &'static str, message: String },

    /// A named Terraform output was absent after apply
    #[error("terraform output `{0}` is missing")]
    MissingOutput(&'static str),

    /// Azure SQL failure while provisioning the database principal
    #[error("database error: {0}")]
    Database(#[from] tiberius::error::Error),

    /// Azure REST failure (token acquisition, Key Vault, Blob storage)
    #[error("azure request failed: {0}")]
    Azure(String),

    /// The AzureApp lacks the metadata needed to build an owner reference
    #[error("cannot build owner reference for `{0}`: missing uid")]
    OwnerReference(String),

    /// Workspace filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Spec or terraform output (de)serialization failure
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Whether a kube error is a resource-version conflict (HTTP 409).
///
/// Conflicts on status writes mean a concurrent writer already advanced the
/// observable state; the reconciler logs and carries on instead of retrying.
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}
