//! The `§7` error taxonomy: every reconcile path returns one of these four kinds so
//! the backoff wrapper (see [`crate::queue`]) can decide drop-vs-requeue without
//! inspecting error text.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// A kernel tool (`ipset`/`iptables`) returned non-zero. Requeued with
    /// exponential backoff.
    #[error("transient backend failure: {0}")]
    TransientBackendError(String),

    /// Tombstone decode failure, missing required field, or an empty cluster-unique
    /// key. Logged and dropped, never requeued.
    #[error("invalid object: {0}")]
    InvalidObject(String),

    /// Cached state disagrees with the observed object in a way that isn't a normal
    /// state transition (cached IP != observed IP, UID mismatch on update). Recovered
    /// by forcing the full add-then-delete path.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Unrecoverable failure during `init_chains`/`restore` at startup. Fatal after
    /// the retry budget in [`crate::bootstrap`] is exhausted.
    #[error("permanent backend failure: {0}")]
    PermanentBackendError(String),

    #[error("{0}: {1}")]
    KubeError(String, #[source] kube::Error),

    #[error(transparent)]
    Ipset(#[from] kubenp_ipset::Error),

    #[error(transparent)]
    RuleEngine(#[from] kubenp_ruleengine::Error),

    #[error(transparent)]
    Policy(#[from] kubenp_policy::Error),

    #[error(transparent)]
    Cache(#[from] kubenp_cache::Error),

    #[error(transparent)]
    K8sUtil(#[from] kubenp_k8s_util::Error),
}

impl Error {
    /// Whether this error should be requeued with backoff (§7). `InvalidObject`
    /// errors are dropped instead: retrying a malformed object can't converge.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Error::InvalidObject(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
