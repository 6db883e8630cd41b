use backend_api::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NucleusError {
    /// Tier string did not match the enumerated tier set. Callers fall back
    /// to the lowest-privilege permission set.
    #[error("unknown tier '{0}'")]
    UnknownTier(String),

    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),

    #[error("nucleus has been shut down")]
    Terminated,
}
