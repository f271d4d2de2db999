use palabre_api::ApiError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A page fetch for this thread selector is already outstanding.
    #[error("A page fetch for this thread is already in flight")]
    FetchInFlight,

    /// The session was closed before results could be applied; nothing was
    /// committed.
    #[error("Session closed before results could be applied")]
    Cancelled,

    /// Both the primary and the fallback source failed.
    #[error("Thread load failed: {0}")]
    ThreadLoad(#[from] ApiError),
}
