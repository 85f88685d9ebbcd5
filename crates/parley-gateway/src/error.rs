use thiserror::Error;

/// Why an inbound event was dropped before finishing.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("store operation failed: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("store task panicked or was cancelled: {0}")]
    Task(#[from] tokio::task::JoinError),
}
