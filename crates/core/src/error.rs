use mnemo_backend::BackendError;

/// Failure taxonomy of the resolution and augmentation layer.
///
/// Passive work (resolution, ingestion, injection) logs these and drops the
/// unit of work; only user-initiated calls hand them back to the caller.
#[derive(Debug, thiserror::Error)]
pub enum MnemoError {
    #[error("resolution unavailable: {0}")]
    ResolutionUnavailable(String),
    #[error("ingestion failed: {0}")]
    Ingestion(String),
    #[error("augmentation failed: {0}")]
    Augmentation(String),
    #[error("backend unavailable")]
    BackendUnavailable,
    /// A user-initiated request that would do nothing or too much.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("settings: {0}")]
    Settings(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
