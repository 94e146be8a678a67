use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage encoding error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist {path}: {reason}")]
    Persist { path: String, reason: String },
}

/// Errors surfaced to whoever drives the page store.
///
/// Unknown page or widget ids are not errors; those calls are no-ops.
#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
