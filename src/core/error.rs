use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Fetch failure: {0}")]
    FetchFailure(String),

    #[error("Mutation rejected: {0}")]
    MutationRejected(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Record '{0}' not found")]
    NotFound(String),

    #[error("Inconsistency: {0}")]
    Inconsistency(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Dashboard '{0}' is already subscribed to push notifications")]
    AlreadySubscribed(String),

    #[error("Preference error: {0}")]
    Preference(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Preference(err.to_string())
    }
}
