use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No instances available for service: {0}")]
    NoInstancesAvailable(String),

    #[error("No healthy instance for service: {0}")]
    NoHealthyInstance(String),

    #[error("Concurrent modification of service: {0}")]
    LockConflict(String),

    #[error("Probe failed for instance {0}")]
    ProbeFailure(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the failed operation can be retried as-is.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict(_))
    }

    /// Short machine-readable kind, used for metrics labels and API bodies.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::NoInstancesAvailable(_) => "no_instances_available",
            Self::NoHealthyInstance(_) => "no_healthy_instance",
            Self::LockConflict(_) => "lock_conflict",
            Self::ProbeFailure(_) => "probe_failure",
            Self::Configuration(_) => "configuration",
            Self::InvalidInput(_) => "invalid_input",
            Self::AlreadyExists(_) => "already_exists",
            Self::Cache(_) => "cache",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
