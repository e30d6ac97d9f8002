//! Error types for the S3 Bucket Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error reported by a backend client
    #[error("Storage error: {0}")]
    Storage(String),

    /// Error raised while operating on a specific backend
    #[error("backend {backend}: {source}")]
    Backend {
        backend: String,
        #[source]
        source: Box<Error>,
    },

    /// Backend is not present in the registry
    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    /// Bucket already exists and is owned by the caller
    #[error("Bucket already owned by you: {0}")]
    BucketAlreadyOwned(String),

    /// Bucket does not exist on the backend
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    /// Optimistic concurrency conflict from the record store
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record not found in the record store
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Operation deadline elapsed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Several backend tasks failed
    #[error("{}", join_messages(.0))]
    Backends(Vec<Error>),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn join_messages(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Attach the backend name to an error
    pub fn for_backend(self, backend: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            source: Box::new(self),
        }
    }

    /// Join a list of errors, returning `None` when the list is empty
    pub fn join(mut errors: Vec<Error>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Error::Backends(errors)),
        }
    }

    /// Whether the error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(api_err)) => api_err.code == 409,
            Error::Backend { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Whether the error means the record no longer exists
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(api_err)) => api_err.code == 404,
            _ => false,
        }
    }
}
