//! Error types for bifrost
//!
//! Errors are structured with fields so callers (the transport layer, the
//! controllers) can classify a failure without string matching. The façade
//! wraps every failure in [`Error::Operation`], so classification helpers
//! look through those wrappers to the root cause.

use thiserror::Error;

/// Main error type for bifrost operations
#[derive(Debug, Error)]
pub enum Error {
    /// The desire request is malformed or contradictory
    #[error("conversion error: {message}")]
    Conversion {
        /// Description of what's wrong with the request
        message: String,
    },

    /// GUID or version is empty or unusable as a label value
    #[error("invalid identity: {message}")]
    InvalidIdentity {
        /// Description of what's invalid
        message: String,
    },

    /// A create was attempted for an object that already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind (e.g. "StatefulSet")
        kind: String,
        /// Object name or process GUID
        name: String,
    },

    /// The operation targets an object that does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (e.g. "StatefulSet")
        kind: String,
        /// Object name or process GUID
        name: String,
    },

    /// Stop-instance ordinal is outside `[0, instances)`
    #[error("invalid instance index {index}: workload has {instances} instances")]
    InvalidInstanceIndex {
        /// Requested ordinal
        index: u32,
        /// Declared instance count
        instances: i32,
    },

    /// Kubernetes API failure
    #[error("cluster api error during {operation}: {source}")]
    ClusterApi {
        /// The operation that failed (e.g. "create statefulset")
        operation: String,
        /// The underlying kube-rs error
        #[source]
        source: kube::Error,
    },

    /// Completion callback could not be delivered
    #[error("completion callback to {url} failed: {message}")]
    Callback {
        /// Callback URL
        url: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Configuration error
    #[error("config error: {message}")]
    Config {
        /// Description of what's wrong
        message: String,
    },

    /// Several independent failures, reported together
    #[error("{}", join_errors(.0))]
    Multiple(Vec<Error>),

    /// A façade operation failed; `source` is the original cause
    #[error("failed to {operation}: {source}")]
    Operation {
        /// The façade operation that failed (e.g. "desire")
        operation: String,
        /// The original cause
        #[source]
        source: Box<Error>,
    },
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl Error {
    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    /// Create an invalid identity error
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::InvalidIdentity {
            message: msg.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Wrap a kube error with the name of the operation that failed
    pub fn cluster_api(operation: impl Into<String>, source: kube::Error) -> Self {
        Self::ClusterApi {
            operation: operation.into(),
            source,
        }
    }

    /// Create a callback delivery error
    pub fn callback(url: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Callback {
            url: url.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Annotate an error with the façade operation that failed
    pub fn operation(operation: impl Into<String>, source: Error) -> Self {
        Self::Operation {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Combine independent failures.
    ///
    /// Returns `None` when nothing failed and the single error unchanged when
    /// only one did.
    pub fn combine(errors: Vec<Error>) -> Option<Self> {
        let mut errors = errors;
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Multiple(errors)),
        }
    }

    /// The innermost error, looking through façade annotations
    pub fn root(&self) -> &Error {
        match self {
            Self::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    /// True if the root cause is [`Error::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// True if the root cause is [`Error::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), Self::AlreadyExists { .. })
    }

    /// True if the root cause is a client error the caller must fix
    /// (conversion, identity, or instance index).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.root(),
            Self::Conversion { .. }
                | Self::InvalidIdentity { .. }
                | Self::InvalidInstanceIndex { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

/// True if a kube error is an API 404
pub fn is_kube_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True if a kube error is an API 409
pub fn is_kube_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}
