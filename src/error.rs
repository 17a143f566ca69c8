//! Error types for chaos resource operations
//!
//! Errors carry the resource kind and name so that a failure in a bulk
//! operation can be traced back to the object that caused it.

use std::time::Duration;

use thiserror::Error;

/// Main error type for chaosctl operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error that has no more specific classification
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The object does not exist
    #[error("{kind}/{name} not found")]
    NotFound {
        /// Resource kind (or "Pod")
        kind: String,
        /// Resource name
        name: String,
    },

    /// An object with the same name already exists
    #[error("{kind}/{name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
    },

    /// The API server rejected the object
    #[error("{kind}/{name} rejected by API server: {message}")]
    Invalid {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Rejection reason from the API server
        message: String,
    },

    /// No live instance matches the fault selector
    #[error("selector [{selector}] matches no pods in namespace {namespace}")]
    Preflight {
        /// Namespace that was searched
        namespace: String,
        /// Rendered label selector (empty if the spec carried none)
        selector: String,
    },

    /// The resource was still present when the deletion budget ran out
    #[error("{kind}/{name} still present after {}s", timeout.as_secs())]
    DeleteTimedOut {
        /// Resource kind
        kind: String,
        /// Resource name
        name: String,
        /// Budget that elapsed
        timeout: Duration,
    },

    /// Remote command execution inside a pod failed
    #[error("exec in pod {pod} failed: {message}")]
    Exec {
        /// Target pod
        pod: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid input supplied by the caller
    #[error("validation error: {0}")]
    Validation(String),

    /// Kubeconfig could not be loaded or the client could not be built
    #[error("client configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an exec error for a pod
    pub fn exec(pod: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Exec {
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a client configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify a kube error returned for a call on `kind/name`.
    ///
    /// 404 becomes [`Error::NotFound`], 409 [`Error::AlreadyExists`], 400 and
    /// 422 [`Error::Invalid`]. Everything else stays a plain [`Error::Kube`].
    pub fn from_api(kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ref resp) => match resp.code {
                404 => Self::not_found(kind, name),
                409 => Self::AlreadyExists {
                    kind: kind.to_string(),
                    name: name.to_string(),
                },
                400 | 422 => Self::Invalid {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    message: resp.message.clone(),
                },
                _ => Self::Kube(err),
            },
            other => Self::Kube(other),
        }
    }

    /// Whether this error means the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube(kube::Error::Api(resp)) => resp.code == 404,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
