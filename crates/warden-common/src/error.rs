//! Error types for the warden agent
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the resource, pod or context it relates to so that
//! a single log line is enough to locate the failure.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for warden operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A list or watch call against the API server failed
    #[error("failed to {operation} {resource}: {message}")]
    Watch {
        /// Plural resource name (e.g. "scheduledbackups")
        resource: String,
        /// The call that failed ("list" or "watch")
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// The owning cluster of the agent pod could not be determined
    #[error("cannot resolve cluster of pod {pod:?} in namespace {namespace:?}: {message}")]
    ClusterResolution {
        /// Name of the agent pod
        pod: String,
        /// Namespace of the agent pod
        namespace: String,
        /// Description of what's wrong
        message: String,
    },

    /// Invalid or missing configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "tracker", "watcher")
        context: String,
    },
}

impl Error {
    /// Create a list failure for the given resource
    pub fn list(resource: impl Into<String>, msg: impl ToString) -> Self {
        Self::Watch {
            resource: resource.into(),
            operation: "list".to_string(),
            message: msg.to_string(),
        }
    }

    /// Create a watch failure for the given resource
    pub fn watch(resource: impl Into<String>, msg: impl ToString) -> Self {
        Self::Watch {
            resource: resource.into(),
            operation: "watch".to_string(),
            message: msg.to_string(),
        }
    }

    /// Create a cluster resolution error for the given pod
    pub fn cluster_resolution(
        pod: impl Into<String>,
        namespace: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ClusterResolution {
            pod: pod.into(),
            namespace: namespace.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error came from talking to the API server
    ///
    /// Transport errors end the task that hit them; everything else is a
    /// local decision.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Kube { .. } | Error::Watch { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Watch { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

/// Error returned by structured field lookups on dynamic objects
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    /// The field exists but does not hold the expected type
    #[error("field {path} is not a {expected}")]
    WrongType {
        /// Dotted path of the field (e.g. "status.phase")
        path: String,
        /// Expected JSON type
        expected: &'static str,
    },
}
