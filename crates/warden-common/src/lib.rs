//! Common types for warden: errors, telemetry, metrics and Kubernetes helpers

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::{Error, FieldError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable carrying the agent's pod name (downward API)
pub const POD_NAME_ENV: &str = "MY_POD_NAME";

/// Environment variable carrying the agent's namespace (downward API)
pub const NAMESPACE_ENV: &str = "MY_NAMESPACE";
