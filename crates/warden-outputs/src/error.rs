//! Error type for output modules

use thiserror::Error;

/// Errors raised while configuring or calling an output module
#[derive(Debug, Error)]
pub enum OutputError {
    /// A configured module name does not exist
    #[error("output module {0:?} not found")]
    UnknownModule(String),

    /// A required setting was not provided
    #[error("'{0}' is not defined")]
    MissingSetting(&'static str),

    /// The HTTP request could not be built or sent
    #[error("unable to send the status: {0}")]
    Http(#[from] reqwest::Error),

    /// The monitoring API answered with a non-success status
    #[error("unexpected status code: {code}, response: {body}")]
    UnexpectedStatus {
        /// HTTP status code
        code: u16,
        /// Response body, as returned by the API
        body: String,
    },
}
