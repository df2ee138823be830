//! Error handling for the discovery engine

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A requested probe name is not registered
    #[error("Unknown probe: {0}")]
    UnknownProbe(String),

    /// Scope could not be parsed or is empty
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Validation error (bad trust weight, duplicate probe, bad timeout)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),

    /// A probe failed while running
    #[error("Probe {probe} failed: {message}")]
    Probe { probe: String, message: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Configuration errors are the only ones a discovery call surfaces;
    /// they are raised before any probe is launched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::UnknownProbe(_) | Error::InvalidScope(_) | Error::Validation(_) | Error::Config(_)
        )
    }

    pub(crate) fn probe(probe: &str, message: impl Into<String>) -> Self {
        Error::Probe {
            probe: probe.to_string(),
            message: message.into(),
        }
    }
}
