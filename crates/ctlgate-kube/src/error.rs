//! Error types for downstream cluster access

/// Result type for downstream cluster operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for downstream cluster operations
///
/// `Clone` so the response cache can replay a stored failure to every caller
/// that hits the same fingerprint within the TTL window.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Connection profile is missing required entries or cannot be parsed
    #[error("invalid connection profile: {0}")]
    InvalidProfile(String),

    /// TLS material in the profile could not be loaded
    #[error("tls configuration error: {0}")]
    Tls(String),

    /// The downstream server could not be reached or the response could not be read
    #[error("transport error: {0}")]
    Transport(String),

    /// The downstream server answered a typed fetch with an error status
    #[error("api server returned status {code}: {message}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Response body (possibly truncated)
        message: String,
    },

    /// A response body did not decode into the expected type
    #[error("decode error: {0}")]
    Decode(String),

    /// The control-plane credential chain is incomplete
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// The outbound request could not be built
    #[error("invalid request: {0}")]
    Request(String),
}

impl Error {
    /// Whether the failure happened while talking to the downstream server
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Transport(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::InvalidProfile(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Decode(e.to_string())
    }
}
