//! Error types for the live session coordinator

/// Result type alias using the coordinator Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while coordinating live sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Operation referenced a connection id with no live negotiation handle
    #[error("Connection not found: {0}")]
    ConnectionNotFound(String),

    /// Malformed SDP/ICE or a call the negotiation state does not permit
    #[error("Negotiation failure: {0}")]
    NegotiationFailure(String),

    /// Join against a session id that has no publisher
    #[error("Session not active: {0}")]
    SessionNotActive(String),

    /// Role mismatch on activation, or activation of a session owned by someone else
    #[error("Session conflict: {0}")]
    SessionConflict(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling transport error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// WebRTC library error
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should be reported back to the originating connection
    ///
    /// `ConnectionNotFound` is only logged: there is no live connection to
    /// report to, and the message is dropped.
    pub fn is_reportable(&self) -> bool {
        !matches!(self, Error::ConnectionNotFound(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Check if this error concerns a single connection's negotiation
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::ConnectionNotFound(_) | Error::NegotiationFailure(_) | Error::WebRtcError(_)
        )
    }
}

impl Error {
    /// Text sent to the client in an `error` message
    pub fn client_message(&self) -> String {
        match self {
            Error::NegotiationFailure(m) | Error::SessionNotActive(m) | Error::SessionConflict(m) => {
                m.clone()
            }
            other => other.to_string(),
        }
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtcError(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}
