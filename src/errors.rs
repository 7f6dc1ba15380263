use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvatarError {
    /// Media access refused by the user or the platform.
    #[error("Permission denied error: {0}")]
    PermissionDenied(String),
    /// Capture device busy or missing.
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Signaling channel error or unexpected close during an active call.
    #[error("Signaling transport error: {0}")]
    SignalingTransport(String),
    /// ICE or peer-connection failure.
    #[error("Negotiation failure: {0}")]
    Negotiation(String),
    /// Unparseable or unexpected signaling payload.
    #[error("Malformed signaling message: {0}")]
    MalformedMessage(String),
    #[error("Unresolved morph channel: {0}")]
    UnresolvedChannel(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Invalid state: {0}")]
    InvalidState(String),
    #[cfg(feature = "audio")]
    #[error("Audio error: {0}")]
    Audio(String),
}

impl AvatarError {
    /// Whether the call layer retries this error on its own.
    ///
    /// Device and permission errors wait for the next explicit user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AvatarError::SignalingTransport(_) | AvatarError::Negotiation(_)
        )
    }
}
