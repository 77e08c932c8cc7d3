//! Error types for the voice core

use thiserror::Error;

/// Result type alias for voice core operations
pub type Result<T> = std::result::Result<T, VoiceError>;

/// Substrings that mark a failure as a rejected or missing credential
const AUTH_MARKERS: &[&str] = &[
    "requested entity was not found",
    "api key not valid",
    "invalid api key",
    "unauthenticated",
    "unauthorized",
    "credential",
];

/// Coarse classification used to pick the recovery path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Credential rejected or not found; recover by re-authenticating
    Auth,
    /// Anything else; recover by retrying
    Generic,
}

impl ErrorClass {
    /// Classify an error message coming from the remote side
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        if AUTH_MARKERS.iter().any(|marker| lowered.contains(marker)) {
            Self::Auth
        } else {
            Self::Generic
        }
    }
}

/// Errors that can occur in the voice core
#[derive(Debug, Error)]
pub enum VoiceError {
    /// Microphone access refused by the user or OS
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// A single audio chunk could not be decoded
    #[error("malformed audio: {0}")]
    MalformedAudio(String),

    /// The remote side rejected the credential
    #[error("channel rejected credential: {0}")]
    ChannelAuthRejected(String),

    /// Generic transport failure
    #[error("channel error: {0}")]
    ChannelError(String),

    /// Channel closed
    #[error("channel closed")]
    ChannelClosed,

    /// Audio device failure other than a permission refusal
    #[error("audio device error: {0}")]
    Device(String),

    /// Image generation collaborator failed
    #[error("image generation failed: {0}")]
    ImageGeneration(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// The session actor has shut down
    #[error("session is no longer running")]
    SessionEnded,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VoiceError {
    /// Build a channel error, promoting it to auth-class when the message says so
    pub fn channel(message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorClass::classify(&message) {
            ErrorClass::Auth => Self::ChannelAuthRejected(message),
            ErrorClass::Generic => Self::ChannelError(message),
        }
    }

    /// Recovery class of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::ChannelAuthRejected(_) => ErrorClass::Auth,
            Self::ImageGeneration(message) => ErrorClass::classify(message),
            _ => ErrorClass::Generic,
        }
    }
}
