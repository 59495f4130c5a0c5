//! Error types for the Echo speech core

use thiserror::Error;

/// Result type alias for Echo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the speech core
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio frame had the wrong number of samples
    #[error("invalid audio frame: expected {expected} samples, got {actual}")]
    InvalidFrame {
        /// Required samples per frame
        expected: usize,
        /// Samples actually supplied
        actual: usize,
    },

    /// A voice profile with this name is already registered
    #[error("voice profile already registered: {0}")]
    DuplicateProfile(String),

    /// Voice profile failed validation
    #[error("invalid voice profile {name}: {reason}")]
    InvalidProfile {
        /// Profile name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// Registry has no profile to return
    #[error("no voice profile registered")]
    NoProfile,

    /// A speech engine failed (network, quota, missing binary, bad output)
    #[error("{engine} failed: {message}")]
    Provider {
        /// Engine name (e.g. "openai-tts", "espeak-ng")
        engine: String,
        /// Provider-specific detail
        message: String,
    },

    /// A listening session is already running
    #[error("a listening session is already active")]
    SessionActive,

    /// The speech service has shut down
    #[error("speech service stopped")]
    ServiceStopped,

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Build a provider error for the named engine
    pub fn provider(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Short label for the failure kind, used in log fields
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::InvalidFrame { .. } => "invalid_frame",
            Self::DuplicateProfile(_) => "duplicate_profile",
            Self::InvalidProfile { .. } => "invalid_profile",
            Self::NoProfile => "no_profile",
            Self::Provider { .. } => "provider",
            Self::SessionActive => "session_active",
            Self::ServiceStopped => "service_stopped",
            Self::Audio(_) => "audio",
            Self::Io(_) => "io",
            Self::Http(_) => "http",
            Self::Serialization(_) => "serialization",
            Self::Toml(_) => "toml",
        }
    }
}
