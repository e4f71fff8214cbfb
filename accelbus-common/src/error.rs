use thiserror::Error;

/// Error type shared by the accelbus crates for everything outside the register codec:
/// configuration, serialization and the Zenoh publishing path.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Zenoh error: {0}")]
    Zenoh(#[from] zenoh::Error),

    #[error("Failed to publish to {key}: {message}")]
    Publish { key: String, message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CBOR serialization error: {0}")]
    Cbor(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a publish error for a key expression.
    pub fn publish(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Publish {
            key: key.into(),
            message: message.to_string(),
        }
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for Error {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for Error {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        Error::Cbor(e.to_string())
    }
}

/// Result type alias using accelbus's Error.
pub type Result<T> = std::result::Result<T, Error>;
