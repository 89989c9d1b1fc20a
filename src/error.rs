//! Error types for the gateway pipeline.
//!
//! Every pipeline stage returns a [`GatewayError`] so the poll loop can decide
//! between retrying, skipping an adjustment, or giving up at startup.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The Shelly could not be reached, answered with an error, or sent a
    /// document we could not make sense of.
    #[error("Fetch error: {message}")]
    Fetch { message: String },

    /// Missing or malformed offsets / nullification configuration
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid channel `{channel}`, must be one of a, b or c")]
    InvalidChannel { channel: String },

    /// A field needed for a derivation is absent (or null) in the telemetry
    #[error("Missing telemetry field `{field}`")]
    MissingField { field: String },

    #[error("No register named `{name}`")]
    NotFound { name: String },

    #[error("Cannot encode `{name}`: {message}")]
    Encoding { name: String, message: String },

    #[error("Register range {offset}+{count} is outside the register image")]
    OutOfRange { offset: usize, count: usize },

    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl GatewayError {
    pub fn fetch<S: Into<String>>(message: S) -> Self {
        GatewayError::Fetch {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        GatewayError::Config {
            message: message.into(),
        }
    }

    pub fn invalid_channel<S: Into<String>>(channel: S) -> Self {
        GatewayError::InvalidChannel {
            channel: channel.into(),
        }
    }

    pub fn missing_field<S: Into<String>>(field: S) -> Self {
        GatewayError::MissingField {
            field: field.into(),
        }
    }

    pub fn not_found<S: Into<String>>(name: S) -> Self {
        GatewayError::NotFound { name: name.into() }
    }

    pub fn encoding<N: Into<String>, M: Into<String>>(name: N, message: M) -> Self {
        GatewayError::Encoding {
            name: name.into(),
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(err: std::io::Error) -> Self {
        GatewayError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::fetch(format!("request timed out: {err}"))
        } else {
            GatewayError::fetch(err.to_string())
        }
    }
}
