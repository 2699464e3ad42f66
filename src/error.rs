use reqwest::StatusCode;
use thiserror::Error;

/// Failures of the login call.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Authentication failed: {status} - {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed login response: {0}")]
    Parse(String),
}

/// Failures while fetching telemetry. These are transient from the poller's point of view.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Connection error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API request failed: {status} - {body}")]
    Status { status: StatusCode, body: String },

    #[error("Malformed graph response: {0}")]
    Parse(String),

    #[error("No readings reported for device {0}")]
    NoReadings(String),

    #[error("Re-authentication failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Poll interval {0}s is outside the allowed range of 60-3600s")]
    PollIntervalOutOfRange(u64),

    #[error("No device selected")]
    MissingDevice,

    #[error("Device {0} is not registered to this account")]
    UnknownDevice(String),

    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}
