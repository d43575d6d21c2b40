use std::io;
use thiserror::Error;

/// Custom error types for the INDI protocol core
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid property spec: {0}")]
    InvalidPropertySpec(String),

    #[error("Unknown element: {0}")]
    UnknownElement(String),

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Switch rule violation: {0}")]
    RuleViolation(String),

    #[error("BLOB error: {0}")]
    Blob(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a new parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Error::Parse(msg.into())
    }

    /// Creates a new invalid-property-spec error
    pub fn invalid_spec(msg: impl Into<String>) -> Self {
        Error::InvalidPropertySpec(msg.into())
    }

    /// Creates a new unknown-element error
    pub fn unknown_element(msg: impl Into<String>) -> Self {
        Error::UnknownElement(msg.into())
    }

    /// Creates a new unknown-property error
    pub fn unknown_property(msg: impl Into<String>) -> Self {
        Error::UnknownProperty(msg.into())
    }

    /// Creates a new unknown-device error
    pub fn unknown_device(msg: impl Into<String>) -> Self {
        Error::UnknownDevice(msg.into())
    }

    /// Creates a new rule-violation error
    pub fn rule_violation(msg: impl Into<String>) -> Self {
        Error::RuleViolation(msg.into())
    }

    /// Creates a new BLOB error
    pub fn blob(msg: impl Into<String>) -> Self {
        Error::Blob(msg.into())
    }

    /// Creates a new network error
    pub fn network(msg: impl Into<String>) -> Self {
        Error::Network(msg.into())
    }

    /// Creates a new invalid state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Error::InvalidState(msg.into())
    }
}
