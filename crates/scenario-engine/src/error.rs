//! Error types for the scenario engine

use thiserror::Error;

/// Result type alias using ScenarioError
pub type Result<T> = std::result::Result<T, ScenarioError>;

/// Errors that can occur while running a scenario
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A referenced node, branch or device role does not exist
    #[error("Scenario definition error: {0}")]
    Definition(String),

    /// `primitive_kwargs` do not match what the primitive expects
    #[error("Invalid arguments for '{primitive}': {message}")]
    InvalidArguments { primitive: String, message: String },

    /// Required sensor, permission or hardware is unavailable
    #[error("Capability unavailable: {0}")]
    Capability(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record codec error
    #[error("Sensor log error: {0}")]
    SensorLog(#[from] sensor_log::SensorLogError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The UI rejected a prompt
    #[error("Prompt rejected: {0}")]
    Prompt(String),

    /// Explicit abort requested by the scenario
    #[error("Scenario aborted: {reason}")]
    Aborted {
        reason: String,
        message: Option<String>,
    },

    /// The run was paused or stopped while this operation was suspended
    #[error("Scenario cancelled")]
    Cancelled,
}

impl ScenarioError {
    /// Create a definition error with a message
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    /// Create an invalid arguments error for a primitive
    pub fn invalid_arguments(primitive: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::InvalidArguments {
            primitive: primitive.into(),
            message: msg.into(),
        }
    }

    /// Create a capability error with a message
    pub fn capability(msg: impl Into<String>) -> Self {
        Self::Capability(msg.into())
    }
}
