//! Error types for the sideflow core.

use thiserror::Error;

/// Core error taxonomy.
///
/// Each variant is a distinct failure kind surfaced at the service boundary;
/// the HTTP layer maps kinds to status codes.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid script id: {0}")]
    InvalidId(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed script: {0}")]
    MalformedScript(String),

    #[error("suite '{suite}' references unknown test id '{test_id}'")]
    InvalidReference { suite: String, test_id: String },

    #[error("template error at line {line}, column {column}: {message}")]
    TemplateRender {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("template resource error: {0}")]
    TemplateResource(String),

    #[error("lock already held: {0}")]
    AlreadyHeld(String),

    #[error("lock token does not match for key: {0}")]
    NotOwner(String),

    #[error("timed out acquiring lock: {0}")]
    Timeout(String),

    #[error("no idle session available")]
    NoCapacity,

    #[error("session is not recoverable: {0}")]
    NoSuchSession(String),

    #[error("assertion failed in command {command_id}: expected '{expected}', got '{actual}'")]
    AssertionFailed {
        command_id: String,
        expected: String,
        actual: String,
    },

    #[error("bad locator: {0}")]
    BadLocator(String),

    #[error("undefined variable '${{{name}}}' in command {command_id}")]
    UnboundVariable { command_id: String, name: String },

    #[error("command {command_id} failed: {message}")]
    CommandFailed { command_id: String, message: String },

    #[error("grid unreachable: {0}")]
    GridUnreachable(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Driver-level failure that has not yet been attributed to a command.
    pub fn driver(message: impl Into<String>) -> Self {
        CoreError::CommandFailed {
            command_id: String::new(),
            message: message.into(),
        }
    }

    /// Attribute an execution-time failure to the command that raised it.
    ///
    /// Lock, grid, and session errors pass through unchanged.
    pub fn with_command(self, id: &str) -> Self {
        match self {
            CoreError::CommandFailed { command_id, message } if command_id.is_empty() => {
                CoreError::CommandFailed {
                    command_id: id.to_string(),
                    message,
                }
            }
            CoreError::AssertionFailed {
                command_id,
                expected,
                actual,
            } if command_id.is_empty() => CoreError::AssertionFailed {
                command_id: id.to_string(),
                expected,
                actual,
            },
            CoreError::UnboundVariable { command_id, name } if command_id.is_empty() => {
                CoreError::UnboundVariable {
                    command_id: id.to_string(),
                    name,
                }
            }
            other => other,
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
