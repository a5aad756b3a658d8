//! Error types for the pergola controller.
//!
//! Three families live here. [`PergolaError`] covers startup and runtime
//! failures of the service itself. [`ProtocolError`] describes a session
//! message that could not be decoded, and [`Rejection`] a well-formed command
//! that the current state does not allow. Neither of the last two ever closes
//! a session; they become a reply to the originating client.

use std::path::PathBuf;

use crate::state::Mode;

/// A specialized `Result` type for controller operations.
pub type Result<T> = std::result::Result<T, PergolaError>;

/// Errors that can occur while configuring or running the controller.
#[derive(Debug, thiserror::Error)]
pub enum PergolaError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your pergola.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Runtime Errors
    // ========================================================================
    /// The controller task is no longer running.
    #[error("Controller is not running")]
    ControllerUnavailable,

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PergolaError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }
}

// ============================================================================
// Session Protocol Errors
// ============================================================================

/// A session message that could not be turned into a command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The message was not valid JSON.
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// The message had no string `cmd` field.
    #[error("Missing 'cmd' field")]
    MissingCommand,

    /// The `cmd` field named no known command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// A known command carried missing or invalid fields.
    #[error("Malformed {command} command: {message}")]
    MalformedPayload {
        /// The command name.
        command: String,
        /// What was wrong with the payload.
        message: String,
    },

    /// The client sent a binary frame.
    #[error("Binary messages are not supported")]
    BinaryMessage,
}

impl ProtocolError {
    /// Creates a new `MalformedPayload` error.
    #[must_use]
    pub fn malformed(command: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::MalformedPayload {
            command: command.into(),
            message: message.to_string(),
        }
    }
}

// ============================================================================
// Policy Rejections
// ============================================================================

/// A valid command that the current state does not allow.
///
/// A rejected command leaves the state untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// Angles can only be set in manual mode.
    #[error("Angles can only be set in manual mode (current mode: {mode})")]
    NotInManualMode {
        /// The mode the controller is in.
        mode: Mode,
    },

    /// Night mode holds the panels flat.
    #[error("Night mode is active")]
    NightModeActive,
}
