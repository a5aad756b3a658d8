//! Session commands and replies.
//!
//! Clients send JSON objects with a `cmd` field:
//!
//! - `{"cmd":"MODE","mode":"auto"|"manual"|"off"}`
//! - `{"cmd":"SET_ANGLES","horiz":<float>,"vert":<float>}`
//! - `{"cmd":"GET_STATUS"}`, or any of `GET_STATE`, `GET_MODE`,
//!   `GET_DASHBOARD_DATA`
//!
//! Messages are decoded once into a [`Command`]; everything downstream
//! matches on the variant. [`CommandRouter`] runs a decoded command against
//! the controller and decides what, if anything, goes back to the client
//! that sent it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::controller::{CommandOutcome, ControllerHandle};
use crate::error::{ProtocolError, Rejection};
use crate::state::{Mode, StateSnapshot};

// ============================================================================
// Commands
// ============================================================================

/// The read-only requests. All of them are answered with a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// `GET_STATUS`
    Status,
    /// `GET_STATE`
    State,
    /// `GET_MODE`
    Mode,
    /// `GET_DASHBOARD_DATA`
    DashboardData,
}

/// A decoded client command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Switch the operating mode.
    SetMode(Mode),
    /// Set the manual tilt angles.
    SetAngles {
        /// Requested horizontal tilt.
        horizontal: f64,
        /// Requested vertical tilt.
        vertical: f64,
    },
    /// Ask for the current state.
    Query(QueryKind),
}

#[derive(Deserialize)]
struct ModePayload {
    mode: Mode,
}

#[derive(Deserialize)]
struct AnglesPayload {
    horiz: f64,
    vert: f64,
}

impl Command {
    /// The wire name of the command.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SetMode(_) => "MODE",
            Self::SetAngles { .. } => "SET_ANGLES",
            Self::Query(QueryKind::Status) => "GET_STATUS",
            Self::Query(QueryKind::State) => "GET_STATE",
            Self::Query(QueryKind::Mode) => "GET_MODE",
            Self::Query(QueryKind::DashboardData) => "GET_DASHBOARD_DATA",
        }
    }

    /// Decodes one session message.
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the message is not JSON, has no `cmd`
    /// string, names an unknown command, or lacks a valid payload field.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let name = value
            .get("cmd")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingCommand)?
            .to_string();

        match name.as_str() {
            "MODE" => {
                let payload: ModePayload = serde_json::from_value(value)
                    .map_err(|e| ProtocolError::malformed(&name, e))?;
                Ok(Self::SetMode(payload.mode))
            }
            "SET_ANGLES" => {
                let payload: AnglesPayload = serde_json::from_value(value)
                    .map_err(|e| ProtocolError::malformed(&name, e))?;
                Ok(Self::SetAngles {
                    horizontal: payload.horiz,
                    vertical: payload.vert,
                })
            }
            "GET_STATUS" => Ok(Self::Query(QueryKind::Status)),
            "GET_STATE" => Ok(Self::Query(QueryKind::State)),
            "GET_MODE" => Ok(Self::Query(QueryKind::Mode)),
            "GET_DASHBOARD_DATA" => Ok(Self::Query(QueryKind::DashboardData)),
            _ => Err(ProtocolError::UnknownCommand(name)),
        }
    }
}

// ============================================================================
// Replies
// ============================================================================

/// The `status` field of a non-snapshot reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    /// The message could not be decoded.
    Error,
    /// The command was valid but not allowed now.
    Rejected,
}

/// Reply to a message that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Always `error`.
    pub status: ReplyStatus,
    /// What went wrong.
    pub message: String,
    /// When the reply was produced.
    pub timestamp: DateTime<Utc>,
}

/// Reply to a command the current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedReply {
    /// Always `rejected`.
    pub status: ReplyStatus,
    /// Wire name of the rejected command.
    pub command: String,
    /// Why it was rejected.
    pub reason: String,
    /// When the reply was produced.
    pub timestamp: DateTime<Utc>,
}

/// A message addressed only to the session that sent the command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    /// Current state, for queries.
    Snapshot(StateSnapshot),
    /// Protocol error.
    Error(ErrorReply),
    /// Policy rejection.
    Rejected(RejectedReply),
}

impl Reply {
    /// Creates an error reply.
    #[must_use]
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self::Error(ErrorReply {
            status: ReplyStatus::Error,
            message: message.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Creates a rejection reply for `command`.
    #[must_use]
    pub fn rejected(command: &str, rejection: Rejection) -> Self {
        Self::Rejected(RejectedReply {
            status: ReplyStatus::Rejected,
            command: command.to_string(),
            reason: rejection.to_string(),
            timestamp: Utc::now(),
        })
    }

    /// Serializes the reply for the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// Command Router
// ============================================================================

/// Decodes session messages and runs them against the controller.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    controller: ControllerHandle,
}

impl CommandRouter {
    /// Creates a router that forwards commands to `controller`.
    #[must_use]
    pub const fn new(controller: ControllerHandle) -> Self {
        Self { controller }
    }

    /// Handles one text message from a session.
    ///
    /// Returns the reply for the originating session, if any. Accepted
    /// state changes return `None`: their effect reaches every session,
    /// including this one, through the broadcast.
    pub async fn route(&self, raw: &str) -> Option<Reply> {
        let command = match Command::decode(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "Rejecting malformed message");
                return Some(Reply::error(e));
            }
        };

        debug!(command = command.name(), "Received command");

        match self.controller.execute(command).await {
            Ok(CommandOutcome::Applied) => None,
            Ok(CommandOutcome::Snapshot(snapshot)) => Some(Reply::Snapshot(snapshot)),
            Ok(CommandOutcome::Rejected(rejection)) => {
                debug!(command = command.name(), reason = %rejection, "Command rejected");
                Some(Reply::rejected(command.name(), rejection))
            }
            Err(e) => Some(Reply::error(e)),
        }
    }
}
