//! Pergola Controller
//!
//! Coordinates a sun-tracking pergola: decides where the panels should
//! point, keeps the operating mode and night-mode override consistent, and
//! serves the state to WebSocket clients.
//!
//! The pieces, from the inside out:
//!
//! - [`geometry`] maps tilt angles to the four actuator positions
//! - [`tracking`] picks a target tilt from the light sensors and the sun
//! - [`state`] is the mode state machine, the sole writer of the state
//! - [`controller`] runs the state machine as a single task
//! - [`broadcast`] fans snapshots out to sessions
//! - [`command`] decodes client commands and builds replies
//! - [`websocket`] and [`api`] are the network surface

pub mod api;
pub mod broadcast;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod geometry;
pub mod state;
pub mod sun;
pub mod tracking;
pub mod websocket;

pub use api::{create_router, AppState, ErrorResponse};
pub use broadcast::{BroadcastHub, SessionClosed, SessionId, SessionSink};
pub use command::{Command, CommandRouter, QueryKind, Reply};
pub use config::{Config, HardwareConfig, Location, TransportKind, CONFIG_FILE_NAME};
pub use controller::{CommandOutcome, Controller, ControllerHandle};
pub use error::{PergolaError, ProtocolError, Rejection, Result};
pub use geometry::actuator_positions;
pub use state::{ControllerState, Mode, ModeStateMachine, StateSnapshot, Transition};
pub use sun::{SolarCalculator, SunPosition, SunPositionSource};
pub use tracking::{Angles, TrackingDecision, TrackingSource, MAX_TILT};
