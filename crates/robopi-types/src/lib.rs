//! `robopi-types` – shared vocabulary of the RoboPi control plane.
//!
//! Wire constants, the closed [`Command`] and [`ResponseCode`] vocabularies
//! and the cross-crate [`RobotError`].  Every other crate in the workspace
//! depends on this one and nothing else in the workspace.

pub mod command;
pub mod response;

pub use command::{Command, Motion};
pub use response::ResponseCode;

use thiserror::Error;

/// Maximum number of payload bytes delivered for one message.
pub const CMD_LEN: usize = 16;

/// Size of one frame of the picture body.
pub const BUFFER_SIZE: usize = 32;

/// Byte that terminates every message on both channels.
pub const TERMINATOR: u8 = b'\n';

/// Default TCP port of the command channel.
pub const DEFAULT_CONTROL_PORT: u16 = 2025;

/// Default TCP port of the image channel.
pub const DEFAULT_IMAGE_PORT: u16 = 2026;

/// Normalised speed handed to the motion primitives when the operator does
/// not (and cannot, in this protocol) choose one.
pub const DEFAULT_SPEED: f32 = 0.5;

/// Error type spanning hardware collaborators, transport setup and
/// configuration.
///
/// Protocol-level failures are *not* errors: they travel to the operator as
/// [`ResponseCode`] values.
#[derive(Error, Debug)]
pub enum RobotError {
    #[error("Hardware Fault on {component}: {details}")]
    HardwareFault { component: String, details: String },

    #[error("Capture failed: {0}")]
    Capture(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("TLS setup error: {0}")]
    Tls(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
