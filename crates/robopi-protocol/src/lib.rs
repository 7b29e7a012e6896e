//! `robopi-protocol` – the session/protocol engine.
//!
//! Everything between an accepted, already-secured byte stream and the
//! hardware collaborators lives here.  The crate is agnostic about how the
//! stream was secured: the [`transport::ChannelAcceptor`] seam hands it any
//! `AsyncRead + AsyncWrite` stream.
//!
//! # Modules
//!
//! - [`framing`] – [`FramedChannel`]: newline-terminated, length-bounded
//!   messages plus the raw frame primitive used for picture bodies.
//! - [`state`] – [`SessionState`]: the one `connected` flag shared by the
//!   two channels of a session.
//! - [`command`] – [`CommandEngine`]: the CONN/DISCONN gate and the
//!   command → drive → response dispatch table.
//! - [`image`] – [`ImageEngine`]: the `PICTURE` handshake and the chunked
//!   picture transfer.
//! - [`transport`] – [`ChannelAcceptor`]: upgrades accepted TCP streams into
//!   channel streams (TLS in production, plaintext on loopback).

pub mod command;
pub mod framing;
pub mod image;
pub mod state;
pub mod transport;

pub use command::{CommandEngine, CommandReport, Dispatch, SessionEnd};
pub use framing::{FrameError, FramedChannel, Message, prepare_response};
pub use image::{CaptureTarget, ImageEngine, ImageError, ImageReport, Transfer, send_picture};
pub use state::SessionState;
pub use transport::{ChannelAcceptor, PlainAcceptor};
