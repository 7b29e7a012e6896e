//! [`CommandEngine`] – the command channel's state machine.
//!
//! Every session starts *Disconnected*.  Only an explicit `CONN` opens it;
//! until then the only other accepted token is `DISCONN` (answered
//! `DISCONN_ERR`).  Anything else before the handshake forfeits the
//! session.
//!
//! | State | Input | Effect | Response | Channel |
//! |---|---|---|---|---|
//! | Disconnected | `CONN` | connected | `CONN_OK` | open |
//! | Disconnected | `DISCONN` | – | `DISCONN_ERR` | open |
//! | Disconnected | anything else | – | `CMD_ERR` | closed |
//! | Connected | `CONN` | disconnected | `CONN_ERR` | closed |
//! | Connected | `DISCONN` | disconnected | `DISCONN_OK` | closed |
//! | Connected | `PING` | – | `PING` | open |
//! | Connected | motion token | drive primitive | `<TOKEN>_OK` | open |
//! | Connected | `PICTURE` | – | `PICTURE_ERR` | open |
//! | Connected | unrecognised | – | `CMD_ERR` | open |
//!
//! "Closed" means the channel is shut down right after the response has
//! been flushed.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use robopi_hal::{MotorDrive, execute};
use robopi_types::{CMD_LEN, Command, DEFAULT_SPEED, ResponseCode};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

use crate::framing::{FrameError, FramedChannel};
use crate::state::SessionState;

/// The outcome of dispatching one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dispatch {
    pub response: ResponseCode,
    /// Shut the channel down once `response` has been sent.
    pub close: bool,
}

impl Dispatch {
    fn reply(response: ResponseCode) -> Self {
        Self {
            response,
            close: false,
        }
    }

    fn reply_and_close(response: ResponseCode) -> Self {
        Self {
            response,
            close: true,
        }
    }
}

/// Why the command channel stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The state machine ended the session after sending this response.
    Closed(ResponseCode),
    /// The operator closed the connection.
    PeerDisconnected,
    /// A read or write failed.
    TransportFailed(io::Error),
}

/// Summary of one command channel run.
#[derive(Debug)]
pub struct CommandReport {
    /// Messages received and answered.
    pub commands: u64,
    pub end: SessionEnd,
}

/// Dispatches operator commands for one session.
///
/// The engine is the only writer of the session's `connected` flag.
pub struct CommandEngine {
    state: SessionState,
    drive: Arc<dyn MotorDrive>,
    speed: f32,
    commands: AtomicU64,
}

impl CommandEngine {
    pub fn new(state: SessionState, drive: Arc<dyn MotorDrive>) -> Self {
        Self {
            state,
            drive,
            speed: DEFAULT_SPEED,
            commands: AtomicU64::new(0),
        }
    }

    /// Override the speed passed to every motion primitive (builder-style).
    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Messages received so far, including by a run that was cancelled.
    pub fn commands_handled(&self) -> u64 {
        self.commands.load(Ordering::Relaxed)
    }

    /// Apply one terminator-stripped message to the state machine.
    pub fn dispatch(&self, token: &[u8]) -> Dispatch {
        let command = Command::parse(token);

        if !self.state.is_connected() {
            return match command {
                Some(Command::Conn) => {
                    self.state.set_connected(true);
                    Dispatch::reply(ResponseCode::ConnOk)
                }
                Some(Command::Disconn) => Dispatch::reply(ResponseCode::DisconnErr),
                _ => Dispatch::reply_and_close(ResponseCode::CmdErr),
            };
        }

        match command {
            Some(Command::Conn) => {
                self.state.set_connected(false);
                Dispatch::reply_and_close(ResponseCode::ConnErr)
            }
            Some(Command::Disconn) => {
                self.state.set_connected(false);
                Dispatch::reply_and_close(ResponseCode::DisconnOk)
            }
            Some(Command::Ping) => Dispatch::reply(ResponseCode::Ping),
            Some(Command::Picture) => Dispatch::reply(ResponseCode::PictureErr),
            Some(Command::Motion(motion)) => {
                // Device errors are not part of the reply vocabulary.
                if let Err(e) = execute(self.drive.as_ref(), motion, self.speed) {
                    warn!(motion = motion.token(), error = %e, "motion command failed");
                }
                Dispatch::reply(motion.ack())
            }
            None => {
                debug!(token = %String::from_utf8_lossy(token), "unrecognised command");
                Dispatch::reply(ResponseCode::CmdErr)
            }
        }
    }

    /// Serve `channel` until the state machine closes it or the transport
    /// fails.
    ///
    /// On any exit other than a protocol close the session is marked
    /// disconnected.
    pub async fn run<S>(&self, channel: &mut FramedChannel<S>) -> CommandReport
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut commands = 0u64;

        let end = loop {
            let message = match channel.read_message(CMD_LEN).await {
                Ok(message) => message,
                Err(FrameError::Disconnected) => break SessionEnd::PeerDisconnected,
                Err(FrameError::Io(e)) => break SessionEnd::TransportFailed(e),
            };
            commands += 1;
            self.commands.fetch_add(1, Ordering::Relaxed);
            debug!(command = %message, truncated = message.is_truncated(), "command received");

            let outcome = self.dispatch(message.as_bytes());
            match channel.send_response(outcome.response).await {
                Ok(_) => {}
                Err(FrameError::Disconnected) => break SessionEnd::PeerDisconnected,
                Err(FrameError::Io(e)) => break SessionEnd::TransportFailed(e),
            }

            if outcome.close {
                if let Err(e) = channel.shutdown().await {
                    debug!(error = %e, "command channel shutdown failed");
                }
                break SessionEnd::Closed(outcome.response);
            }
        };

        match &end {
            SessionEnd::Closed(response) => info!(%response, "command channel closed by protocol"),
            SessionEnd::PeerDisconnected => {
                self.state.set_connected(false);
                info!("client disconnected");
            }
            SessionEnd::TransportFailed(e) => {
                self.state.set_connected(false);
                error!(error = %e, "command channel transport error");
            }
        }

        CommandReport { commands, end }
    }
}
