//! [`Command`] – the operator's request vocabulary.
//!
//! Tokens are matched byte-for-byte and case-sensitively against the
//! terminator-stripped message.  Anything that is not exactly one of the
//! tokens below is not a command.

use crate::response::ResponseCode;

/// A drive manoeuvre requested on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Motion {
    Forward,
    Backward,
    Stop,
    RotateLeft,
    RotateRight,
    /// Forward while turning left.
    FrontLeft,
    /// Forward while turning right.
    FrontRight,
    /// Backward while turning left.
    BackLeft,
    /// Backward while turning right.
    BackRight,
}

impl Motion {
    pub const ALL: [Motion; 9] = [
        Motion::Forward,
        Motion::Backward,
        Motion::Stop,
        Motion::RotateLeft,
        Motion::RotateRight,
        Motion::FrontLeft,
        Motion::FrontRight,
        Motion::BackLeft,
        Motion::BackRight,
    ];

    /// The wire token requesting this motion.
    pub const fn token(self) -> &'static str {
        match self {
            Motion::Forward => "FWD",
            Motion::Backward => "BKWD",
            Motion::Stop => "STOP",
            Motion::RotateLeft => "ROTATE_LEFT",
            Motion::RotateRight => "ROTATE_RIGHT",
            Motion::FrontLeft => "FRONT_L",
            Motion::FrontRight => "FRONT_R",
            Motion::BackLeft => "BCK_L",
            Motion::BackRight => "BCK_R",
        }
    }

    /// The acknowledgement sent once the motion has been handed to the drive.
    pub const fn ack(self) -> ResponseCode {
        match self {
            Motion::Forward => ResponseCode::FwdOk,
            Motion::Backward => ResponseCode::BkwdOk,
            Motion::Stop => ResponseCode::StopOk,
            Motion::RotateLeft => ResponseCode::RotateLeftOk,
            Motion::RotateRight => ResponseCode::RotateRightOk,
            Motion::FrontLeft => ResponseCode::FrontLOk,
            Motion::FrontRight => ResponseCode::FrontROk,
            Motion::BackLeft => ResponseCode::BckLOk,
            Motion::BackRight => ResponseCode::BckROk,
        }
    }
}

/// A recognised operator command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Conn,
    Disconn,
    Ping,
    Picture,
    Motion(Motion),
}

impl Command {
    /// Recognise `token` (terminator already stripped).
    ///
    /// Returns `None` for anything outside the vocabulary, including case
    /// variants and tokens with surrounding whitespace.
    pub fn parse(token: &[u8]) -> Option<Self> {
        match token {
            b"CONN" => Some(Command::Conn),
            b"DISCONN" => Some(Command::Disconn),
            b"PING" => Some(Command::Ping),
            b"PICTURE" => Some(Command::Picture),
            other => Motion::ALL
                .into_iter()
                .find(|motion| motion.token().as_bytes() == other)
                .map(Command::Motion),
        }
    }

    /// The wire token of this command.
    pub const fn token(self) -> &'static str {
        match self {
            Command::Conn => "CONN",
            Command::Disconn => "DISCONN",
            Command::Ping => "PING",
            Command::Picture => "PICTURE",
            Command::Motion(motion) => motion.token(),
        }
    }
}
