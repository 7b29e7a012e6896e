//! [`ResponseCode`] – the server's reply vocabulary.
//!
//! Every code has exactly one textual mnemonic.  The enumeration is closed,
//! so an undefined code cannot be constructed and [`ResponseCode::mnemonic`]
//! is total.

use std::fmt;

/// A reply sent by the server on either channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    ConnOk,
    ConnErr,
    DisconnOk,
    DisconnErr,
    FwdOk,
    BkwdOk,
    StopOk,
    RotateLeftOk,
    RotateRightOk,
    FrontLOk,
    FrontROk,
    BckLOk,
    BckROk,
    Ping,
    PictureOk,
    PictureErr,
    CmdErr,
}

impl ResponseCode {
    /// Every response code, in wire-table order.
    pub const ALL: [ResponseCode; 17] = [
        ResponseCode::ConnOk,
        ResponseCode::ConnErr,
        ResponseCode::DisconnOk,
        ResponseCode::DisconnErr,
        ResponseCode::FwdOk,
        ResponseCode::BkwdOk,
        ResponseCode::StopOk,
        ResponseCode::RotateLeftOk,
        ResponseCode::RotateRightOk,
        ResponseCode::FrontLOk,
        ResponseCode::FrontROk,
        ResponseCode::BckLOk,
        ResponseCode::BckROk,
        ResponseCode::Ping,
        ResponseCode::PictureOk,
        ResponseCode::PictureErr,
        ResponseCode::CmdErr,
    ];

    /// The text sent on the wire for this code (without terminator).
    pub const fn mnemonic(self) -> &'static str {
        match self {
            ResponseCode::ConnOk => "CONN_OK",
            ResponseCode::ConnErr => "CONN_ERR",
            ResponseCode::DisconnOk => "DISCONN_OK",
            ResponseCode::DisconnErr => "DISCONN_ERR",
            ResponseCode::FwdOk => "FWD_OK",
            ResponseCode::BkwdOk => "BKWD_OK",
            ResponseCode::StopOk => "STOP_OK",
            ResponseCode::RotateLeftOk => "ROTATE_LEFT_OK",
            ResponseCode::RotateRightOk => "ROTATE_RIGHT_OK",
            ResponseCode::FrontLOk => "FRONT_L_OK",
            ResponseCode::FrontROk => "FRONT_R_OK",
            ResponseCode::BckLOk => "BCK_L_OK",
            ResponseCode::BckROk => "BCK_R_OK",
            ResponseCode::Ping => "PING",
            ResponseCode::PictureOk => "PICTURE_OK",
            ResponseCode::PictureErr => "PICTURE_ERR",
            ResponseCode::CmdErr => "CMD_ERR",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
