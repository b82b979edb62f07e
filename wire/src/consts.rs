//! Protocol control bytes and header types.

use crate::error::WireError;

/// Header padding byte, `*`
pub const ZPAD: u8 = 0x2A;
/// Data link escape; introduces every protocol escape sequence
pub const ZDLE: u8 = 0x18;
/// Binary header introducer, `A`
pub const ZBIN: u8 = 0x41;
/// Hex header introducer, `B`
pub const ZHEX: u8 = 0x42;
/// Subpacket terminator: CRC follows, frame ends
pub const ZCRCE: u8 = 0x45;
/// Subpacket terminator: CRC follows, more data follows in this frame
pub const ZCRCG: u8 = 0x47;
/// XON, appended after most hex headers
pub const XON: u8 = 0x11;
/// Session cancel marker; `ZDLE`,`ZCAN` aborts the transfer
pub const ZCAN: u8 = 0x10;

/// Value XORed onto an escaped byte
pub const ESCAPE_XOR: u8 = 0x40;

/// ZModem header types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderType {
    /// Sender requests receive init
    Rqinit = 0,
    /// Receiver init / ready
    Rinit = 1,
    /// Send init sequence
    Sinit = 2,
    /// Acknowledge
    Ack = 3,
    /// File name and size from sender
    File = 4,
    /// Receiver skips this file
    Skip = 5,
    /// Last header or subpacket was garbled
    Nak = 6,
    /// Abort batch transfer
    Abort = 7,
    /// Finish session
    Fin = 8,
    /// Resume data transfer at this position
    Rpos = 9,
    /// Data subpacket follows
    Data = 10,
    /// End of file at this position
    Eof = 11,
    /// Fatal read or write error
    Ferr = 12,
    /// Request for file CRC
    Crc = 13,
    /// Receiver challenge
    Challenge = 14,
    /// Request complete
    Compl = 15,
    /// Peer canceled the session
    Can = 16,
    /// Request for free filesystem bytes
    Freecnt = 17,
    /// Command from sending program
    Command = 18,
}

impl TryFrom<u8> for HeaderType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(HeaderType::Rqinit),
            1 => Ok(HeaderType::Rinit),
            2 => Ok(HeaderType::Sinit),
            3 => Ok(HeaderType::Ack),
            4 => Ok(HeaderType::File),
            5 => Ok(HeaderType::Skip),
            6 => Ok(HeaderType::Nak),
            7 => Ok(HeaderType::Abort),
            8 => Ok(HeaderType::Fin),
            9 => Ok(HeaderType::Rpos),
            10 => Ok(HeaderType::Data),
            11 => Ok(HeaderType::Eof),
            12 => Ok(HeaderType::Ferr),
            13 => Ok(HeaderType::Crc),
            14 => Ok(HeaderType::Challenge),
            15 => Ok(HeaderType::Compl),
            16 => Ok(HeaderType::Can),
            17 => Ok(HeaderType::Freecnt),
            18 => Ok(HeaderType::Command),
            _ => Err(WireError::Type(value)),
        }
    }
}
