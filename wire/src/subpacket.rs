//! Data subpacket codec.
//!
//! A subpacket is a ZDLE-escaped run of data bytes, terminated by
//! `ZDLE`,`ZCRCG` (more data follows in this frame) or `ZDLE`,`ZCRCE`
//! (frame ends), followed by two raw CRC-16 bytes. The CRC covers the
//! original data bytes plus the terminator byte.

use crate::consts::{ZCAN, ZCRCE, ZCRCG, ZDLE};
use crate::error::WireError;
use crate::{crc, escape};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Default cap on a decoded subpacket. Senders in this protocol emit at
/// most 128 data bytes per subpacket; a generous cap bounds memory when
/// the stream has been corrupted and the terminator never arrives.
pub const MAX_SUBPACKET: usize = 1024;

/// A decoded data subpacket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subpacket {
    /// The unescaped data bytes
    pub data: Bytes,
    /// True when the terminator was ZCRCE (frame ends)
    pub last: bool,
    /// Whether the received CRC matched the data
    pub crc_ok: bool,
}

/// Encode one subpacket.
pub fn encode(data: &[u8], end_of_frame: bool) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 6);
    let mut c = 0u16;
    for &b in data {
        escape::escape_into(&mut out, b);
        c = crc::update(c, b);
    }
    let terminator = if end_of_frame { ZCRCE } else { ZCRCG };
    out.put_u8(ZDLE);
    out.put_u8(terminator);
    c = crc::update(c, terminator);
    out.put_u16(c);
    out.freeze()
}

#[derive(Debug, Clone, Copy)]
enum State {
    Data,
    Escape,
    CrcHi { last: bool },
    CrcLo { last: bool, hi: u8 },
}

/// Incremental subpacket decoder.
///
/// Feed it receive-buffer bytes with [`SubpacketDecoder::decode`]; it
/// holds partial state across calls and yields one [`Subpacket`] per
/// terminator seen.
#[derive(Debug)]
pub struct SubpacketDecoder {
    state: State,
    data: BytesMut,
    crc: u16,
    max: usize,
}

impl SubpacketDecoder {
    /// Decoder with the default size cap.
    pub fn new() -> Self {
        Self::with_max(MAX_SUBPACKET)
    }

    /// Decoder with an explicit size cap.
    pub fn with_max(max: usize) -> Self {
        Self {
            state: State::Data,
            data: BytesMut::new(),
            crc: 0,
            max,
        }
    }

    /// Discard any partial subpacket state.
    pub fn reset(&mut self) {
        self.state = State::Data;
        self.data.clear();
        self.crc = 0;
    }

    /// Consume bytes from `buf` until a complete subpacket or the buffer
    /// runs dry.
    ///
    /// Returns [`WireError::Canceled`] on the peer's abort marker and
    /// [`WireError::Overflow`] when the accumulated data exceeds the cap;
    /// after an error the caller should [`reset`](Self::reset) before
    /// decoding again.
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Subpacket>, WireError> {
        while buf.has_remaining() {
            let b = buf.get_u8();
            match self.state {
                State::Data => {
                    if b == ZDLE {
                        self.state = State::Escape;
                    } else {
                        self.push(b)?;
                    }
                }
                State::Escape => match b {
                    ZCRCE | ZCRCG => {
                        self.crc = crc::update(self.crc, b);
                        self.state = State::CrcHi { last: b == ZCRCE };
                    }
                    ZCAN => return Err(WireError::Canceled),
                    other => {
                        self.push(escape::unescape(other))?;
                        self.state = State::Data;
                    }
                },
                State::CrcHi { last } => {
                    self.state = State::CrcLo { last, hi: b };
                }
                State::CrcLo { last, hi } => {
                    let received = u16::from_be_bytes([hi, b]);
                    let crc_ok = received == self.crc;
                    let data = self.data.split().freeze();
                    self.reset();
                    return Ok(Some(Subpacket { data, last, crc_ok }));
                }
            }
        }
        Ok(None)
    }

    fn push(&mut self, b: u8) -> Result<(), WireError> {
        if self.data.len() >= self.max {
            return Err(WireError::Overflow { max: self.max });
        }
        self.data.put_u8(b);
        self.crc = crc::update(self.crc, b);
        Ok(())
    }
}

impl Default for SubpacketDecoder {
    fn default() -> Self {
        Self::new()
    }
}
