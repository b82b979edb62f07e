//! Header encoding and decoding.
//!
//! A header is a type byte plus four flag bytes, CRC-16 protected, in one
//! of two serializations:
//!
//! ```text
//! HEX:  '*' '*' ZDLE 'B'  tt ff ff ff ff cc cc   CR LF [XON]
//!       (tt/ff/cc are two hex chars per byte)
//! BIN:  '*' ZDLE 'A'  type flag*4 crc_hi crc_lo
//!       (type, flags and CRC are ZDLE-escaped)
//! ```
//!
//! For position-carrying headers (ZRPOS, ZDATA, ZEOF) the flag bytes hold
//! a 32-bit little-endian file offset.
//!
//! [`decode`] scans a receive buffer for either form, discarding noise
//! before a candidate prefix and rejecting candidates whose CRC does not
//! verify. It returns `Ok(None)` while a partial candidate needs more
//! bytes, so callers simply retry after the next datagram arrives.

use crate::consts::{HeaderType, XON, ZBIN, ZCAN, ZDLE, ZHEX, ZPAD};
use crate::error::WireError;
use crate::{crc, escape};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Hex header length on the wire: prefix + 10 hex chars + 4 CRC chars.
const HEX_WIRE_LEN: usize = 4 + 10 + 4;

/// A protocol header: type plus four flag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Header type
    pub typ: HeaderType,
    /// Flag bytes; a little-endian file offset for ZRPOS/ZDATA/ZEOF
    pub flags: [u8; 4],
}

impl Header {
    /// Header with all-zero flags.
    pub fn new(typ: HeaderType) -> Self {
        Self { typ, flags: [0; 4] }
    }

    /// Header whose flags carry a file offset.
    pub fn with_pos(typ: HeaderType, pos: u32) -> Self {
        Self {
            typ,
            flags: pos.to_le_bytes(),
        }
    }

    /// File offset carried in the flag bytes.
    pub fn pos(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// CRC-16 over the five header bytes.
    fn checksum(&self) -> u16 {
        let mut c = crc::update(0, self.typ as u8);
        for &f in &self.flags {
            c = crc::update(c, f);
        }
        c
    }

    /// Encode in the HEX serialization.
    ///
    /// ZFIN and ZACK headers omit the trailing XON so the final exchange
    /// does not leave a stray flow-control byte in the peer's buffer.
    pub fn encode_hex(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEX_WIRE_LEN + 3);
        out.put_slice(&[ZPAD, ZPAD, ZDLE, ZHEX]);
        put_hex(&mut out, self.typ as u8);
        for &f in &self.flags {
            put_hex(&mut out, f);
        }
        let c = self.checksum();
        put_hex(&mut out, (c >> 8) as u8);
        put_hex(&mut out, c as u8);
        out.put_slice(b"\r\n");
        if !matches!(self.typ, HeaderType::Fin | HeaderType::Ack) {
            out.put_u8(XON);
        }
        out.freeze()
    }

    /// Encode in the BIN serialization.
    pub fn encode_bin(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(3 + 14);
        out.put_slice(&[ZPAD, ZDLE, ZBIN]);
        escape::escape_into(&mut out, self.typ as u8);
        for &f in &self.flags {
            escape::escape_into(&mut out, f);
        }
        let c = self.checksum();
        escape::escape_into(&mut out, (c >> 8) as u8);
        escape::escape_into(&mut out, c as u8);
        out.freeze()
    }
}

enum Scan {
    /// Candidate incomplete; wait for more bytes
    NeedMore,
    /// Not a valid header at this position; drop one byte and rescan
    Reject,
    /// Decoded header and the number of wire bytes it consumed
    Done(Header, usize, bool),
}

/// Scan `buf` for the next header, consuming noise and the header itself.
///
/// Returns `Ok(None)` when no complete header is available yet. Returns
/// [`WireError::Canceled`] when the peer's `ZDLE`,`ZCAN` abort marker is
/// seen instead of a header.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Header>, WireError> {
    loop {
        // Discard noise up to the next candidate start byte.
        while let Some(&b) = buf.first() {
            if b == ZPAD || b == ZDLE {
                break;
            }
            buf.advance(1);
        }
        let Some(&first) = buf.first() else {
            return Ok(None);
        };
        if first == ZDLE {
            match buf.get(1) {
                None => return Ok(None),
                Some(&ZCAN) => return Err(WireError::Canceled),
                Some(_) => {
                    buf.advance(1);
                    continue;
                }
            }
        }
        match scan_candidate(buf)? {
            Scan::NeedMore => return Ok(None),
            Scan::Reject => buf.advance(1),
            Scan::Done(header, consumed, hex) => {
                buf.advance(consumed);
                if hex {
                    skip_hex_trailer(buf);
                }
                return Ok(Some(header));
            }
        }
    }
}

/// Attempt to decode a header starting at `buf[0] == ZPAD`.
fn scan_candidate(buf: &BytesMut) -> Result<Scan, WireError> {
    match buf.get(1) {
        None => Ok(Scan::NeedMore),
        Some(&ZPAD) => scan_hex(buf),
        Some(&ZDLE) => scan_bin(buf),
        Some(_) => Ok(Scan::Reject),
    }
}

fn scan_hex(buf: &BytesMut) -> Result<Scan, WireError> {
    match buf.get(2) {
        None => return Ok(Scan::NeedMore),
        Some(&ZDLE) => {}
        Some(_) => return Ok(Scan::Reject),
    }
    match buf.get(3) {
        None => return Ok(Scan::NeedMore),
        Some(&ZHEX) => {}
        Some(_) => return Ok(Scan::Reject),
    }
    if buf.len() < HEX_WIRE_LEN {
        return Ok(Scan::NeedMore);
    }
    let mut raw = [0u8; 7];
    for (i, slot) in raw.iter_mut().enumerate() {
        match hex_pair(buf[4 + 2 * i], buf[5 + 2 * i]) {
            Some(b) => *slot = b,
            None => return Ok(Scan::Reject),
        }
    }
    finish(&raw, HEX_WIRE_LEN, true)
}

fn scan_bin(buf: &BytesMut) -> Result<Scan, WireError> {
    match buf.get(2) {
        None => return Ok(Scan::NeedMore),
        // A stray pad in front of the abort marker is still an abort.
        Some(&ZCAN) => return Err(WireError::Canceled),
        Some(&ZBIN) => {}
        Some(_) => return Ok(Scan::Reject),
    }
    let mut raw = [0u8; 7];
    let mut i = 3;
    for slot in raw.iter_mut() {
        let Some(&b) = buf.get(i) else {
            return Ok(Scan::NeedMore);
        };
        if b == ZDLE {
            let Some(&e) = buf.get(i + 1) else {
                return Ok(Scan::NeedMore);
            };
            if e == ZCAN {
                return Err(WireError::Canceled);
            }
            *slot = escape::unescape(e);
            i += 2;
        } else {
            *slot = b;
            i += 1;
        }
    }
    finish(&raw, i, false)
}

/// Validate CRC and type of seven decoded header bytes.
fn finish(raw: &[u8; 7], consumed: usize, hex: bool) -> Result<Scan, WireError> {
    let expected = u16::from_be_bytes([raw[5], raw[6]]);
    if crc::checksum(&raw[..5]) != expected {
        return Ok(Scan::Reject);
    }
    let Ok(typ) = HeaderType::try_from(raw[0]) else {
        return Ok(Scan::Reject);
    };
    Ok(Scan::Done(
        Header {
            typ,
            flags: [raw[1], raw[2], raw[3], raw[4]],
        },
        consumed,
        hex,
    ))
}

/// Drop the CR/LF/XON tail some hex header variants carry.
fn skip_hex_trailer(buf: &mut BytesMut) {
    while let Some(&b) = buf.first() {
        if matches!(b, 0x0D | 0x8D | 0x0A | 0x8A | XON) {
            buf.advance(1);
        } else {
            break;
        }
    }
}

fn put_hex(out: &mut BytesMut, byte: u8) {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    out.put_u8(DIGITS[(byte >> 4) as usize]);
    out.put_u8(DIGITS[(byte & 0x0F) as usize]);
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let hi = (hi as char).to_digit(16)?;
    let lo = (lo as char).to_digit(16)?;
    Some(((hi << 4) | lo) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Result<Option<Header>, WireError> {
        let mut buf = BytesMut::from(bytes);
        decode(&mut buf)
    }

    #[test]
    fn hex_round_trip() {
        let header = Header::with_pos(HeaderType::Rpos, 0xDEAD_BEEF);
        let wire = header.encode_hex();
        let mut buf = BytesMut::from(wire.as_ref());
        let decoded = decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded.pos(), 0xDEAD_BEEF);
        // CR/LF/XON trailer fully consumed
        assert!(buf.is_empty());
    }

    #[test]
    fn bin_round_trip_with_escaped_flags() {
        // Offset whose little-endian bytes all require escaping
        let header = Header::with_pos(HeaderType::Data, 0x8D0D_1310);
        let wire = header.encode_bin();
        let decoded = decode_all(&wire).unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn noise_before_header_is_discarded() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"OO\x00garbage\x7f");
        buf.extend_from_slice(&Header::new(HeaderType::Rinit).encode_hex());
        let decoded = decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.typ, HeaderType::Rinit);
    }

    #[test]
    fn truncated_header_needs_more() {
        let wire = Header::new(HeaderType::Rqinit).encode_hex();
        for cut in 0..HEX_WIRE_LEN {
            assert!(decode_all(&wire[..cut]).unwrap().is_none(), "cut at {cut}");
        }
        let wire = Header::with_pos(HeaderType::Eof, 1024).encode_bin();
        for cut in 0..wire.len() {
            assert!(decode_all(&wire[..cut]).unwrap().is_none(), "cut at {cut}");
        }
    }

    #[test]
    fn corrupt_crc_is_rejected() {
        // Flip every bit of the CRC-protected region; no flip may survive
        // as a decoded header.
        let hex = Header::with_pos(HeaderType::Eof, 4096).encode_hex();
        let bin = Header::with_pos(HeaderType::Eof, 4096).encode_bin();
        for (form, protected) in [(&hex, HEX_WIRE_LEN), (&bin, bin.len())] {
            for bit in 0..protected * 8 {
                let mut wire = form.to_vec();
                wire[bit / 8] ^= 1 << (bit % 8);
                if let Ok(Some(h)) = decode_all(&wire) {
                    panic!("corrupted header decoded as {:?}", h);
                }
            }
        }
    }

    #[test]
    fn lowercase_hex_accepted() {
        let mut wire = Header::with_pos(HeaderType::Rpos, 640).encode_hex().to_vec();
        // Lowercase the digit run, leaving the prefix introducer alone
        for b in &mut wire[4..HEX_WIRE_LEN] {
            *b = b.to_ascii_lowercase();
        }
        let decoded = decode_all(&wire).unwrap().unwrap();
        assert_eq!(decoded.typ, HeaderType::Rpos);
        assert_eq!(decoded.pos(), 640);
    }

    #[test]
    fn cancel_sequence_is_reported() {
        let mut buf = BytesMut::from(&[ZDLE, ZCAN, ZDLE, ZCAN][..]);
        assert!(matches!(decode(&mut buf), Err(WireError::Canceled)));
    }

    #[test]
    fn back_to_back_headers() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Header::new(HeaderType::Rinit).encode_hex());
        buf.extend_from_slice(&Header::with_pos(HeaderType::Rpos, 7).encode_hex());
        assert_eq!(decode(&mut buf).unwrap().unwrap().typ, HeaderType::Rinit);
        let second = decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.typ, HeaderType::Rpos);
        assert_eq!(second.pos(), 7);
        assert!(decode(&mut buf).unwrap().is_none());
    }
}
