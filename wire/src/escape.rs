//! ZDLE escape codec.
//!
//! Six byte values may not travel raw inside a BIN header or a data
//! subpacket: ZDLE itself, the CAN marker, the XON/XOFF flow-control pair,
//! and CR with and without the high bit. Each is replaced on the wire by
//! `ZDLE`, `byte ^ 0x40`. CRCs are always computed over the original bytes.

use crate::consts::{ESCAPE_XOR, ZDLE};
use bytes::{BufMut, BytesMut};

/// Byte values that must be escaped before transmission.
pub const RESERVED: [u8; 6] = [ZDLE, 0x10, 0x11, 0x13, 0x0D, 0x8D];

/// Whether `byte` must be sent as a ZDLE pair.
pub fn needs_escape(byte: u8) -> bool {
    RESERVED.contains(&byte)
}

/// Append `byte` to `out`, escaping it if required.
pub fn escape_into(out: &mut BytesMut, byte: u8) {
    if needs_escape(byte) {
        out.put_u8(ZDLE);
        out.put_u8(byte ^ ESCAPE_XOR);
    } else {
        out.put_u8(byte);
    }
}

/// Recover the original byte from the second byte of a ZDLE pair.
pub fn unescape(byte: u8) -> u8 {
    byte ^ ESCAPE_XOR
}
