//! Variable-length integer codec.
//!
//! Values are written as a little-endian base-128 stream: every byte carries seven value
//! bits and the high bit flags that another byte follows. A `u64` never needs more than
//! [`MAX_VARINT_BYTES`] bytes, so a peer that keeps the continuation bit set past that is
//! treated as malformed.
use std::io::Read;

use super::transport::{TransportError, fill};

/// Upper bound on the encoded size of a `u64`.
pub const MAX_VARINT_BYTES: usize = 10;

/// Append the varint encoding of `value` to `out`.
pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Negative values travel as their two's complement, i.e. reduced modulo 2^64.
pub fn encode_signed(value: i64, out: &mut Vec<u8>) {
    encode(value as u64, out)
}

/// Number of bytes `value` occupies once encoded.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Read one varint from `reader`.
///
/// Running out of input mid-value reports [`TransportError::ConnectionClosed`].
pub fn decode<R: Read>(reader: &mut R) -> Result<u64, TransportError> {
    let mut value = 0u64;

    for i in 0..MAX_VARINT_BYTES {
        let mut byte = [0u8; 1];
        fill(reader, &mut byte)?;

        // The tenth byte holds only bit 63.
        if i == MAX_VARINT_BYTES - 1 && byte[0] > 1 {
            return Err(TransportError::MalformedVarint);
        }

        value |= u64::from(byte[0] & 0x7f) << (7 * i);
        if byte[0] & 0x80 == 0 {
            return Ok(value);
        }
    }

    Err(TransportError::MalformedVarint)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: u64) -> u64 {
        let mut buf = Vec::new();
        encode(value, &mut buf);
        assert_eq!(buf.len(), encoded_len(value));
        decode(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn single_byte_values() {
        let mut buf = Vec::new();
        encode(0, &mut buf);
        encode(1, &mut buf);
        encode(127, &mut buf);
        assert_eq!(buf, vec![0x00, 0x01, 0x7f]);
    }

    #[test]
    fn multi_byte_values() {
        let mut buf = Vec::new();
        encode(128, &mut buf);
        assert_eq!(buf, vec![0x80, 0x01]);

        buf.clear();
        encode(54468, &mut buf);
        assert_eq!(buf, vec![0xc4, 0xa9, 0x03]);
    }

    #[test]
    fn boundary_values_survive() {
        for value in [
            0,
            127,
            128,
            16_383,
            16_384,
            u32::MAX as u64,
            u64::MAX - 1,
            u64::MAX,
        ] {
            assert_eq!(roundtrip(value), value);
        }
    }

    #[test]
    fn negative_values_wrap() {
        let mut buf = Vec::new();
        encode_signed(-1, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_BYTES);
        assert_eq!(decode(&mut buf.as_slice()).unwrap(), u64::MAX);
    }

    #[test]
    fn truncated_value_is_connection_closed() {
        let buf = [0x80u8, 0x80];
        let err = decode(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }

    #[test]
    fn overlong_value_is_malformed() {
        let buf = [0xffu8; 11];
        let err = decode(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, TransportError::MalformedVarint));
    }

    #[test]
    fn bits_past_sixty_four_are_malformed() {
        let mut buf = [0x80u8; MAX_VARINT_BYTES];
        buf[MAX_VARINT_BYTES - 1] = 0x02;
        let err = decode(&mut &buf[..]).unwrap_err();
        assert!(matches!(err, TransportError::MalformedVarint));

        buf[MAX_VARINT_BYTES - 1] = 0x01;
        assert_eq!(decode(&mut &buf[..]).unwrap(), 1 << 63);
    }
}
