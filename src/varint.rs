//! Extensible 7 bit values.
//!
//! Attribute ids and addresses are carried as little-endian 7-bits-per-byte
//! chunks with a continuation flag in bit 7, capped at 4 bytes (28 bits).

/// Append `val` to `buf` at `*pos`, advancing the position. Bytes past the
/// end of `buf` are dropped.
pub fn put(buf: &mut [u8], pos: &mut usize, val: u32) {
    for n in 0..4 {
        let this_chunk = ((val >> (7 * n)) & 0x7f) as u8;
        // Continue while any higher bits remain, not just the next chunk.
        let last = (val >> (7 * (n + 1))) == 0;
        if let Some(slot) = buf.get_mut(*pos) {
            *slot = if last { this_chunk } else { this_chunk | 0x80 };
        }
        *pos += 1;
        if last {
            break;
        }
    }
}

/// Read a value from `buf` at `*pos`, advancing the position.
///
/// A fifth continuation byte is never consumed: decoding stops after 4 bytes
/// whether or not the last one carried the continuation flag.
pub fn get(buf: &[u8], pos: &mut usize) -> u32 {
    let mut val: u32 = 0;
    for n in 0..4 {
        let byte = buf.get(*pos).copied().unwrap_or(0);
        val |= ((byte & 0x7f) as u32) << (7 * n);
        *pos += 1;
        if byte & 0x80 == 0 {
            break;
        }
    }
    val
}

/// Number of bytes `val` occupies on the wire.
pub fn len(val: u32) -> usize {
    for n in 0..4 {
        if (val >> (7 * (n + 1))) == 0 {
            return n + 1;
        }
    }
    4
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(val: u32) -> Vec<u8> {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        put(&mut buf, &mut pos, val);
        buf[..pos].to_vec()
    }

    #[test]
    fn wire_vectors() {
        assert_eq!(vec![0x00], encode(0));
        assert_eq!(vec![0x7f], encode(127));
        assert_eq!(vec![0x80, 0x01], encode(128));
        assert_eq!(vec![0x80, 0x80, 0x01], encode(16384));
        assert_eq!(vec![0xff, 0xff, 0xff, 0x7f], encode(0x0fffffff));
    }

    #[test]
    fn decode_stops_at_four_bytes() {
        // All four bytes flag continuation; the fifth must not be consumed.
        let buf = [0xff, 0xff, 0xff, 0xff, 0x55];
        let mut pos = 0;
        let val = get(&buf, &mut pos);
        assert_eq!(4, pos);
        assert_eq!(0x0fffffff, val);
    }

    proptest! {
        #[test]
        fn round_trip(val in 0u32..0x1000_0000) {
            let wire = encode(val);
            prop_assert_eq!(wire.len(), len(val));
            let mut pos = 0;
            prop_assert_eq!(val, get(&wire, &mut pos));
            prop_assert_eq!(wire.len(), pos);
        }
    }
}
