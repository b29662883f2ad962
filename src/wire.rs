//! Wire-format primitives: varints, tags, fixed-width reads, zigzag coding,
//! and length-delimited framing.
//!
//! Every reader here operates on a plain `&[u8]` slice and a `pos` cursor
//! rather than a raw pointer with an overread "slop" window. There are no
//! resumable/streaming entry points to make that kind of optimization pay
//! for itself, so a bounds-checked slice walk is the right trade.

use crate::error::DecodeError;

/// The four wire types this codec accepts. Groups (3, 4) are represented
/// only as raw tag bits in [`Tag`]; there is no variant for them here
/// because nothing downstream is allowed to act on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    Fixed32,
}

impl WireType {
    fn from_raw(raw: u32) -> Option<WireType> {
        match raw {
            0 => Some(WireType::Varint),
            1 => Some(WireType::Fixed64),
            2 => Some(WireType::LengthDelimited),
            5 => Some(WireType::Fixed32),
            _ => None,
        }
    }
}

/// A decoded, validated tag: field number plus wire type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    pub field_number: u32,
    pub wire_type: WireType,
}

const MAX_VARINT_BYTES: usize = 10;
const MAX_TAG_BYTES: usize = 5;

/// Reads a base-128 little-endian varint, returning the decoded value and
/// the number of bytes consumed.
pub fn read_varint(buf: &[u8], pos: usize) -> Result<(u64, usize), DecodeError> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut i = 0usize;
    loop {
        let Some(&byte) = buf.get(pos + i) else {
            return Err(DecodeError::EndOfStream);
        };
        if i == MAX_VARINT_BYTES - 1 {
            // 10th byte: only bit 0 may be set (low bit of the 64-bit value
            // already consumed 63 bits across the previous 9 bytes).
            if byte > 0x01 {
                return Err(DecodeError::VarintOverflow);
            }
            result |= (byte as u64) << shift;
            return Ok((result, i + 1));
        }
        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
        shift += 7;
        i += 1;
    }
}

/// Reads and validates a tag. A tag is at most 5 bytes (fits a u32) and
/// must decode to a field number `>= 1` and one of the four accepted wire
/// types; groups (wire types 3, 4) are rejected here with `Malformed`
/// rather than threaded through as a distinct variant.
pub fn read_tag(buf: &[u8], pos: usize) -> Result<(Tag, usize), DecodeError> {
    let mut result: u32 = 0;
    let mut shift = 0u32;
    let mut i = 0usize;
    loop {
        let Some(&byte) = buf.get(pos + i) else {
            return Err(DecodeError::EndOfStream);
        };
        if i == MAX_TAG_BYTES - 1 {
            // 5th byte of a u32 varint can only carry 4 more significant
            // bits (32 - 28 = 4).
            if byte & 0x80 != 0 || byte > 0x0F {
                return Err(DecodeError::VarintOverflow);
            }
            result |= (byte as u32) << shift;
            let consumed = i + 1;
            return finish_tag(result, consumed);
        }
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return finish_tag(result, i + 1);
        }
        shift += 7;
        i += 1;
    }
}

fn finish_tag(raw: u32, consumed: usize) -> Result<(Tag, usize), DecodeError> {
    let field_number = raw >> 3;
    let wire_type_raw = raw & 0x7;
    if field_number < 1 {
        return Err(DecodeError::Malformed);
    }
    let Some(wire_type) = WireType::from_raw(wire_type_raw) else {
        // Wire types 3 (start group) and 4 (end group) land here.
        return Err(DecodeError::Malformed);
    };
    Ok((Tag { field_number, wire_type }, consumed))
}

/// Reads a little-endian `u32` (wire type `Fixed32`).
pub fn read_fixed32(buf: &[u8], pos: usize) -> Result<(u32, usize), DecodeError> {
    let bytes = buf
        .get(pos..pos + 4)
        .ok_or(DecodeError::EndOfStream)?;
    Ok((u32::from_le_bytes(bytes.try_into().unwrap()), 4))
}

/// Reads a little-endian `u64` (wire type `Fixed64`).
pub fn read_fixed64(buf: &[u8], pos: usize) -> Result<(u64, usize), DecodeError> {
    let bytes = buf
        .get(pos..pos + 8)
        .ok_or(DecodeError::EndOfStream)?;
    Ok((u64::from_le_bytes(bytes.try_into().unwrap()), 8))
}

/// Reads a varint length prefix followed by that many bytes, returning the
/// inner slice (no copy) and the total bytes consumed (length prefix +
/// payload).
///
/// A truncated length varint is `EndOfStream` like any other varint read
/// (the caller decides whether that's fatal or just means "not a complete
/// top-level message yet"). Once the length is known, though, a body that
/// runs past the buffer is always `Malformed`: the declared length itself
/// is wrong, not the buffer merely short, so this can never be forgiven
/// by an enclosing frame the way a truncated outermost read can.
pub fn read_length_delimited(buf: &[u8], pos: usize) -> Result<(&[u8], usize), DecodeError> {
    let (len, len_size) = read_varint(buf, pos)?;
    let len = usize::try_from(len).map_err(|_| DecodeError::Malformed)?;
    let start = pos + len_size;
    let end = start.checked_add(len).ok_or(DecodeError::Malformed)?;
    let slice = buf.get(start..end).ok_or(DecodeError::Malformed)?;
    Ok((slice, len_size + len))
}

/// Skips exactly one field body for the given wire type, returning the
/// number of bytes consumed. Used for unknown fields.
pub fn skip_field(buf: &[u8], pos: usize, wire_type: WireType) -> Result<usize, DecodeError> {
    match wire_type {
        WireType::Varint => {
            let (_, n) = read_varint(buf, pos)?;
            Ok(n)
        }
        WireType::Fixed32 => {
            if pos + 4 > buf.len() {
                return Err(DecodeError::EndOfStream);
            }
            Ok(4)
        }
        WireType::Fixed64 => {
            if pos + 8 > buf.len() {
                return Err(DecodeError::EndOfStream);
            }
            Ok(8)
        }
        WireType::LengthDelimited => {
            let (_, n) = read_length_delimited(buf, pos)?;
            Ok(n)
        }
    }
}

pub fn zigzag_encode32(v: i32) -> u32 {
    ((v << 1) ^ (v >> 31)) as u32
}

pub fn zigzag_decode32(v: u32) -> i32 {
    ((v >> 1) as i32) ^ -((v & 1) as i32)
}

pub fn zigzag_encode64(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

pub fn zigzag_decode64(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Number of bytes `write_varint` would emit for `v`.
pub fn varint_size(v: u64) -> usize {
    if v == 0 {
        return 1;
    }
    let bits = 64 - v.leading_zeros() as usize;
    (bits + 6) / 7
}

/// Writes `v` as a base-128 varint, returning the number of bytes written.
pub fn write_varint(v: u64, out: &mut [u8]) -> usize {
    let mut v = v;
    let mut i = 0;
    loop {
        let byte = (v & 0x7F) as u8;
        v >>= 7;
        if v == 0 {
            out[i] = byte;
            i += 1;
            return i;
        }
        out[i] = byte | 0x80;
        i += 1;
    }
}

pub fn write_tag(field_number: u32, wire_type: WireType, out: &mut [u8]) -> usize {
    let raw = (field_number << 3)
        | match wire_type {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        };
    write_varint(raw as u64, out)
}

pub fn tag_size(field_number: u32, wire_type: WireType) -> usize {
    let raw = (field_number << 3)
        | match wire_type {
            WireType::Varint => 0,
            WireType::Fixed64 => 1,
            WireType::LengthDelimited => 2,
            WireType::Fixed32 => 5,
        };
    varint_size(raw as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trip() {
        for &v in &[0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX] {
            let mut buf = [0u8; 10];
            let n = write_varint(v, &mut buf);
            assert_eq!(n, varint_size(v));
            let (decoded, consumed) = read_varint(&buf, 0).unwrap();
            assert_eq!(decoded, v);
            assert_eq!(consumed, n);
        }
    }

    #[test]
    fn varint_overflow_on_tenth_byte() {
        let buf = [0x88, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x80, 0x02];
        assert_eq!(read_varint(&buf, 0), Err(DecodeError::VarintOverflow));
    }

    #[test]
    fn tag_s1_int32_field1() {
        let buf = [0x08];
        let (tag, n) = read_tag(&buf, 0).unwrap();
        assert_eq!(n, 1);
        assert_eq!(tag.field_number, 1);
        assert_eq!(tag.wire_type, WireType::Varint);
    }

    #[test]
    fn overlong_tag_is_varint_overflow() {
        // S4: 0x88 0x80 0x80 0x80 0x80 0x00
        let buf = [0x88, 0x80, 0x80, 0x80, 0x80, 0x00];
        assert_eq!(read_tag(&buf, 0), Err(DecodeError::VarintOverflow));
    }

    #[test]
    fn group_wire_types_are_malformed() {
        // field 1, wire type 3 (start group): tag byte = (1 << 3) | 3 = 0x0B
        let buf = [0x0B];
        assert_eq!(read_tag(&buf, 0), Err(DecodeError::Malformed));
        // wire type 4 (end group): (1 << 3) | 4 = 0x0C
        let buf = [0x0C];
        assert_eq!(read_tag(&buf, 0), Err(DecodeError::Malformed));
    }

    #[test]
    fn zigzag32_round_trip() {
        for v in [-1i32, 0, 1, i32::MIN, i32::MAX, -1000, 1000] {
            assert_eq!(zigzag_decode32(zigzag_encode32(v)), v);
        }
    }

    #[test]
    fn zigzag32_known_values() {
        assert_eq!(zigzag_encode32(0), 0);
        assert_eq!(zigzag_encode32(-1), 1);
        assert_eq!(zigzag_encode32(1), 2);
        assert_eq!(zigzag_encode32(-2), 3);
    }

    #[test]
    fn zigzag64_round_trip() {
        for v in [-1i64, 0, 1, i64::MIN, i64::MAX] {
            assert_eq!(zigzag_decode64(zigzag_encode64(v)), v);
        }
    }

    #[test]
    fn length_delimited_s2_string_testing() {
        let buf = [0x07, b't', b'e', b's', b't', b'i', b'n', b'g'];
        let (slice, n) = read_length_delimited(&buf, 0).unwrap();
        assert_eq!(slice, b"testing");
        assert_eq!(n, 8);
    }

    #[test]
    fn length_delimited_truncated_is_end_of_stream() {
        let buf = [0x05, b'h', b'i'];
        assert_eq!(
            read_length_delimited(&buf, 0),
            Err(DecodeError::EndOfStream)
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn varint_round_trip_prop(v: u64) {
            let mut buf = [0u8; 10];
            let n = write_varint(v, &mut buf);
            let (decoded, consumed) = read_varint(&buf, 0).unwrap();
            prop_assert_eq!(decoded, v);
            prop_assert_eq!(consumed, n);
        }

        #[test]
        fn zigzag32_round_trip_prop(v: i32) {
            prop_assert_eq!(zigzag_decode32(zigzag_encode32(v)), v);
        }

        #[test]
        fn zigzag64_round_trip_prop(v: i64) {
            prop_assert_eq!(zigzag_decode64(zigzag_encode64(v)), v);
        }
    }
}
