//! Safe recursive-descent decoder: walks tagged wire bytes against a
//! [`MessageTable`] and writes the result into a [`Message`].
//!
//! There is no streaming or resumable entry point, and groups are rejected
//! at the wire-tag layer ([`wire::read_tag`]), so a bounds-checked walk
//! over one `&[u8]` slice, recursing directly for submessages, is the
//! whole decoder a once-and-done parse needs.

use crate::arena::Arena;
use crate::containers::{MapKey, MapValue, StringView, Value};
use crate::error::DecodeError;
use crate::message::{Message, RepeatedSlot};
use crate::table::{FieldDescriptor, FieldMode, FieldType, MessageTable};
use crate::wire::{self, Tag, WireType};

/// Tunables for one decode call.
#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    /// Maximum submessage nesting depth before `MaxDepthExceeded`.
    pub max_depth: u8,
    /// Validate that `string`-typed field bytes are well-formed UTF-8.
    pub check_utf8: bool,
    /// Borrow `string`/`bytes` payloads directly from `input` instead of
    /// copying them into the arena. The caller must then keep `input`
    /// alive for as long as the decoded message is used.
    pub alias_string: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_depth: 100,
            check_utf8: true,
            alias_string: false,
        }
    }
}

/// Decodes `input` into `msg` against `msg.table`'s schema. `arena` backs
/// every owned (non-aliased) string/bytes copy the decode produces.
pub fn decode<'a>(
    input: &'a [u8],
    msg: &mut Message<'a>,
    arena: &'a Arena,
    opts: &DecodeOptions,
) -> Result<(), DecodeError> {
    let mut d = Decoder { input, arena, opts };
    d.decode_into(msg, 0, input.len(), 0, true)
}

struct Decoder<'a, 'o> {
    input: &'a [u8],
    arena: &'a Arena,
    opts: &'o DecodeOptions,
}

/// Converts an `EndOfStream` raised while reading inside a bounded inner
/// region (a submessage or packed block) into `Malformed`: the region's
/// own declared length promised that many bytes, so running out inside it
/// means the length lied, not that the real input was truncated.
fn bound(e: DecodeError, top_level: bool) -> DecodeError {
    if top_level {
        e
    } else {
        match e {
            DecodeError::EndOfStream => DecodeError::Malformed,
            other => other,
        }
    }
}

impl<'a, 'o> Decoder<'a, 'o> {
    fn decode_into(
        &mut self,
        msg: &mut Message<'a>,
        start: usize,
        end: usize,
        depth: u8,
        top_level: bool,
    ) -> Result<(), DecodeError> {
        if depth > self.opts.max_depth {
            return Err(DecodeError::MaxDepthExceeded);
        }
        let bounded = &self.input[..end];
        let mut pos = start;
        while pos < end {
            let (tag, n) = wire::read_tag(bounded, pos).map_err(|e| bound(e, top_level))?;
            pos += n;
            pos = self.decode_field(msg, tag, pos, end, depth, top_level)?;
        }
        Ok(())
    }

    fn decode_field(
        &mut self,
        msg: &mut Message<'a>,
        tag: Tag,
        pos: usize,
        end: usize,
        depth: u8,
        top_level: bool,
    ) -> Result<usize, DecodeError> {
        let table = msg.table;
        match table.field_by_number(tag.field_number) {
            None => {
                let bounded = &self.input[..end];
                let n = wire::skip_field(bounded, pos, tag.wire_type).map_err(|e| bound(e, top_level))?;
                Ok(pos + n)
            }
            Some(field) => match field.mode {
                FieldMode::Map => self.decode_map_entry(msg, field, tag, pos, end, depth, top_level),
                FieldMode::Repeated => self.decode_repeated(msg, field, tag, pos, end, depth, top_level),
                FieldMode::Scalar => self.decode_scalar(msg, field, tag, pos, end, depth, top_level),
            },
        }
    }

    fn decode_scalar(
        &mut self,
        msg: &mut Message<'a>,
        field: &'static FieldDescriptor,
        tag: Tag,
        pos: usize,
        end: usize,
        depth: u8,
        top_level: bool,
    ) -> Result<usize, DecodeError> {
        if tag.wire_type != field.field_type.wire_type() {
            return Err(DecodeError::WireTypeMismatch);
        }
        if matches!(field.field_type, FieldType::Message | FieldType::Group) {
            let (body, consumed) =
                wire::read_length_delimited(&self.input[..end], pos).map_err(|e| bound(e, top_level))?;
            let body_start = pos + (consumed - body.len());
            let body_end = body_start + body.len();
            let sub_table = msg.table.submessage(field).expect("message field without submessage table");
            let mut child = Message::new(sub_table);
            self.decode_into(&mut child, body_start, body_end, depth + 1, false)?;
            msg.set_submessage(field, Box::new(child));
            return Ok(body_end);
        }
        let (value, consumed) = self.read_scalar_value(field.field_type, pos, end, top_level)?;
        msg.set_scalar(field, value);
        Ok(pos + consumed)
    }

    /// Reads one element's worth of bytes for `field_type` at `pos`,
    /// returning the [`Value`] and the number of bytes consumed. Used for
    /// both singular scalars and individual elements of a repeated field.
    fn read_scalar_value(
        &mut self,
        field_type: FieldType,
        pos: usize,
        end: usize,
        top_level: bool,
    ) -> Result<(Value<'a>, usize), DecodeError> {
        use FieldType::*;
        let bounded = &self.input[..end];
        match field_type {
            Bool => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::Bool(v != 0), n))
            }
            Int32 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I32(v as i32), n))
            }
            Int64 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I64(v as i64), n))
            }
            UInt32 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::U32(v as u32), n))
            }
            UInt64 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::U64(v), n))
            }
            SInt32 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I32(wire::zigzag_decode32(v as u32)), n))
            }
            SInt64 => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I64(wire::zigzag_decode64(v)), n))
            }
            Enum => {
                let (v, n) = wire::read_varint(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I32(v as i32), n))
            }
            Fixed32 => {
                let (v, n) = wire::read_fixed32(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::U32(v), n))
            }
            SFixed32 => {
                let (v, n) = wire::read_fixed32(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I32(v as i32), n))
            }
            Float => {
                let (v, n) = wire::read_fixed32(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::F32(f32::from_bits(v)), n))
            }
            Fixed64 => {
                let (v, n) = wire::read_fixed64(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::U64(v), n))
            }
            SFixed64 => {
                let (v, n) = wire::read_fixed64(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::I64(v as i64), n))
            }
            Double => {
                let (v, n) = wire::read_fixed64(bounded, pos).map_err(|e| bound(e, top_level))?;
                Ok((Value::F64(f64::from_bits(v)), n))
            }
            String => {
                let (bytes, n) = wire::read_length_delimited(bounded, pos).map_err(|e| bound(e, top_level))?;
                if self.opts.check_utf8 {
                    core::str::from_utf8(bytes).map_err(|_| DecodeError::BadUtf8)?;
                }
                let view = self.view_of(bytes)?;
                Ok((Value::String(view), n))
            }
            Bytes => {
                let (bytes, n) = wire::read_length_delimited(bounded, pos).map_err(|e| bound(e, top_level))?;
                let view = self.view_of(bytes)?;
                Ok((Value::Bytes(view), n))
            }
            Message | Group => unreachable!("message fields are handled by their own caller"),
        }
    }

    fn view_of(&self, bytes: &'a [u8]) -> Result<StringView<'a>, DecodeError> {
        if self.opts.alias_string {
            Ok(StringView::aliased(bytes))
        } else {
            let owned = self.arena.dupe(bytes).ok_or(DecodeError::OutOfMemory)?;
            Ok(StringView::owned(owned))
        }
    }

    fn decode_repeated(
        &mut self,
        msg: &mut Message<'a>,
        field: &'static FieldDescriptor,
        tag: Tag,
        pos: usize,
        end: usize,
        depth: u8,
        top_level: bool,
    ) -> Result<usize, DecodeError> {
        if matches!(field.field_type, FieldType::Message | FieldType::Group) {
            if tag.wire_type != WireType::LengthDelimited {
                return Err(DecodeError::WireTypeMismatch);
            }
            let (body, consumed) =
                wire::read_length_delimited(&self.input[..end], pos).map_err(|e| bound(e, top_level))?;
            let body_start = pos + (consumed - body.len());
            let body_end = body_start + body.len();
            let sub_table = msg.table.submessage(field).expect("message field without submessage table");
            let mut child = Message::new(sub_table);
            self.decode_into(&mut child, body_start, body_end, depth + 1, false)?;
            let RepeatedSlot::Message(r) = msg.repeated_slot_mut(field) else {
                unreachable!("message-typed field without a Message repeated slot")
            };
            r.push(Box::new(child)).ok_or(DecodeError::OutOfMemory)?;
            return Ok(body_end);
        }

        // proto3 leniency: a packable field with length-delimited wire
        // type is a packed block; the field's own native wire type always
        // decodes as a single unpacked element, even when `is_packed` is
        // set on the schema.
        if tag.wire_type == WireType::LengthDelimited && field.field_type.is_packable() {
            let (body, consumed) =
                wire::read_length_delimited(&self.input[..end], pos).map_err(|e| bound(e, top_level))?;
            let body_start = pos + (consumed - body.len());
            let body_end = body_start + body.len();
            let mut elem_pos = body_start;
            while elem_pos < body_end {
                let (value, n) = self.read_scalar_value(field.field_type, elem_pos, body_end, false)?;
                elem_pos += n;
                push_repeated(msg.repeated_slot_mut(field), value)?;
            }
            if elem_pos != body_end {
                return Err(DecodeError::Malformed);
            }
            return Ok(body_end);
        }

        if tag.wire_type != field.field_type.wire_type() {
            return Err(DecodeError::WireTypeMismatch);
        }
        let (value, consumed) = self.read_scalar_value(field.field_type, pos, end, top_level)?;
        push_repeated(msg.repeated_slot_mut(field), value)?;
        Ok(pos + consumed)
    }

    /// Decodes one `(key, value)` map entry. A map field's schema names a
    /// synthetic two-field entry [`MessageTable`] (key at field 1, value
    /// at field 2) via `submessage`, exactly like protoc's generated
    /// `FooEntry` messages; decoding an entry is therefore just decoding
    /// that tiny submessage and pulling its two fields back out.
    fn decode_map_entry(
        &mut self,
        msg: &mut Message<'a>,
        field: &'static FieldDescriptor,
        tag: Tag,
        pos: usize,
        end: usize,
        depth: u8,
        top_level: bool,
    ) -> Result<usize, DecodeError> {
        if tag.wire_type != WireType::LengthDelimited {
            return Err(DecodeError::WireTypeMismatch);
        }
        let (body, consumed) =
            wire::read_length_delimited(&self.input[..end], pos).map_err(|e| bound(e, top_level))?;
        let body_start = pos + (consumed - body.len());
        let body_end = body_start + body.len();
        let entry_table = msg.table.submessage(field).expect("map field without an entry table");
        let mut entry = Message::new(entry_table);
        self.decode_into(&mut entry, body_start, body_end, depth + 1, false)?;

        let key_field = entry_table.field_by_number(1).expect("map entry missing key field");
        let value_field = entry_table.field_by_number(2).expect("map entry missing value field");
        let key = map_key_from_value(entry.get_scalar(key_field), key_field.field_type)?;
        let value = if matches!(value_field.field_type, FieldType::Message | FieldType::Group) {
            let child = entry
                .take_submessage(value_field)
                .unwrap_or_else(|| Box::new(Message::new(entry_table.submessage(value_field).unwrap())));
            MapValue::Message(child)
        } else if entry.has_field(value_field) {
            MapValue::Scalar(entry.get_scalar(value_field))
        } else {
            MapValue::Scalar(zero_value(value_field.field_type))
        };
        msg.map_slot_mut(field).insert(key, value);
        Ok(body_end)
    }
}

fn push_repeated<'a>(slot: &mut RepeatedSlot<'a>, value: Value<'a>) -> Result<(), DecodeError> {
    let ok = match (slot, value) {
        (RepeatedSlot::I32(r), Value::I32(v)) => r.push(v),
        (RepeatedSlot::I64(r), Value::I64(v)) => r.push(v),
        (RepeatedSlot::U32(r), Value::U32(v)) => r.push(v),
        (RepeatedSlot::U64(r), Value::U64(v)) => r.push(v),
        (RepeatedSlot::F32(r), Value::F32(v)) => r.push(v),
        (RepeatedSlot::F64(r), Value::F64(v)) => r.push(v),
        (RepeatedSlot::Bool(r), Value::Bool(v)) => r.push(v),
        (RepeatedSlot::String(r), Value::String(v)) => r.push(v),
        (RepeatedSlot::Bytes(r), Value::Bytes(v)) => r.push(v),
        _ => unreachable!("read_scalar_value's variant never mismatches the slot's element type"),
    };
    ok.ok_or(DecodeError::OutOfMemory)
}

fn zero_value<'a>(field_type: FieldType) -> Value<'a> {
    use FieldType::*;
    match field_type {
        Double => Value::F64(0.0),
        Float => Value::F32(0.0),
        Int32 | SInt32 | SFixed32 | Enum => Value::I32(0),
        Int64 | SInt64 | SFixed64 => Value::I64(0),
        UInt32 | Fixed32 => Value::U32(0),
        UInt64 | Fixed64 => Value::U64(0),
        Bool => Value::Bool(false),
        String => Value::String(StringView::owned(&[])),
        Bytes => Value::Bytes(StringView::owned(&[])),
        Message | Group => Value::None,
    }
}

fn map_key_from_value(value: Value<'_>, key_type: FieldType) -> Result<MapKey, DecodeError> {
    let value = if matches!(value, Value::None) { zero_value(key_type) } else { value };
    match value {
        Value::I32(v) => Ok(MapKey::I32(v)),
        Value::I64(v) => Ok(MapKey::I64(v)),
        Value::U32(v) => Ok(MapKey::U32(v)),
        Value::U64(v) => Ok(MapKey::U64(v)),
        Value::Bool(v) => Ok(MapKey::Bool(v)),
        Value::String(v) => Ok(MapKey::String(v.as_str().map_err(|_| DecodeError::BadUtf8)?.to_owned())),
        _ => Err(DecodeError::Malformed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{FieldMode, MessageTable, Presence};

    static INT32_FIELD1: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(1, 8, Presence::HasBit(1), FieldType::Int32, FieldMode::Scalar, false)],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn s1_int32_150_at_field_1() {
        let input = [0x08, 0x96, 0x01];
        let arena = Arena::new();
        let mut msg = Message::new(&INT32_FIELD1);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let f = INT32_FIELD1.field_by_number(1).unwrap();
        assert!(matches!(msg.get_scalar(f), Value::I32(150)));
    }

    #[test]
    fn s3_unknown_field_is_skipped() {
        let input = [0x08, 0x2A, 0xF8, 0x06, 0x7B];
        let arena = Arena::new();
        let mut msg = Message::new(&INT32_FIELD1);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let f = INT32_FIELD1.field_by_number(1).unwrap();
        assert!(matches!(msg.get_scalar(f), Value::I32(42)));
    }

    #[test]
    fn s4_overlong_tag_is_varint_overflow() {
        let input = [0x88, 0x80, 0x80, 0x80, 0x80, 0x00];
        let arena = Arena::new();
        let mut msg = Message::new(&INT32_FIELD1);
        assert_eq!(
            decode(&input, &mut msg, &arena, &DecodeOptions::default()),
            Err(DecodeError::VarintOverflow)
        );
    }

    static NESTED_TABLE: MessageTable = MessageTable {
        fields: &[
            FieldDescriptor::new(1, 0, Presence::HasBit(1), FieldType::Message, FieldMode::Scalar, false)
                .with_submessage(0),
        ],
        submessages: &[&INT32_FIELD1],
        size: 8,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn s5_truncated_submessage_is_malformed() {
        // Field 1 (message), declared length 4, but only 2 bytes follow.
        let input = [0x0A, 0x04, 0x08, 0x96];
        let arena = Arena::new();
        let mut msg = Message::new(&NESTED_TABLE);
        assert_eq!(
            decode(&input, &mut msg, &arena, &DecodeOptions::default()),
            Err(DecodeError::Malformed)
        );
    }

    static PACKED_REPEATED_INT32: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(1, 0, Presence::Implicit, FieldType::Int32, FieldMode::Repeated, true)],
        submessages: &[],
        size: 0,
        hasbit_bytes: 0,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn s6_packed_repeated_int32() {
        let input = [0x0A, 0x04, 0x01, 0x02, 0x96, 0x01];
        let arena = Arena::new();
        let mut msg = Message::new(&PACKED_REPEATED_INT32);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let f = PACKED_REPEATED_INT32.field_by_number(1).unwrap();
        let RepeatedSlot::I32(r) = msg.repeated_slot(f) else {
            panic!("expected i32 repeated slot");
        };
        assert_eq!(r.slice(), &[1, 2, 150]);
    }

    static INT32_STRING_ENTRY: MessageTable = MessageTable {
        fields: &[
            FieldDescriptor::new(1, 8, Presence::HasBit(1), FieldType::Int32, FieldMode::Scalar, false),
            FieldDescriptor::new(2, 0, Presence::HasBit(2), FieldType::String, FieldMode::Scalar, false),
        ],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 2,
    };

    static MAP_INT32_STRING: MessageTable = MessageTable {
        fields: &[
            FieldDescriptor::new(1, 0, Presence::Implicit, FieldType::String, FieldMode::Map, false)
                .with_submessage(0),
        ],
        submessages: &[&INT32_STRING_ENTRY],
        size: 0,
        hasbit_bytes: 0,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn s7_map_int32_string_entry() {
        let input = [0x0A, 0x09, 0x08, 0x2A, 0x12, 0x05, b'h', b'e', b'l', b'l', b'o'];
        let arena = Arena::new();
        let mut msg = Message::new(&MAP_INT32_STRING);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let f = MAP_INT32_STRING.field_by_number(1).unwrap();
        match msg.map_slot(f).get(&MapKey::I32(42)) {
            Some(MapValue::Scalar(Value::String(sv))) => assert_eq!(sv.as_str().unwrap(), "hello"),
            other => panic!("unexpected entry {other:?}"),
        }
    }

    #[test]
    fn unpacked_wire_accepted_for_packable_repeated_field() {
        // proto3 leniency: repeated field declared is_packed, but encoded
        // unpacked (each element with its own tag) still decodes.
        let input = [0x08, 0x01, 0x08, 0x02];
        let arena = Arena::new();
        let mut msg = Message::new(&PACKED_REPEATED_INT32);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let f = PACKED_REPEATED_INT32.field_by_number(1).unwrap();
        let RepeatedSlot::I32(r) = msg.repeated_slot(f) else {
            panic!("expected i32 repeated slot");
        };
        assert_eq!(r.slice(), &[1, 2]);
    }

    #[test]
    fn bad_utf8_string_is_rejected() {
        static STRING_FIELD1: MessageTable = MessageTable {
            fields: &[FieldDescriptor::new(1, 0, Presence::HasBit(1), FieldType::String, FieldMode::Scalar, false)],
            submessages: &[],
            size: 8,
            hasbit_bytes: 8,
            oneof_count: 0,
            dense_below: 1,
        };
        let input = [0x0A, 0x02, 0xFF, 0xFE];
        let arena = Arena::new();
        let mut msg = Message::new(&STRING_FIELD1);
        assert_eq!(
            decode(&input, &mut msg, &arena, &DecodeOptions::default()),
            Err(DecodeError::BadUtf8)
        );
    }

    #[test]
    fn max_depth_exceeded_on_deep_self_nesting() {
        static SELF_NESTED: MessageTable = MessageTable {
            fields: &[
                FieldDescriptor::new(1, 0, Presence::HasBit(1), FieldType::Message, FieldMode::Scalar, false)
                    .with_submessage(0),
            ],
            submessages: &[&SELF_NESTED],
            size: 8,
            hasbit_bytes: 8,
            oneof_count: 0,
            dense_below: 1,
        };
        // Build 200 levels of nesting from the inside out: the innermost
        // message is empty, and each wrap adds one `message` field whose
        // body is the previous level's full bytes.
        let mut input: Vec<u8> = Vec::new();
        for _ in 0..200 {
            let mut wrapped = vec![0x0Au8];
            let mut len_buf = [0u8; 10];
            let n = wire::write_varint(input.len() as u64, &mut len_buf);
            wrapped.extend_from_slice(&len_buf[..n]);
            wrapped.extend_from_slice(&input);
            input = wrapped;
        }
        let arena = Arena::new();
        let mut msg = Message::new(&SELF_NESTED);
        let opts = DecodeOptions { max_depth: 10, ..DecodeOptions::default() };
        assert_eq!(
            decode(&input, &mut msg, &arena, &opts),
            Err(DecodeError::MaxDepthExceeded)
        );
    }
}
