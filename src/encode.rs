//! Two-pass encoder: a size pass computes the exact output length, then a
//! write pass fills an arena-allocated buffer of that size. The two-pass
//! shape is the well-known upb/protobuf-C idiom, built here directly
//! against `table.rs`/`message.rs`.

use crate::arena::Arena;
use crate::containers::{MapKey, MapValue, Value};
use crate::error::EncodeError;
use crate::message::Message;
use crate::table::{FieldDescriptor, FieldMode, FieldType, MessageTable};
use crate::wire::{self, WireType};

/// Largest encodable message size: `2^31 - 1`, the largest value a
/// protobuf length prefix (a 32-bit signed int) can hold.
const MAX_MESSAGE_SIZE: usize = (1 << 31) - 1;

#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    /// Accepted for API symmetry with `decode`, but currently inert: the
    /// core decoder never populates `Message::unknown_fields`, so there is
    /// nothing for this flag to skip or preserve.
    pub skip_unknown: bool,
    /// Emit map entries sorted by key instead of insertion order, for
    /// byte-stable output across equivalent maps.
    pub deterministic: bool,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions { skip_unknown: true, deterministic: false }
    }
}

/// Encodes `msg` to wire format, allocating the output buffer from
/// `arena`.
pub fn encode<'a>(
    msg: &Message<'a>,
    arena: &'a Arena,
    opts: &EncodeOptions,
) -> Result<&'a [u8], EncodeError> {
    let size = message_size(msg, opts);
    if size > MAX_MESSAGE_SIZE {
        return Err(EncodeError::MaxSizeExceeded);
    }
    let buf = arena.alloc_bytes(size).ok_or(EncodeError::OutOfMemory)?;
    let mut pos = 0;
    write_message(buf, &mut pos, msg, opts);
    debug_assert_eq!(pos, size);
    Ok(buf)
}

fn message_size(msg: &Message, opts: &EncodeOptions) -> usize {
    msg.table.fields.iter().map(|f| field_size(msg.table, f, msg, opts)).sum()
}

fn field_size(table: &MessageTable, field: &FieldDescriptor, msg: &Message, opts: &EncodeOptions) -> usize {
    match field.mode {
        FieldMode::Scalar => {
            if !msg.has_field(field) {
                return 0;
            }
            if matches!(field.field_type, FieldType::Message | FieldType::Group) {
                let child = msg.submessage(field).expect("has_field true but no submessage present");
                let sub_size = message_size(child, opts);
                wire::tag_size(field.number, WireType::LengthDelimited) + wire::varint_size(sub_size as u64) + sub_size
            } else {
                let value = msg.get_scalar(field);
                wire::tag_size(field.number, field.field_type.wire_type()) + scalar_body_size(field.field_type, &value)
            }
        }
        FieldMode::Repeated => {
            let slot = msg.repeated_slot(field);
            let n = slot.len();
            if n == 0 {
                return 0;
            }
            if field.is_packed && field.field_type.is_packable() {
                let data_size: usize = (0..n).map(|i| scalar_body_size(field.field_type, &slot.value_at(i))).sum();
                wire::tag_size(field.number, WireType::LengthDelimited) + wire::varint_size(data_size as u64) + data_size
            } else {
                (0..n)
                    .map(|i| {
                        wire::tag_size(field.number, field.field_type.wire_type())
                            + element_wire_size(field.field_type, &slot.value_at(i), opts)
                    })
                    .sum()
            }
        }
        FieldMode::Map => {
            let map = msg.map_slot(field);
            let entry_table = table.submessage(field).expect("map field without an entry table");
            let key_field = entry_table.field_by_number(1).expect("map entry missing key field");
            let value_field = entry_table.field_by_number(2).expect("map entry missing value field");
            map.iter()
                .map(|(k, v)| {
                    let entry_size = map_entry_size(key_field, value_field, k, v, opts);
                    wire::tag_size(field.number, WireType::LengthDelimited) + wire::varint_size(entry_size as u64) + entry_size
                })
                .sum()
        }
    }
}

fn map_entry_size(
    key_field: &FieldDescriptor,
    value_field: &FieldDescriptor,
    key: &MapKey,
    value: &MapValue,
    opts: &EncodeOptions,
) -> usize {
    let key_value = map_key_to_value(key);
    let key_size = wire::tag_size(key_field.number, key_field.field_type.wire_type())
        + scalar_body_size(key_field.field_type, &key_value);
    let value_size = match value {
        MapValue::Scalar(v) => {
            wire::tag_size(value_field.number, value_field.field_type.wire_type()) + scalar_body_size(value_field.field_type, v)
        }
        MapValue::Message(child) => {
            let sub_size = message_size(child, opts);
            wire::tag_size(value_field.number, WireType::LengthDelimited) + wire::varint_size(sub_size as u64) + sub_size
        }
    };
    key_size + value_size
}

/// Size of one repeated/map element's body, including a submessage's own
/// length prefix when `value` is [`Value::Message`].
fn element_wire_size(field_type: FieldType, value: &Value, opts: &EncodeOptions) -> usize {
    if let Value::Message(child) = value {
        let sub_size = message_size(child, opts);
        wire::varint_size(sub_size as u64) + sub_size
    } else {
        scalar_body_size(field_type, value)
    }
}

/// Size of a scalar value's wire body (no tag). Mirrors
/// [`write_scalar_body`] field-for-field.
fn scalar_body_size(field_type: FieldType, value: &Value) -> usize {
    use FieldType::*;
    match (field_type, value) {
        (Bool, Value::Bool(_)) => 1,
        (Int32 | Enum, Value::I32(v)) => wire::varint_size(*v as i64 as u64),
        (SInt32, Value::I32(v)) => wire::varint_size(wire::zigzag_encode32(*v) as u64),
        (SFixed32, Value::I32(_)) => 4,
        (Int64, Value::I64(v)) => wire::varint_size(*v as u64),
        (SInt64, Value::I64(v)) => wire::varint_size(wire::zigzag_encode64(*v)),
        (SFixed64, Value::I64(_)) => 8,
        (UInt32, Value::U32(v)) => wire::varint_size(*v as u64),
        (Fixed32, Value::U32(_)) => 4,
        (UInt64, Value::U64(v)) => wire::varint_size(*v),
        (Fixed64, Value::U64(_)) => 8,
        (Float, Value::F32(_)) => 4,
        (Double, Value::F64(_)) => 8,
        (String, Value::String(v)) => wire::varint_size(v.len() as u64) + v.len(),
        (Bytes, Value::Bytes(v)) => wire::varint_size(v.len() as u64) + v.len(),
        (ft, v) => unreachable!("field type {ft:?} does not match stored value {v:?}"),
    }
}

fn write_message(out: &mut [u8], pos: &mut usize, msg: &Message, opts: &EncodeOptions) {
    for field in msg.table.fields {
        write_field(msg.table, field, msg, out, pos, opts);
    }
}

fn write_field(table: &MessageTable, field: &FieldDescriptor, msg: &Message, out: &mut [u8], pos: &mut usize, opts: &EncodeOptions) {
    match field.mode {
        FieldMode::Scalar => {
            if !msg.has_field(field) {
                return;
            }
            if matches!(field.field_type, FieldType::Message | FieldType::Group) {
                let child = msg.submessage(field).expect("has_field true but no submessage present");
                write_tag(out, pos, field.number, WireType::LengthDelimited);
                let sub_size = message_size(child, opts);
                write_length_prefix(out, pos, sub_size);
                write_message(out, pos, child, opts);
            } else {
                let value = msg.get_scalar(field);
                write_tag(out, pos, field.number, field.field_type.wire_type());
                write_scalar_body(out, pos, field.field_type, &value);
            }
        }
        FieldMode::Repeated => {
            let slot = msg.repeated_slot(field);
            let n = slot.len();
            if n == 0 {
                return;
            }
            if field.is_packed && field.field_type.is_packable() {
                write_tag(out, pos, field.number, WireType::LengthDelimited);
                let data_size: usize = (0..n).map(|i| scalar_body_size(field.field_type, &slot.value_at(i))).sum();
                write_length_prefix(out, pos, data_size);
                for i in 0..n {
                    write_scalar_body(out, pos, field.field_type, &slot.value_at(i));
                }
            } else {
                for i in 0..n {
                    let value = slot.value_at(i);
                    write_tag(out, pos, field.number, field.field_type.wire_type());
                    write_element(out, pos, field.field_type, &value, opts);
                }
            }
        }
        FieldMode::Map => {
            let map = msg.map_slot(field);
            let entry_table = table.submessage(field).expect("map field without an entry table");
            let key_field = entry_table.field_by_number(1).expect("map entry missing key field");
            let value_field = entry_table.field_by_number(2).expect("map entry missing value field");
            let entries: Vec<&(MapKey, MapValue)> =
                if opts.deterministic { map.sorted_by_key() } else { map.iter().collect() };
            for (k, v) in entries {
                let entry_size = map_entry_size(key_field, value_field, k, v, opts);
                write_tag(out, pos, field.number, WireType::LengthDelimited);
                write_length_prefix(out, pos, entry_size);
                let key_value = map_key_to_value(k);
                write_tag(out, pos, key_field.number, key_field.field_type.wire_type());
                write_scalar_body(out, pos, key_field.field_type, &key_value);
                match v {
                    MapValue::Scalar(vv) => {
                        write_tag(out, pos, value_field.number, value_field.field_type.wire_type());
                        write_scalar_body(out, pos, value_field.field_type, vv);
                    }
                    MapValue::Message(child) => {
                        write_tag(out, pos, value_field.number, WireType::LengthDelimited);
                        let sub_size = message_size(child, opts);
                        write_length_prefix(out, pos, sub_size);
                        write_message(out, pos, child, opts);
                    }
                }
            }
        }
    }
}

fn write_element(out: &mut [u8], pos: &mut usize, field_type: FieldType, value: &Value, opts: &EncodeOptions) {
    if let Value::Message(child) = value {
        let sub_size = message_size(child, opts);
        write_length_prefix(out, pos, sub_size);
        write_message(out, pos, child, opts);
    } else {
        write_scalar_body(out, pos, field_type, value);
    }
}

fn write_tag(out: &mut [u8], pos: &mut usize, field_number: u32, wire_type: WireType) {
    let n = wire::write_tag(field_number, wire_type, &mut out[*pos..]);
    *pos += n;
}

fn write_length_prefix(out: &mut [u8], pos: &mut usize, len: usize) {
    let n = wire::write_varint(len as u64, &mut out[*pos..]);
    *pos += n;
}

fn write_scalar_body(out: &mut [u8], pos: &mut usize, field_type: FieldType, value: &Value) {
    use FieldType::*;
    let n = match (field_type, value) {
        (Bool, Value::Bool(v)) => {
            out[*pos] = *v as u8;
            1
        }
        (Int32 | Enum, Value::I32(v)) => wire::write_varint(*v as i64 as u64, &mut out[*pos..]),
        (SInt32, Value::I32(v)) => wire::write_varint(wire::zigzag_encode32(*v) as u64, &mut out[*pos..]),
        (SFixed32, Value::I32(v)) => {
            out[*pos..*pos + 4].copy_from_slice(&v.to_le_bytes());
            4
        }
        (Int64, Value::I64(v)) => wire::write_varint(*v as u64, &mut out[*pos..]),
        (SInt64, Value::I64(v)) => wire::write_varint(wire::zigzag_encode64(*v), &mut out[*pos..]),
        (SFixed64, Value::I64(v)) => {
            out[*pos..*pos + 8].copy_from_slice(&v.to_le_bytes());
            8
        }
        (UInt32, Value::U32(v)) => wire::write_varint(*v as u64, &mut out[*pos..]),
        (Fixed32, Value::U32(v)) => {
            out[*pos..*pos + 4].copy_from_slice(&v.to_le_bytes());
            4
        }
        (UInt64, Value::U64(v)) => wire::write_varint(*v, &mut out[*pos..]),
        (Fixed64, Value::U64(v)) => {
            out[*pos..*pos + 8].copy_from_slice(&v.to_le_bytes());
            8
        }
        (Float, Value::F32(v)) => {
            out[*pos..*pos + 4].copy_from_slice(&v.to_bits().to_le_bytes());
            4
        }
        (Double, Value::F64(v)) => {
            out[*pos..*pos + 8].copy_from_slice(&v.to_bits().to_le_bytes());
            8
        }
        (String, Value::String(v)) => {
            write_length_prefix(out, pos, v.len());
            out[*pos..*pos + v.len()].copy_from_slice(v.bytes());
            v.len()
        }
        (Bytes, Value::Bytes(v)) => {
            write_length_prefix(out, pos, v.len());
            out[*pos..*pos + v.len()].copy_from_slice(v.bytes());
            v.len()
        }
        (ft, v) => unreachable!("field type {ft:?} does not match stored value {v:?}"),
    };
    *pos += n;
}

fn map_key_to_value(key: &MapKey) -> Value<'_> {
    match key {
        MapKey::I32(v) => Value::I32(*v),
        MapKey::I64(v) => Value::I64(*v),
        MapKey::U32(v) => Value::U32(*v),
        MapKey::U64(v) => Value::U64(*v),
        MapKey::Bool(v) => Value::Bool(*v),
        MapKey::String(s) => Value::String(crate::containers::StringView::owned(s.as_bytes())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{decode, DecodeOptions};
    use crate::table::Presence;

    static INT32_FIELD1: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(1, 8, Presence::HasBit(1), FieldType::Int32, FieldMode::Scalar, false)],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn s1_round_trips_byte_exact() {
        let input = [0x08, 0x96, 0x01];
        let arena = Arena::new();
        let mut msg = Message::new(&INT32_FIELD1);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let out = encode(&msg, &arena, &EncodeOptions::default()).unwrap();
        assert_eq!(out, &input);
    }

    static STRING_FIELD2: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(2, 0, Presence::HasBit(1), FieldType::String, FieldMode::Scalar, false)],
        submessages: &[],
        size: 8,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 0,
    };

    #[test]
    fn s2_string_round_trips_byte_exact() {
        let input = [0x12, 0x07, b't', b'e', b's', b't', b'i', b'n', b'g'];
        let arena = Arena::new();
        let mut msg = Message::new(&STRING_FIELD2);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let out = encode(&msg, &arena, &EncodeOptions::default()).unwrap();
        assert_eq!(out, &input);
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
    fn s6_packed_repeated_round_trips_byte_exact() {
        let input = [0x0A, 0x04, 0x01, 0x02, 0x96, 0x01];
        let arena = Arena::new();
        let mut msg = Message::new(&PACKED_REPEATED_INT32);
        decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
        let out = encode(&msg, &arena, &EncodeOptions::default()).unwrap();
        assert_eq!(out, &input);
    }

    #[test]
    fn implicit_zero_field_is_not_emitted() {
        let arena = Arena::new();
        let msg = Message::new(&PACKED_REPEATED_INT32);
        let out = encode(&msg, &arena, &EncodeOptions::default()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn deterministic_maps_emit_sorted_by_key() {
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
        let arena = Arena::new();
        let mut msg = Message::new(&MAP_INT32_STRING);
        let f = MAP_INT32_STRING.field_by_number(1).unwrap();
        msg.map_slot_mut(f).insert(
            MapKey::I32(5),
            MapValue::Scalar(Value::String(crate::containers::StringView::owned(b"five"))),
        );
        msg.map_slot_mut(f).insert(
            MapKey::I32(1),
            MapValue::Scalar(Value::String(crate::containers::StringView::owned(b"one"))),
        );
        let opts = EncodeOptions { deterministic: true, ..EncodeOptions::default() };
        let out = encode(&msg, &arena, &opts).unwrap();
        // Entry for key 1 ("one") must precede entry for key 5 ("five").
        let one_pos = out.windows(3).position(|w| w == b"one").unwrap();
        let five_pos = out.windows(4).position(|w| w == b"five").unwrap();
        assert!(one_pos < five_pos);
    }
}
