//! The message runtime: a schema-shaped view over field storage, with
//! hasbits, oneof case tags, and typed scalar/repeated/map access.
//!
//! A message keeps its raw byte blob only for the genuinely fixed-size,
//! `Copy` portion of the data (hasbits, oneof case tags, and plain-old-data
//! scalar fields), accessed through narrowly scoped `unsafe`, bounds-
//! checked before every cast. Everything else a message can hold (owned
//! or borrowed strings, repeated arrays, maps, and child messages) lives
//! in a plain Rust `Vec` of typed slots instead of being reinterpreted
//! from bytes, because those types cannot be soundly read back out of a
//! byte blob without either `unsafe` far more dangerous than a bounds-
//! checked primitive cast, or duplicating what `Vec`/`Box` already do
//! safely.

use core::fmt;

use crate::arena::Arena;
use crate::containers::{MapField, RepeatedField, StringView, Value};
use crate::table::{FieldDescriptor, FieldMode, FieldType, MessageTable, Presence};

/// Storage for one non-inline-POD field: a singular `String`/`Bytes`/
/// `Message` scalar, a repeated array of some element type, or a map.
pub enum FieldSlot<'a> {
    Scalar(Value<'a>),
    /// A singular `message`-typed field. Kept distinct from `Scalar`
    /// because a submessage is owned by its parent (a `Box`), whereas
    /// [`Value::Message`] only ever hands out a borrow of one.
    SubMessage(Option<Box<Message<'a>>>),
    Repeated(RepeatedSlot<'a>),
    Map(MapField<'a>),
}

/// A repeated field's backing array, tagged by element type. One variant
/// per `element_size()` shape in `table.rs`; `Message` elements are
/// `Box`-owned rather than arena-carved (see `DESIGN.md` for why).
pub enum RepeatedSlot<'a> {
    I32(RepeatedField<i32>),
    I64(RepeatedField<i64>),
    U32(RepeatedField<u32>),
    U64(RepeatedField<u64>),
    F32(RepeatedField<f32>),
    F64(RepeatedField<f64>),
    Bool(RepeatedField<bool>),
    String(RepeatedField<StringView<'a>>),
    Bytes(RepeatedField<StringView<'a>>),
    Message(RepeatedField<Box<Message<'a>>>),
}

impl<'a> RepeatedSlot<'a> {
    fn new_for(field_type: FieldType) -> Self {
        use FieldType::*;
        match field_type {
            Int32 | SInt32 | SFixed32 | Enum => RepeatedSlot::I32(RepeatedField::new()),
            Int64 | SInt64 | SFixed64 => RepeatedSlot::I64(RepeatedField::new()),
            UInt32 | Fixed32 => RepeatedSlot::U32(RepeatedField::new()),
            UInt64 | Fixed64 => RepeatedSlot::U64(RepeatedField::new()),
            Float => RepeatedSlot::F32(RepeatedField::new()),
            Double => RepeatedSlot::F64(RepeatedField::new()),
            Bool => RepeatedSlot::Bool(RepeatedField::new()),
            String => RepeatedSlot::String(RepeatedField::new()),
            Bytes => RepeatedSlot::Bytes(RepeatedField::new()),
            Message | Group => RepeatedSlot::Message(RepeatedField::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RepeatedSlot::I32(r) => r.len(),
            RepeatedSlot::I64(r) => r.len(),
            RepeatedSlot::U32(r) => r.len(),
            RepeatedSlot::U64(r) => r.len(),
            RepeatedSlot::F32(r) => r.len(),
            RepeatedSlot::F64(r) => r.len(),
            RepeatedSlot::Bool(r) => r.len(),
            RepeatedSlot::String(r) => r.len(),
            RepeatedSlot::Bytes(r) => r.len(),
            RepeatedSlot::Message(r) => r.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows element `i` as a reflective [`Value`], for the encoder's
    /// uniform per-element size/write logic.
    pub fn value_at(&self, i: usize) -> Value<'a> {
        match self {
            RepeatedSlot::I32(r) => Value::I32(r.slice()[i]),
            RepeatedSlot::I64(r) => Value::I64(r.slice()[i]),
            RepeatedSlot::U32(r) => Value::U32(r.slice()[i]),
            RepeatedSlot::U64(r) => Value::U64(r.slice()[i]),
            RepeatedSlot::F32(r) => Value::F32(r.slice()[i]),
            RepeatedSlot::F64(r) => Value::F64(r.slice()[i]),
            RepeatedSlot::Bool(r) => Value::Bool(r.slice()[i]),
            RepeatedSlot::String(r) => Value::String(r.slice()[i]),
            RepeatedSlot::Bytes(r) => Value::Bytes(r.slice()[i]),
            RepeatedSlot::Message(r) => Value::Message(&r.slice()[i]),
        }
    }
}

/// A message instance: schema plus the field storage it describes.
///
/// `'a` is the lifetime shared by every borrowed or arena-duped byte a
/// decode into this message produced; it must outlive the message itself.
pub struct Message<'a> {
    pub table: &'static MessageTable,
    /// Hasbits, then oneof case tags, then inline POD scalar fields, laid
    /// out exactly as `table` describes (`table.size` bytes).
    pod: Vec<u8>,
    /// One entry per non-inline-POD field, indexed by that field's
    /// `offset` (see `FieldDescriptor::offset`'s doc comment).
    slots: Vec<FieldSlot<'a>>,
    pub unknown_fields: Option<Vec<u8>>,
}

impl<'a> Message<'a> {
    /// Builds an empty message tied to `arena`'s lifetime: every
    /// borrowed/arena-duped byte a later decode into this message produces
    /// is guaranteed to outlive it. The message's own storage (`pod` and
    /// `slots`) is plain heap allocation, not carved out of `arena` itself;
    /// `arena` only anchors the `'a` lifetime, the same role it plays for
    /// every other borrow a decode hands back.
    pub fn new_in(arena: &'a Arena, table: &'static MessageTable) -> Self {
        let _ = arena;
        Message::new(table)
    }

    pub fn new(table: &'static MessageTable) -> Self {
        let mut slot_count = 0usize;
        for f in table.fields {
            if !f.is_inline_pod() {
                slot_count = slot_count.max(f.offset + 1);
            }
        }
        let mut slots = Vec::with_capacity(slot_count);
        for _ in 0..slot_count {
            slots.push(FieldSlot::Scalar(Value::None));
        }
        for f in table.fields {
            if f.is_inline_pod() {
                continue;
            }
            slots[f.offset] = match f.mode {
                FieldMode::Scalar if matches!(f.field_type, FieldType::Message | FieldType::Group) => {
                    FieldSlot::SubMessage(None)
                }
                FieldMode::Scalar => FieldSlot::Scalar(Value::None),
                FieldMode::Repeated => FieldSlot::Repeated(RepeatedSlot::new_for(f.field_type)),
                FieldMode::Map => FieldSlot::Map(MapField::new()),
            };
        }
        Message {
            table,
            pod: vec![0u8; table.size],
            slots,
            unknown_fields: None,
        }
    }

    fn has_bit(&self, idx: u32) -> bool {
        let bit = (idx - 1) as usize;
        let byte = bit / 8;
        self.pod[byte] & (1 << (bit % 8)) != 0
    }

    fn set_has_bit(&mut self, idx: u32) {
        let bit = (idx - 1) as usize;
        let byte = bit / 8;
        self.pod[byte] |= 1 << (bit % 8);
    }

    fn clear_has_bit(&mut self, idx: u32) {
        let bit = (idx - 1) as usize;
        let byte = bit / 8;
        self.pod[byte] &= !(1 << (bit % 8));
    }

    fn oneof_case(&self, idx: u32) -> u32 {
        self.get_at::<u32>(self.table.oneof_case_offset(idx))
    }

    fn set_oneof_case(&mut self, idx: u32, field_number: u32) {
        let offset = self.table.oneof_case_offset(idx);
        self.set_at::<u32>(offset, field_number);
    }

    /// Reads a `Copy`, plain-old-data value at `offset` in the POD region.
    ///
    /// # Panics
    /// Panics if `offset + size_of::<T>()` exceeds the POD region; callers
    /// only ever invoke this with offsets computed from a validated
    /// `MessageTable`, so this indicates a schema bug, not untrusted input.
    fn get_at<T: Copy>(&self, offset: usize) -> T {
        let size = core::mem::size_of::<T>();
        let bytes = &self.pod[offset..offset + size];
        unsafe { core::ptr::read_unaligned(bytes.as_ptr() as *const T) }
    }

    fn set_at<T: Copy>(&mut self, offset: usize, value: T) {
        let size = core::mem::size_of::<T>();
        let bytes = &mut self.pod[offset..offset + size];
        unsafe { core::ptr::write_unaligned(bytes.as_mut_ptr() as *mut T, value) };
    }

    fn presence_tracked_and_set(&self, field: &FieldDescriptor) -> bool {
        match field.presence {
            Presence::HasBit(idx) => self.has_bit(idx),
            Presence::Oneof(idx) => self.oneof_case(idx) == field.number,
            Presence::Implicit => true,
        }
    }

    /// Reads a scalar field's value. Returns [`Value::None`] only when
    /// presence is tracked (hasbit or oneof) and the field was never set;
    /// proto3-implicit fields always read their stored value, even if it
    /// is the type's zero/default.
    pub fn get_scalar(&self, field: &FieldDescriptor) -> Value<'_> {
        debug_assert_eq!(field.mode, FieldMode::Scalar);
        if !self.presence_tracked_and_set(field) {
            return Value::None;
        }
        if field.is_inline_pod() {
            self.read_inline(field)
        } else {
            match &self.slots[field.offset] {
                FieldSlot::Scalar(v) => v.clone(),
                FieldSlot::SubMessage(Some(m)) => Value::Message(m),
                FieldSlot::SubMessage(None) => Value::None,
                _ => unreachable!("scalar field pointed at a non-scalar slot"),
            }
        }
    }

    /// Returns the child message stored in a singular `message`-typed
    /// field, if one has been decoded or set.
    pub fn submessage(&self, field: &FieldDescriptor) -> Option<&Message<'a>> {
        match &self.slots[field.offset] {
            FieldSlot::SubMessage(opt) => opt.as_deref(),
            _ => unreachable!("message field pointed at a non-submessage slot"),
        }
    }

    /// Mutable access to a singular `message`-typed field's child,
    /// creating it (and setting presence) if absent.
    pub fn submessage_mut(&mut self, field: &FieldDescriptor) -> &mut Message<'a> {
        let table = self.table.submessage(field).expect("message field without a submessage table");
        match field.presence {
            Presence::HasBit(idx) => self.set_has_bit(idx),
            Presence::Oneof(idx) => self.set_oneof_case(idx, field.number),
            Presence::Implicit => {}
        }
        let slot = &mut self.slots[field.offset];
        if let FieldSlot::SubMessage(opt) = slot {
            opt.get_or_insert_with(|| Box::new(Message::new(table)))
        } else {
            unreachable!("message field pointed at a non-submessage slot")
        }
    }

    /// Removes and returns this field's child message, if set, leaving the
    /// slot empty (presence is left untouched: callers that mean to fully
    /// clear the field should call [`Message::clear_field`] too).
    pub fn take_submessage(&mut self, field: &FieldDescriptor) -> Option<Box<Message<'a>>> {
        match &mut self.slots[field.offset] {
            FieldSlot::SubMessage(opt) => opt.take(),
            _ => unreachable!("message field pointed at a non-submessage slot"),
        }
    }

    /// Installs an already-decoded child message, taking ownership.
    pub fn set_submessage(&mut self, field: &FieldDescriptor, child: Box<Message<'a>>) {
        self.slots[field.offset] = FieldSlot::SubMessage(Some(child));
        match field.presence {
            Presence::HasBit(idx) => self.set_has_bit(idx),
            Presence::Oneof(idx) => self.set_oneof_case(idx, field.number),
            Presence::Implicit => {}
        }
    }

    fn read_inline(&self, field: &FieldDescriptor) -> Value<'_> {
        use FieldType::*;
        match field.field_type {
            Bool => Value::Bool(self.get_at::<u8>(field.offset) != 0),
            Int32 | SInt32 | SFixed32 | Enum => Value::I32(self.get_at::<i32>(field.offset)),
            Int64 | SInt64 | SFixed64 => Value::I64(self.get_at::<i64>(field.offset)),
            UInt32 | Fixed32 => Value::U32(self.get_at::<u32>(field.offset)),
            UInt64 | Fixed64 => Value::U64(self.get_at::<u64>(field.offset)),
            Float => Value::F32(self.get_at::<f32>(field.offset)),
            Double => Value::F64(self.get_at::<f64>(field.offset)),
            String | Bytes | Message | Group => {
                unreachable!("non-POD field type marked inline")
            }
        }
    }

    fn write_inline(&mut self, field: &FieldDescriptor, value: &Value<'a>) {
        use FieldType::*;
        match (field.field_type, value) {
            (Bool, Value::Bool(v)) => self.set_at::<u8>(field.offset, *v as u8),
            (Int32 | SInt32 | SFixed32 | Enum, Value::I32(v)) => {
                self.set_at::<i32>(field.offset, *v)
            }
            (Int64 | SInt64 | SFixed64, Value::I64(v)) => self.set_at::<i64>(field.offset, *v),
            (UInt32 | Fixed32, Value::U32(v)) => self.set_at::<u32>(field.offset, *v),
            (UInt64 | Fixed64, Value::U64(v)) => self.set_at::<u64>(field.offset, *v),
            (Float, Value::F32(v)) => self.set_at::<f32>(field.offset, *v),
            (Double, Value::F64(v)) => self.set_at::<f64>(field.offset, *v),
            _ => panic!("value type does not match field type"),
        }
    }

    /// Writes a scalar field's value, updating presence tracking: sets the
    /// hasbit if applicable, or overwrites the oneof case tag to this
    /// field's number (implicitly deactivating whichever member was
    /// previously active, since storage is shared).
    pub fn set_scalar(&mut self, field: &FieldDescriptor, value: Value<'a>) {
        debug_assert_eq!(field.mode, FieldMode::Scalar);
        if field.is_inline_pod() {
            self.write_inline(field, &value);
        } else {
            self.slots[field.offset] = FieldSlot::Scalar(value);
        }
        match field.presence {
            Presence::HasBit(idx) => self.set_has_bit(idx),
            Presence::Oneof(idx) => self.set_oneof_case(idx, field.number),
            Presence::Implicit => {}
        }
    }

    /// Clears a field: zeros hasbit/storage for a hasbit-tracked field, or
    /// (for a oneof member) only acts if this member is the active one.
    pub fn clear_field(&mut self, field: &FieldDescriptor) {
        match field.presence {
            Presence::HasBit(idx) => self.clear_has_bit(idx),
            Presence::Oneof(idx) => {
                if self.oneof_case(idx) != field.number {
                    return;
                }
                self.set_oneof_case(idx, 0);
            }
            Presence::Implicit => {}
        }
        if field.is_inline_pod() {
            let size = field.field_type.element_size();
            self.pod[field.offset..field.offset + size].fill(0);
        } else if matches!(field.field_type, FieldType::Message | FieldType::Group) {
            self.slots[field.offset] = FieldSlot::SubMessage(None);
        } else {
            self.slots[field.offset] = FieldSlot::Scalar(Value::None);
        }
    }

    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        match field.mode {
            FieldMode::Repeated => !self.repeated_slot(field).is_empty(),
            FieldMode::Map => !self.map_slot(field).is_empty(),
            FieldMode::Scalar => match field.presence {
                Presence::HasBit(idx) => self.has_bit(idx),
                Presence::Oneof(idx) => self.oneof_case(idx) == field.number,
                Presence::Implicit => value_is_non_default(&self.get_scalar(field)),
            },
        }
    }

    pub fn repeated_slot(&self, field: &FieldDescriptor) -> &RepeatedSlot<'a> {
        debug_assert_eq!(field.mode, FieldMode::Repeated);
        match &self.slots[field.offset] {
            FieldSlot::Repeated(r) => r,
            _ => unreachable!("repeated field pointed at a non-repeated slot"),
        }
    }

    pub fn repeated_slot_mut(&mut self, field: &FieldDescriptor) -> &mut RepeatedSlot<'a> {
        debug_assert_eq!(field.mode, FieldMode::Repeated);
        match &mut self.slots[field.offset] {
            FieldSlot::Repeated(r) => r,
            _ => unreachable!("repeated field pointed at a non-repeated slot"),
        }
    }

    pub fn map_slot(&self, field: &FieldDescriptor) -> &MapField<'a> {
        debug_assert_eq!(field.mode, FieldMode::Map);
        match &self.slots[field.offset] {
            FieldSlot::Map(m) => m,
            _ => unreachable!("map field pointed at a non-map slot"),
        }
    }

    pub fn map_slot_mut(&mut self, field: &FieldDescriptor) -> &mut MapField<'a> {
        debug_assert_eq!(field.mode, FieldMode::Map);
        match &mut self.slots[field.offset] {
            FieldSlot::Map(m) => m,
            _ => unreachable!("map field pointed at a non-map slot"),
        }
    }
}

impl fmt::Debug for Message<'_> {
    /// Walks the field table and prints `field_number: value` pairs,
    /// skipping unset fields. Repeated fields print as a list, maps as a
    /// list of key/value pairs, the same shallow-borrowed style
    /// `containers.rs`'s `Value`/`MapValue` impls use for submessages.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        for field in self.table.fields {
            if !self.has_field(field) {
                continue;
            }
            match field.mode {
                FieldMode::Scalar => {
                    m.entry(&field.number, &self.get_scalar(field));
                }
                FieldMode::Repeated => {
                    let slot = self.repeated_slot(field);
                    let values: Vec<Value<'_>> = (0..slot.len()).map(|i| slot.value_at(i)).collect();
                    m.entry(&field.number, &values);
                }
                FieldMode::Map => {
                    let entries: Vec<_> = self.map_slot(field).iter().collect();
                    m.entry(&field.number, &entries);
                }
            }
        }
        m.finish()
    }
}

fn value_is_non_default(value: &Value<'_>) -> bool {
    match value {
        Value::None => false,
        Value::Bool(b) => *b,
        Value::I32(v) => *v != 0,
        Value::I64(v) => *v != 0,
        Value::U32(v) => *v != 0,
        Value::U64(v) => *v != 0,
        Value::F32(v) => *v != 0.0,
        Value::F64(v) => *v != 0.0,
        Value::String(v) => !v.is_empty(),
        Value::Bytes(v) => !v.is_empty(),
        Value::Message(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::FieldDescriptor;

    static LEAF: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(
            1,
            8,
            Presence::HasBit(1),
            FieldType::Int32,
            FieldMode::Scalar,
            false,
        )],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn unset_hasbit_field_reads_as_none() {
        let msg = Message::new(&LEAF);
        let f = LEAF.field_by_number(1).unwrap();
        assert!(matches!(msg.get_scalar(f), Value::None));
        assert!(!msg.has_field(f));
    }

    #[test]
    fn set_scalar_then_get_round_trips() {
        let mut msg = Message::new(&LEAF);
        let f = LEAF.field_by_number(1).unwrap();
        msg.set_scalar(f, Value::I32(150));
        match msg.get_scalar(f) {
            Value::I32(v) => assert_eq!(v, 150),
            other => panic!("unexpected {other:?}"),
        }
        assert!(msg.has_field(f));
    }

    #[test]
    fn clear_field_resets_presence() {
        let mut msg = Message::new(&LEAF);
        let f = LEAF.field_by_number(1).unwrap();
        msg.set_scalar(f, Value::I32(5));
        msg.clear_field(f);
        assert!(matches!(msg.get_scalar(f), Value::None));
    }

    static ONEOF_TABLE: MessageTable = MessageTable {
        fields: &[
            FieldDescriptor::new(1, 12, Presence::Oneof(0), FieldType::Int32, FieldMode::Scalar, false),
            FieldDescriptor::new(2, 12, Presence::Oneof(0), FieldType::Int32, FieldMode::Scalar, false),
        ],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 1,
        dense_below: 2,
    };

    #[test]
    fn setting_one_oneof_member_clears_the_other() {
        let mut msg = Message::new(&ONEOF_TABLE);
        let f1 = ONEOF_TABLE.field_by_number(1).unwrap();
        let f2 = ONEOF_TABLE.field_by_number(2).unwrap();
        msg.set_scalar(f1, Value::I32(1));
        assert!(msg.has_field(f1));
        assert!(!msg.has_field(f2));
        msg.set_scalar(f2, Value::I32(2));
        assert!(!msg.has_field(f1));
        assert!(msg.has_field(f2));
    }

    static IMPLICIT_TABLE: MessageTable = MessageTable {
        fields: &[FieldDescriptor::new(
            1,
            8,
            Presence::Implicit,
            FieldType::Int32,
            FieldMode::Scalar,
            false,
        )],
        submessages: &[],
        size: 16,
        hasbit_bytes: 8,
        oneof_count: 0,
        dense_below: 1,
    };

    #[test]
    fn implicit_presence_is_value_derived() {
        let mut msg = Message::new(&IMPLICIT_TABLE);
        let f = IMPLICIT_TABLE.field_by_number(1).unwrap();
        assert!(!msg.has_field(f));
        msg.set_scalar(f, Value::I32(0));
        assert!(!msg.has_field(f));
        msg.set_scalar(f, Value::I32(7));
        assert!(msg.has_field(f));
    }
}
