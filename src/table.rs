//! Compact runtime schema: [`FieldType`], [`FieldDescriptor`], and
//! [`MessageTable`] (a "MiniTable" in upb terms). Fields are kept unpacked
//! as plain struct members rather than squeezed into a bit-packed `u32`,
//! since nothing here needs to fit in a cache line.

use crate::wire::WireType;

/// The 18 protobuf scalar/composite field types. `Group` exists only so a
/// table can name the deprecated wire representation; no decoder path
/// accepts it on the wire (see [`crate::wire::read_tag`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
    Enum,
    Message,
    Group,
}

impl FieldType {
    /// The wire type used when this field type is encoded unpacked.
    pub fn wire_type(self) -> WireType {
        use FieldType::*;
        match self {
            Int32 | Int64 | UInt32 | UInt64 | SInt32 | SInt64 | Bool | Enum => WireType::Varint,
            Fixed64 | SFixed64 | Double => WireType::Fixed64,
            Fixed32 | SFixed32 | Float => WireType::Fixed32,
            String | Bytes | Message | Group => WireType::LengthDelimited,
        }
    }

    /// True for the numeric scalar types that may be packed when repeated.
    pub fn is_packable(self) -> bool {
        use FieldType::*;
        !matches!(self, String | Bytes | Message | Group)
    }

    /// Byte size of a single element's in-memory representation when
    /// stored in a [`crate::containers::RepeatedField`]. `String`/`Bytes`
    /// use a [`crate::containers::StringView`]; `Message` uses a pointer-
    /// sized slot (an arena-allocated child `Message`'s index/handle).
    pub fn element_size(self) -> usize {
        use FieldType::*;
        match self {
            Bool => 1,
            Int32 | UInt32 | SInt32 | Fixed32 | SFixed32 | Float | Enum => 4,
            Int64 | UInt64 | SInt64 | Fixed64 | SFixed64 | Double => 8,
            String | Bytes => core::mem::size_of::<crate::containers::StringView>(),
            Message | Group => core::mem::size_of::<usize>(),
        }
    }
}

/// One of {scalar, repeated, map}.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Scalar,
    Repeated,
    Map,
}

/// Presence tracking for a single field.
///
/// An enum rather than a raw signed integer so the three cases are
/// exhaustive and self-documenting at every call site that matches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Proto3 implicit presence: derived from the stored value.
    Implicit,
    /// 1-based hasbit index into the message's hasbit region.
    HasBit(u32),
    /// Index of the oneof group this field belongs to.
    Oneof(u32),
}

/// A single field's metadata: where it lives in the data block, how its
/// presence is tracked, and what kind of value it holds.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescriptor {
    pub number: u32,
    /// For scalar fields of a plain-old-data type (bool, the integer and
    /// floating-point kinds, enum), a byte offset into
    /// [`crate::message::Message`]'s POD data block. For `String`/`Bytes`-
    /// typed scalar fields, and for every `Repeated`/`Map`-mode field
    /// regardless of element type, this is instead an index into the
    /// message's auxiliary slot vector: raw reinterpretation is used only
    /// where it is actually safe (fixed-size POD), with everything else
    /// (owned, borrowed, or variable-length data) given a real Rust slot
    /// instead of being reinterpreted from bytes.
    pub offset: usize,
    pub presence: Presence,
    /// Index into the owning table's `submessages` when `field_type` is
    /// `Message` or `Group`. Also used by `Map`-mode fields regardless of
    /// `field_type`: it names a synthetic two-field entry table (field 1 =
    /// key, field 2 = value) of the same shape `protoc` itself generates
    /// for a `map<K, V>` field. Otherwise unused.
    pub submsg_index: Option<usize>,
    pub field_type: FieldType,
    pub mode: FieldMode,
    pub is_packed: bool,
}

impl FieldDescriptor {
    pub const fn new(
        number: u32,
        offset: usize,
        presence: Presence,
        field_type: FieldType,
        mode: FieldMode,
        is_packed: bool,
    ) -> Self {
        FieldDescriptor {
            number,
            offset,
            presence,
            submsg_index: None,
            field_type,
            mode,
            is_packed,
        }
    }

    pub const fn with_submessage(mut self, index: usize) -> Self {
        self.submsg_index = Some(index);
        self
    }

    /// True when this field's storage lives inline in the POD data block
    /// at `offset` (a plain scalar whose representation is raw bytes);
    /// false when `offset` instead indexes the auxiliary slot vector
    /// (`String`/`Bytes`/`Message` scalars, and any `Repeated`/`Map`).
    pub fn is_inline_pod(&self) -> bool {
        self.mode == FieldMode::Scalar
            && !matches!(
                self.field_type,
                FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
            )
    }
}

/// Compact schema for one message type: a "MiniTable".
pub struct MessageTable {
    /// Sorted ascending by `number`.
    pub fields: &'static [FieldDescriptor],
    /// Referenced by `submsg_index` on `Message`/`Group`-typed fields.
    /// `'static` references permit cyclic/self-referential schemas
    /// directly: a table may list itself among its own submessages.
    pub submessages: &'static [&'static MessageTable],
    /// Total size in bytes of the data block this table describes.
    pub size: usize,
    /// Bytes reserved at the front of the data block for hasbits.
    pub hasbit_bytes: usize,
    /// Number of oneof groups; each occupies one 4-byte case tag
    /// immediately after the hasbit region.
    pub oneof_count: u32,
    /// Largest N such that fields numbered `1..=N` exist and occupy
    /// `fields[0..N]` in order, enabling O(1) lookup for low field
    /// numbers.
    pub dense_below: u32,
}

impl MessageTable {
    /// Looks up a field by number: O(1) for `1..=dense_below`, binary
    /// search otherwise.
    pub fn field_by_number(&self, n: u32) -> Option<&FieldDescriptor> {
        if n >= 1 && n <= self.dense_below {
            let idx = (n - 1) as usize;
            if idx < self.fields.len() && self.fields[idx].number == n {
                return Some(&self.fields[idx]);
            }
        }
        self.fields
            .binary_search_by_key(&n, |f| f.number)
            .ok()
            .map(|idx| &self.fields[idx])
    }

    /// Byte offset of the oneof case tag for oneof group `idx`.
    pub fn oneof_case_offset(&self, idx: u32) -> usize {
        self.hasbit_bytes + 4 * idx as usize
    }

    pub fn submessage(&self, field: &FieldDescriptor) -> Option<&'static MessageTable> {
        field.submsg_index.map(|i| self.submessages[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: MessageTable = MessageTable {
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
    fn dense_lookup_hits_fast_path() {
        let f = LEAF.field_by_number(1).unwrap();
        assert_eq!(f.number, 1);
    }

    #[test]
    fn lookup_miss_returns_none() {
        assert!(LEAF.field_by_number(2).is_none());
    }

    #[test]
    fn sparse_table_falls_back_to_binary_search() {
        const SPARSE: MessageTable = MessageTable {
            fields: &[
                FieldDescriptor::new(1, 8, Presence::HasBit(1), FieldType::Int32, FieldMode::Scalar, false),
                FieldDescriptor::new(99, 16, Presence::HasBit(2), FieldType::Int32, FieldMode::Scalar, false),
            ],
            submessages: &[],
            size: 24,
            hasbit_bytes: 8,
            oneof_count: 0,
            dense_below: 1,
        };
        assert_eq!(SPARSE.field_by_number(99).unwrap().number, 99);
        assert!(SPARSE.field_by_number(50).is_none());
    }
}
