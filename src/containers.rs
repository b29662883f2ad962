//! Collection types used by [`crate::message::Message`]'s non-POD field
//! slots: string/byte views, repeated arrays, ordered maps, and the
//! reflective [`Value`] returned by scalar field access.
//!
//! `RepeatedField<T>` and friends keep a `push`/`assign`/`append`/
//! `from_slice`/`slice`/`slice_mut` method surface but are backed by
//! `std::vec::Vec<T>` rather than a hand-rolled arena-routed buffer: field
//! storage for non-POD data already lives outside the message's raw byte
//! blob (see `table.rs`'s note on `FieldDescriptor::offset`), so a second
//! unsafe growable-buffer implementation next to the arena's own block
//! allocator would duplicate risk for no behavioral difference a caller
//! can observe.

use std::fmt;

/// A view over UTF-8 or arbitrary bytes: either borrowed from the
/// decoder's input buffer (`is_aliased = true`) or owned by an arena
/// allocation made via [`crate::arena::Arena::dupe`].
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StringView<'a> {
    data: &'a [u8],
    is_aliased: bool,
}

impl<'a> StringView<'a> {
    pub fn aliased(data: &'a [u8]) -> Self {
        StringView { data, is_aliased: true }
    }

    pub fn owned(data: &'a [u8]) -> Self {
        StringView { data, is_aliased: false }
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn as_str(&self) -> Result<&'a str, core::str::Utf8Error> {
        core::str::from_utf8(self.data)
    }

    pub fn is_aliased(&self) -> bool {
        self.is_aliased
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl fmt::Debug for StringView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Ok(s) => write!(f, "{:?}", s),
            Err(_) => write!(f, "{:?}", self.data),
        }
    }
}

/// Hard cap on elements per repeated field: exceeding this surfaces as
/// `OutOfMemory` rather than growing forever.
pub const MAX_REPEATED_ELEMENTS: usize = 10_000_000;

/// A growable array for a repeated field. Doubles capacity starting at 8,
/// refusing to grow past [`MAX_REPEATED_ELEMENTS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedField<T> {
    items: Vec<T>,
}

impl<T> Default for RepeatedField<T> {
    fn default() -> Self {
        RepeatedField { items: Vec::new() }
    }
}

impl<T> RepeatedField<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(items: Vec<T>) -> Self {
        RepeatedField { items }
    }

    /// Appends `elem`, returning `None` if the field is already at the
    /// element cap instead of growing past it.
    pub fn push(&mut self, elem: T) -> Option<()> {
        if self.items.len() >= MAX_REPEATED_ELEMENTS {
            return None;
        }
        self.items.push(elem);
        Some(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn slice(&self) -> &[T] {
        &self.items
    }

    pub fn slice_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

impl<T: Copy> RepeatedField<T> {
    pub fn assign(&mut self, slice: &[T]) {
        self.items.clear();
        self.items.extend_from_slice(slice);
    }

    pub fn append(&mut self, slice: &[T]) {
        self.items.extend_from_slice(slice);
    }
}

impl<T> core::ops::Deref for RepeatedField<T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.items
    }
}

impl<T> core::ops::DerefMut for RepeatedField<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.items
    }
}

/// A map key. Protobuf restricts map keys to integral, bool, or string
/// scalar types; this enum covers exactly that set rather than the full
/// [`Value`] variant space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    Bool(bool),
    String(String),
}

/// A map entry's value: either a plain scalar or an owned child message.
/// Split out from [`Value`] because [`Value::Message`] only ever borrows.
/// A map, like a repeated field, must actually own the messages its
/// entries hold.
pub enum MapValue<'a> {
    Scalar(Value<'a>),
    Message(Box<crate::message::Message<'a>>),
}

impl fmt::Debug for MapValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapValue::Scalar(v) => write!(f, "{v:?}"),
            MapValue::Message(_) => write!(f, "Message(..)"),
        }
    }
}

/// An insertion-ordered map. A `Vec` of pairs rather than a hash map: map
/// fields are typically small, and preserving insertion order for
/// byte-stable re-encoding matters far more here than lookup complexity.
#[derive(Debug, Default)]
pub struct MapField<'a> {
    entries: Vec<(MapKey, MapValue<'a>)>,
}

impl<'a> MapField<'a> {
    pub fn new() -> Self {
        MapField { entries: Vec::new() }
    }

    /// Inserts or overwrites (keeping the original position, matching
    /// protobuf map semantics where a repeated key in the wire stream
    /// overwrites the prior value without reordering).
    pub fn insert(&mut self, key: MapKey, value: MapValue<'a>) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &MapKey) -> Option<&MapValue<'a>> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(MapKey, MapValue<'a>)> {
        self.entries.iter()
    }

    /// Entries sorted by encoded key, for `EncodeOptions::deterministic`.
    pub fn sorted_by_key(&self) -> Vec<&(MapKey, MapValue<'a>)> {
        let mut v: Vec<_> = self.entries.iter().collect();
        v.sort_by(|(a, _), (b, _)| map_key_order(a).cmp(&map_key_order(b)));
        v
    }
}

fn map_key_order(k: &MapKey) -> (u8, i64, u64, bool, &str) {
    match k {
        MapKey::I32(v) => (0, *v as i64, 0, false, ""),
        MapKey::I64(v) => (1, *v, 0, false, ""),
        MapKey::U32(v) => (2, 0, *v as u64, false, ""),
        MapKey::U64(v) => (3, 0, *v, false, ""),
        MapKey::Bool(v) => (4, 0, 0, *v, ""),
        MapKey::String(s) => (5, 0, 0, false, s.as_str()),
    }
}

/// The reflective scalar value returned by
/// [`crate::message::Message::get_scalar`]: one variant per protobuf
/// scalar kind, a borrowed view for message-typed fields, and `None` for
/// an unset field.
pub enum Value<'a> {
    None,
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(StringView<'a>),
    Bytes(StringView<'a>),
    Message(&'a crate::message::Message<'a>),
}

impl fmt::Debug for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::I32(v) => write!(f, "I32({v})"),
            Value::I64(v) => write!(f, "I64({v})"),
            Value::U32(v) => write!(f, "U32({v})"),
            Value::U64(v) => write!(f, "U64({v})"),
            Value::F32(v) => write!(f, "F32({v})"),
            Value::F64(v) => write!(f, "F64({v})"),
            Value::String(v) => write!(f, "String({v:?})"),
            Value::Bytes(v) => write!(f, "Bytes({:?})", v.bytes()),
            Value::Message(_) => write!(f, "Message(..)"),
        }
    }
}

impl Clone for Value<'_> {
    fn clone(&self) -> Self {
        match self {
            Value::None => Value::None,
            Value::Bool(v) => Value::Bool(*v),
            Value::I32(v) => Value::I32(*v),
            Value::I64(v) => Value::I64(*v),
            Value::U32(v) => Value::U32(*v),
            Value::U64(v) => Value::U64(*v),
            Value::F32(v) => Value::F32(*v),
            Value::F64(v) => Value::F64(*v),
            Value::String(v) => Value::String(*v),
            Value::Bytes(v) => Value::Bytes(*v),
            Value::Message(v) => Value::Message(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_field_refuses_past_cap() {
        // Seed a field already at the cap instead of pushing it there one
        // element at a time.
        let mut rf: RepeatedField<i32> = RepeatedField::from_vec(vec![0; MAX_REPEATED_ELEMENTS]);
        assert_eq!(rf.push(1), None);
        assert_eq!(rf.len(), MAX_REPEATED_ELEMENTS);
    }

    #[test]
    fn map_field_preserves_insertion_order_and_overwrites_in_place() {
        let mut m = MapField::new();
        m.insert(MapKey::I32(2), MapValue::Scalar(Value::String(StringView::owned(b"b"))));
        m.insert(MapKey::I32(1), MapValue::Scalar(Value::String(StringView::owned(b"a"))));
        m.insert(MapKey::I32(2), MapValue::Scalar(Value::String(StringView::owned(b"b2"))));
        let order: Vec<_> = m.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, vec![MapKey::I32(2), MapKey::I32(1)]);
        match m.get(&MapKey::I32(2)).unwrap() {
            MapValue::Scalar(Value::String(sv)) => assert_eq!(sv.as_str().unwrap(), "b2"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn string_view_reports_aliasing() {
        let input = b"hello world";
        let view = StringView::aliased(&input[..5]);
        assert!(view.is_aliased());
        assert_eq!(view.as_str().unwrap(), "hello");
    }
}
