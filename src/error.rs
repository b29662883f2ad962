//! Error types for the decoder and encoder.
//!
//! Kept as small hand-rolled enums rather than pulling in an error-derive
//! crate: the core library has no dependencies, and the error surface is
//! fixed and small enough that `impl Display` by hand is not a burden.

use core::fmt;

/// Failure modes surfaced by [`crate::decode::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A read ran past the end of the outermost input buffer.
    EndOfStream,
    /// Invalid tag, group wire type, or an inner length-delimited region
    /// that over- or under-ran its declared length.
    Malformed,
    /// A varint needed more than 10 bytes (u64) or a tag needed more than
    /// 5 bytes.
    VarintOverflow,
    /// `check_utf8` was set and a `string` field's bytes were not valid
    /// UTF-8.
    BadUtf8,
    /// The wire type on the tag does not match what the field's type
    /// requires, and no packed/unpacked leniency applies.
    WireTypeMismatch,
    /// Submessage recursion reached `DecodeOptions::max_depth`.
    MaxDepthExceeded,
    /// A proto2 required field was absent.
    ///
    /// Retained for taxonomic completeness; this decoder only supports
    /// proto3 semantics and never constructs this variant.
    MissingRequired,
    /// The arena could not satisfy an allocation, or a repeated field
    /// exceeded its element cap.
    OutOfMemory,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DecodeError::EndOfStream => "unexpected end of input",
            DecodeError::Malformed => "malformed wire data",
            DecodeError::VarintOverflow => "varint exceeds maximum length",
            DecodeError::BadUtf8 => "string field is not valid UTF-8",
            DecodeError::WireTypeMismatch => "wire type does not match field type",
            DecodeError::MaxDepthExceeded => "message nesting exceeds max_depth",
            DecodeError::MissingRequired => "required field missing",
            DecodeError::OutOfMemory => "arena allocation failed",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for DecodeError {}

/// Failure modes surfaced by [`crate::encode::encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// The arena could not satisfy an allocation for the output buffer.
    OutOfMemory,
    /// The computed size of the encoded message exceeds `2 GiB - 1`.
    MaxSizeExceeded,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            EncodeError::OutOfMemory => "arena allocation failed",
            EncodeError::MaxSizeExceeded => "encoded message exceeds 2 GiB - 1",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for EncodeError {}
