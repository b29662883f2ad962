//! A reflection-driven Protocol Buffers binary codec: decode wire-format
//! bytes into an in-memory [`message::Message`] against a runtime
//! [`table::MessageTable`], and re-encode it back to wire format with
//! byte-exact round-trip fidelity. There is no codegen step: schemas are
//! plain Rust data, built by hand or by a build script, rather than
//! `prost`/`protoc`-style generated structs.
//!
//! ```
//! use dynprotobuf::arena::Arena;
//! use dynprotobuf::decode::{decode, DecodeOptions};
//! use dynprotobuf::encode::{encode, EncodeOptions};
//! use dynprotobuf::message::Message;
//! use dynprotobuf::table::{FieldDescriptor, FieldMode, FieldType, MessageTable, Presence};
//!
//! static PERSON: MessageTable = MessageTable {
//!     fields: &[FieldDescriptor::new(1, 8, Presence::HasBit(1), FieldType::Int32, FieldMode::Scalar, false)],
//!     submessages: &[],
//!     size: 16,
//!     hasbit_bytes: 8,
//!     oneof_count: 0,
//!     dense_below: 1,
//! };
//!
//! let input = [0x08, 0x96, 0x01]; // field 1 = 150
//! let arena = Arena::new();
//! let mut msg = Message::new(&PERSON);
//! decode(&input, &mut msg, &arena, &DecodeOptions::default()).unwrap();
//! let out = encode(&msg, &arena, &EncodeOptions::default()).unwrap();
//! assert_eq!(out, &input);
//! ```

pub mod arena;
pub mod containers;
pub mod decode;
pub mod encode;
pub mod error;
pub mod message;
pub mod table;
pub mod wire;

pub use arena::Arena;
pub use decode::{decode, DecodeOptions};
pub use encode::{encode, EncodeOptions};
pub use error::{DecodeError, EncodeError};
pub use message::Message;
pub use table::{FieldDescriptor, FieldMode, FieldType, MessageTable, Presence};
