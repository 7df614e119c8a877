//! # Juno Wire Protocol
//!
//! Purpose: Shared message model for the Juno client and the mock store:
//! the fixed 16-byte header, the tagged metadata fields, the key/value
//! payload and the operation message that frames them together.
//!
//! ## Design Principles
//! 1. **Closed Variants**: Every recognized metadata tag is one enum case; an
//!    explicit `Unknown` case carries anything else so decoding never fails on
//!    a newer peer's fields.
//! 2. **Size First**: Lengths are computed before a single byte is written, so
//!    the header's size field is always authoritative.
//! 3. **No Partial Messages**: Decoding either yields a complete message or a
//!    `FrameError`.
//! 4. **Big-Endian Everywhere**: All integers use network byte order via `bytes`.

pub mod error;
pub mod field;
pub mod header;
pub mod message;
pub mod meta;
pub mod payload;

mod wire;

pub use error::{FrameError, FrameResult};
pub use field::{FieldTag, MetaField, SourceInfo};
pub use header::{
    MessageHeader, MessageKind, MessageType, OpCode, OpStatus, HEADER_LEN, MAGIC, PROTOCOL_VERSION,
};
pub use message::OperationMessage;
pub use meta::MetadataComponent;
pub use payload::{PayloadComponent, PayloadType};
