//! # Frame Errors
//!
//! Every way a byte sequence can fail to be a well-formed Juno message.
//! A `FrameError` is fatal to the exchange that produced it.

use thiserror::Error;

/// Result type for wire encoding and decoding.
pub type FrameResult<T> = Result<T, FrameError>;

/// Malformed, truncated or unencodable wire data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Fewer bytes were available than the structure being read requires.
    #[error("truncated frame: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    /// The first two bytes were not the protocol magic.
    #[error("bad magic 0x{0:04x}")]
    BadMagic(u16),
    /// The header declared a total size below the header length.
    #[error("declared message size {0} is smaller than the header")]
    Undersized(u32),
    /// A component's declared size is inconsistent with the message body.
    #[error("malformed component (tag {tag}): {reason}")]
    Component { tag: u8, reason: &'static str },
    /// A metadata field could not be decoded or encoded.
    #[error("malformed meta field (tag {tag}): {reason}")]
    Field { tag: u8, reason: &'static str },
    /// A response did not answer the request it was read for.
    #[error("response opaque {got} does not match request opaque {expected}")]
    OpaqueMismatch { expected: u32, got: u32 },
    /// A value does not fit in its length prefix.
    #[error("{what} too long: {len} bytes, limit {limit}")]
    TooLong {
        what: &'static str,
        len: usize,
        limit: usize,
    },
}
