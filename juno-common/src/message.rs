//! # Operation Message
//!
//! Purpose: The complete request/response envelope: header, meta component
//! and payload component, with byte-accurate size bookkeeping.
//!
//! ## Design Principles
//!
//! 1. **Seal Before Write**: The header precedes the variable sections on the
//!    wire, so `seal` computes and stores the total size before any byte is
//!    emitted. `write_buf` always seals first.
//! 2. **All Or Nothing**: `read_buf` validates the declared size against the
//!    available bytes before touching the body and returns either a fully
//!    decoded message or a `FrameError`.
//! 3. **Forward Compatible**: Components with an unrecognized tag are skipped
//!    by their declared size.
//!
//! ## Wire Layout
//!
//! ```text
//! +-------------+---------------------+------------------------+
//! | header 16B  | meta component (?)  | payload component (?)  |
//! +-------------+---------------------+------------------------+
//! size = 16 + meta.buffer_len() + payload.buffer_len()
//! ```
//!
//! Each component starts with a 4-byte size and a 1-byte tag and is padded to
//! a multiple of 8. Empty components are omitted.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::error::{FrameError, FrameResult};
use crate::header::{MessageHeader, OpCode, OpStatus, HEADER_LEN, MAGIC};
use crate::meta::{MetadataComponent, META_COMPONENT_TAG};
use crate::payload::{PayloadComponent, PAYLOAD_COMPONENT_TAG};

/// Size word plus tag byte.
const COMPONENT_PREFIX: usize = 5;

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMessage {
    pub header: MessageHeader,
    pub meta: MetadataComponent,
    pub payload: PayloadComponent,
}

impl OperationMessage {
    pub fn new(header: MessageHeader) -> Self {
        OperationMessage {
            header,
            meta: MetadataComponent::new(),
            payload: PayloadComponent::default(),
        }
    }

    /// Starts a two-way request.
    pub fn request(opcode: OpCode, opaque: u32) -> Self {
        Self::new(MessageHeader::request(opcode, opaque))
    }

    /// Starts the response to `request`, echoing its opcode and opaque.
    pub fn response_to(request: &OperationMessage, status: OpStatus) -> Self {
        Self::new(MessageHeader::response(&request.header, status))
    }

    pub fn opcode(&self) -> OpCode {
        self.header.opcode
    }

    pub fn opaque(&self) -> u32 {
        self.header.opaque
    }

    pub fn status(&self) -> OpStatus {
        self.header.status
    }

    /// Total encoded size: header plus both components.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.meta.buffer_len() + self.payload.buffer_len()
    }

    /// Validates the sections and stores the total size in the header.
    pub fn seal(&mut self) -> FrameResult<u32> {
        self.meta.validate()?;
        self.payload.validate()?;
        let len = self.encoded_len();
        let size = u32::try_from(len).map_err(|_| FrameError::TooLong {
            what: "message",
            len,
            limit: u32::MAX as usize,
        })?;
        self.header.size = size;
        Ok(size)
    }

    /// Seals the message and appends its bytes to `buf`.
    pub fn write_buf(&mut self, buf: &mut impl BufMut) -> FrameResult<()> {
        self.seal()?;
        self.header.encode(buf);
        if !self.meta.is_empty() {
            self.meta.encode(buf);
        }
        if !self.payload.is_empty() {
            self.payload.encode(buf);
        }
        Ok(())
    }

    /// Seals the message and returns its bytes.
    pub fn to_bytes(&mut self) -> FrameResult<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_buf(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Returns the declared size of the message at the front of `buf` once a
    /// full header is available, for framing a byte stream.
    pub fn peek_size(buf: &[u8]) -> FrameResult<Option<usize>> {
        if buf.len() < HEADER_LEN {
            if buf.len() >= 2 && u16::from_be_bytes([buf[0], buf[1]]) != MAGIC {
                return Err(FrameError::BadMagic(u16::from_be_bytes([buf[0], buf[1]])));
            }
            return Ok(None);
        }
        let header = MessageHeader::decode(buf)?;
        Ok(Some(header.size as usize))
    }

    /// Decodes one message from the front of `buf`.
    ///
    /// Bytes past the declared size are ignored.
    pub fn read_buf(buf: &[u8]) -> FrameResult<Self> {
        let header = MessageHeader::decode(buf)?;
        let size = header.size as usize;
        if buf.len() < size {
            return Err(FrameError::Truncated {
                needed: size,
                available: buf.len(),
            });
        }

        let mut message = OperationMessage::new(header);
        let mut body = &buf[HEADER_LEN..size];
        while !body.is_empty() {
            if body.len() < COMPONENT_PREFIX {
                return Err(FrameError::Truncated {
                    needed: COMPONENT_PREFIX,
                    available: body.len(),
                });
            }
            let comp_size = u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
            let tag = body[4];
            if comp_size < 8 || comp_size % 8 != 0 {
                return Err(FrameError::Component {
                    tag,
                    reason: "size is not a positive multiple of 8",
                });
            }
            if comp_size > body.len() {
                return Err(FrameError::Component {
                    tag,
                    reason: "size exceeds the message",
                });
            }

            let (component, rest) = body.split_at(comp_size);
            match tag {
                META_COMPONENT_TAG => message.meta = MetadataComponent::decode(component)?,
                PAYLOAD_COMPONENT_TAG => message.payload = PayloadComponent::decode(component)?,
                other => debug!(tag = other, size = comp_size, "skipping unknown component"),
            }
            body = rest;
        }

        Ok(message)
    }
}
