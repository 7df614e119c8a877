//! # Message Header
//!
//! Purpose: Fixed 16-byte framing shared by every request and response.
//!
//! ## Design Principles
//!
//! 1. **Fixed Layout**: The header never changes length, so a reader can frame
//!    a stream by peeking at the first 16 bytes.
//! 2. **Versioned**: A protocol version byte travels with every message.
//! 3. **Open Enumerations**: Opcodes and statuses keep unknown raw values
//!    instead of failing, so a newer store does not break an older client.
//!
//! ## Memory Layout
//!
//! ```text
//! Request header (16 bytes):
//! +---------+---------+----------+----------+----------+--------+-------+----------+
//! | magic   | version | type/RQ  | size     | opaque   | opcode | flags | shard id |
//! +---------+---------+----------+----------+----------+--------+-------+----------+
//! | 2B      | 1B      | 1B       | 4B       | 4B       | 1B     | 1B    | 2B       |
//! +---------+---------+----------+----------+----------+--------+-------+----------+
//!
//! Response header (16 bytes): identical except the last two bytes
//! +----------+--------+
//! | reserved | status |
//! +----------+--------+
//! | 1B       | 1B     |
//! +----------+--------+
//!
//! type/RQ byte: bits 0-5 message type, bits 6-7 request/response kind.
//! ```

use bytes::{Buf, BufMut};

use crate::error::{FrameError, FrameResult};
use crate::wire::ensure;

/// Header length in bytes.
pub const HEADER_LEN: usize = 16;
/// Protocol magic carried in the first two bytes.
pub const MAGIC: u16 = 0x5050;
/// Protocol version written by this crate.
pub const PROTOCOL_VERSION: u8 = 1;

/// Replication flag bit in the header's flags byte.
pub const FLAG_REPLICATION: u8 = 0x01;

/// Operation identifier.
///
/// Compare-and-set and batch have no opcode of their own: a compare-and-set is
/// an `Update` carrying a `Version` meta field and a batch is a series of
/// independent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    Nop,
    Create,
    Get,
    Update,
    Set,
    Destroy,
    UdfGet,
    UdfSet,
    // Storage tier
    PrepareCreate,
    Read,
    PrepareUpdate,
    PrepareSet,
    PrepareDelete,
    Delete,
    Commit,
    Abort,
    Repair,
    MarkDelete,
    CloneRecord,
    VerHandshake,
    Unknown(u8),
}

impl OpCode {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0x00 => OpCode::Nop,
            0x01 => OpCode::Create,
            0x02 => OpCode::Get,
            0x03 => OpCode::Update,
            0x04 => OpCode::Set,
            0x05 => OpCode::Destroy,
            0x06 => OpCode::UdfGet,
            0x07 => OpCode::UdfSet,
            0x81 => OpCode::PrepareCreate,
            0x82 => OpCode::Read,
            0x83 => OpCode::PrepareUpdate,
            0x84 => OpCode::PrepareSet,
            0x85 => OpCode::PrepareDelete,
            0x86 => OpCode::Delete,
            0xC1 => OpCode::Commit,
            0xC2 => OpCode::Abort,
            0xC3 => OpCode::Repair,
            0xC4 => OpCode::MarkDelete,
            0xE1 => OpCode::CloneRecord,
            0xE2 => OpCode::VerHandshake,
            other => OpCode::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpCode::Nop => 0x00,
            OpCode::Create => 0x01,
            OpCode::Get => 0x02,
            OpCode::Update => 0x03,
            OpCode::Set => 0x04,
            OpCode::Destroy => 0x05,
            OpCode::UdfGet => 0x06,
            OpCode::UdfSet => 0x07,
            OpCode::PrepareCreate => 0x81,
            OpCode::Read => 0x82,
            OpCode::PrepareUpdate => 0x83,
            OpCode::PrepareSet => 0x84,
            OpCode::PrepareDelete => 0x85,
            OpCode::Delete => 0x86,
            OpCode::Commit => 0xC1,
            OpCode::Abort => 0xC2,
            OpCode::Repair => 0xC3,
            OpCode::MarkDelete => 0xC4,
            OpCode::CloneRecord => 0xE1,
            OpCode::VerHandshake => 0xE2,
            OpCode::Unknown(raw) => raw,
        }
    }
}

/// Status byte carried by a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpStatus {
    Ok,
    BadMsg,
    ServiceDenied,
    NoKey,
    DupKey,
    BadParam,
    RecordLocked,
    NoUncommitted,
    NoStorageServer,
    Busy,
    Inserting,
    AlreadyFulfilled,
    VersionConflict,
    SsError,
    SsOutOfResource,
    SsReadTtlExtendErr,
    ReqProcTimeout,
    CommitFailure,
    Inconsistent,
    KeyMarkedDelete,
    NotSupported,
    Internal,
    Unknown(u8),
}

impl OpStatus {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => OpStatus::Ok,
            1 => OpStatus::BadMsg,
            2 => OpStatus::ServiceDenied,
            3 => OpStatus::NoKey,
            4 => OpStatus::DupKey,
            7 => OpStatus::BadParam,
            8 => OpStatus::RecordLocked,
            10 => OpStatus::NoUncommitted,
            12 => OpStatus::NoStorageServer,
            14 => OpStatus::Busy,
            15 => OpStatus::Inserting,
            17 => OpStatus::AlreadyFulfilled,
            19 => OpStatus::VersionConflict,
            21 => OpStatus::SsError,
            22 => OpStatus::SsOutOfResource,
            23 => OpStatus::SsReadTtlExtendErr,
            24 => OpStatus::ReqProcTimeout,
            25 => OpStatus::CommitFailure,
            26 => OpStatus::Inconsistent,
            27 => OpStatus::KeyMarkedDelete,
            28 => OpStatus::NotSupported,
            255 => OpStatus::Internal,
            other => OpStatus::Unknown(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            OpStatus::Ok => 0,
            OpStatus::BadMsg => 1,
            OpStatus::ServiceDenied => 2,
            OpStatus::NoKey => 3,
            OpStatus::DupKey => 4,
            OpStatus::BadParam => 7,
            OpStatus::RecordLocked => 8,
            OpStatus::NoUncommitted => 10,
            OpStatus::NoStorageServer => 12,
            OpStatus::Busy => 14,
            OpStatus::Inserting => 15,
            OpStatus::AlreadyFulfilled => 17,
            OpStatus::VersionConflict => 19,
            OpStatus::SsError => 21,
            OpStatus::SsOutOfResource => 22,
            OpStatus::SsReadTtlExtendErr => 23,
            OpStatus::ReqProcTimeout => 24,
            OpStatus::CommitFailure => 25,
            OpStatus::Inconsistent => 26,
            OpStatus::KeyMarkedDelete => 27,
            OpStatus::NotSupported => 28,
            OpStatus::Internal => 255,
            OpStatus::Unknown(raw) => raw,
        }
    }
}

/// Message type (low six bits of the type/RQ byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Operational,
    Admin,
    ClusterControl,
    Unknown(u8),
}

impl MessageType {
    fn from_bits(raw: u8) -> Self {
        match raw {
            0 => MessageType::Operational,
            1 => MessageType::Admin,
            2 => MessageType::ClusterControl,
            other => MessageType::Unknown(other),
        }
    }

    fn bits(self) -> u8 {
        match self {
            MessageType::Operational => 0,
            MessageType::Admin => 1,
            MessageType::ClusterControl => 2,
            MessageType::Unknown(raw) => raw & 0x3F,
        }
    }
}

/// Request/response kind (high two bits of the type/RQ byte).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Response,
    Request,
    OneWayRequest,
}

impl MessageKind {
    fn from_bits(raw: u8) -> Self {
        match raw {
            0 => MessageKind::Response,
            3 => MessageKind::OneWayRequest,
            // 2 is unassigned; treat it like a two-way request.
            _ => MessageKind::Request,
        }
    }

    fn bits(self) -> u8 {
        match self {
            MessageKind::Response => 0,
            MessageKind::Request => 1,
            MessageKind::OneWayRequest => 3,
        }
    }

    pub fn is_request(self) -> bool {
        !matches!(self, MessageKind::Response)
    }
}

/// Decoded 16-byte header.
///
/// `shard_id` is only meaningful on requests and `status` only on responses;
/// the unused one encodes as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u8,
    pub msg_type: MessageType,
    pub kind: MessageKind,
    /// Total message size in bytes, header included.
    pub size: u32,
    /// Correlation id echoed by the store.
    pub opaque: u32,
    pub opcode: OpCode,
    pub flags: u8,
    pub shard_id: u16,
    pub status: OpStatus,
}

impl MessageHeader {
    /// Creates a two-way operational request header with size zero.
    pub fn request(opcode: OpCode, opaque: u32) -> Self {
        MessageHeader {
            version: PROTOCOL_VERSION,
            msg_type: MessageType::Operational,
            kind: MessageKind::Request,
            size: HEADER_LEN as u32,
            opaque,
            opcode,
            flags: 0,
            shard_id: 0,
            status: OpStatus::Ok,
        }
    }

    /// Creates the response header matching `request`.
    pub fn response(request: &MessageHeader, status: OpStatus) -> Self {
        MessageHeader {
            version: PROTOCOL_VERSION,
            msg_type: request.msg_type,
            kind: MessageKind::Response,
            size: HEADER_LEN as u32,
            opaque: request.opaque,
            opcode: request.opcode,
            flags: 0,
            shard_id: 0,
            status,
        }
    }

    /// Writes the 16 header bytes.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(MAGIC);
        buf.put_u8(self.version);
        buf.put_u8((self.kind.bits() << 6) | self.msg_type.bits());
        buf.put_u32(self.size);
        buf.put_u32(self.opaque);
        buf.put_u8(self.opcode.as_u8());
        buf.put_u8(self.flags);
        if self.kind.is_request() {
            buf.put_u16(self.shard_id);
        } else {
            buf.put_u8(0);
            buf.put_u8(self.status.as_u8());
        }
    }

    /// Parses a header from the front of `buf`.
    ///
    /// Only the header itself is validated here; checking `size` against the
    /// bytes that follow is the message decoder's job.
    pub fn decode(mut buf: &[u8]) -> FrameResult<Self> {
        ensure(&buf, HEADER_LEN)?;
        let magic = buf.get_u16();
        if magic != MAGIC {
            return Err(FrameError::BadMagic(magic));
        }
        let version = buf.get_u8();
        let type_flag = buf.get_u8();
        let size = buf.get_u32();
        if (size as usize) < HEADER_LEN {
            return Err(FrameError::Undersized(size));
        }
        let opaque = buf.get_u32();
        let opcode = OpCode::from_u8(buf.get_u8());
        let flags = buf.get_u8();
        let kind = MessageKind::from_bits(type_flag >> 6);
        let (shard_id, status) = if kind.is_request() {
            (buf.get_u16(), OpStatus::Ok)
        } else {
            buf.advance(1);
            (0, OpStatus::from_u8(buf.get_u8()))
        };

        Ok(MessageHeader {
            version,
            msg_type: MessageType::from_bits(type_flag & 0x3F),
            kind,
            size,
            opaque,
            opcode,
            flags,
            shard_id,
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_header_layout() {
        let mut header = MessageHeader::request(OpCode::Get, 0x0102_0304);
        header.size = 40;
        header.shard_id = 0x0A0B;
        let mut buf = Vec::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(
            buf,
            vec![0x50, 0x50, 1, 0x40, 0, 0, 0, 40, 1, 2, 3, 4, 0x02, 0, 0x0A, 0x0B]
        );
        assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_response_header_carries_status() {
        let request = MessageHeader::request(OpCode::Update, 7);
        let response = MessageHeader::response(&request, OpStatus::VersionConflict);
        let mut buf = Vec::new();
        response.encode(&mut buf);

        assert_eq!(buf[3], 0x00);
        assert_eq!(buf[14], 0);
        assert_eq!(buf[15], 19);
        let decoded = MessageHeader::decode(&buf).unwrap();
        assert_eq!(decoded.kind, MessageKind::Response);
        assert_eq!(decoded.status, OpStatus::VersionConflict);
        assert_eq!(decoded.opaque, 7);
    }

    #[test]
    fn test_decode_rejects_short_and_bad_magic() {
        assert!(matches!(
            MessageHeader::decode(&[0x50, 0x50, 1]),
            Err(FrameError::Truncated { needed: 16, available: 3 })
        ));

        let mut buf = Vec::new();
        MessageHeader::request(OpCode::Nop, 1).encode(&mut buf);
        buf[0] = 0x51;
        assert!(matches!(MessageHeader::decode(&buf), Err(FrameError::BadMagic(0x5150))));
    }

    #[test]
    fn test_decode_rejects_undersized_declaration() {
        let mut header = MessageHeader::request(OpCode::Nop, 1);
        header.size = 8;
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(MessageHeader::decode(&buf), Err(FrameError::Undersized(8)));
    }

    #[test]
    fn test_unknown_codes_roundtrip() {
        assert_eq!(OpCode::from_u8(0x42), OpCode::Unknown(0x42));
        assert_eq!(OpCode::Unknown(0x42).as_u8(), 0x42);
        assert_eq!(OpStatus::from_u8(99).as_u8(), 99);
        for raw in [0u8, 1, 2, 3, 4, 5, 0x81, 0xC4, 0xE2] {
            assert_eq!(OpCode::from_u8(raw).as_u8(), raw);
        }
    }
}
