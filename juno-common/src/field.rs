//! # Tagged Meta Fields
//!
//! Purpose: Encode and decode the self-describing fields carried in a
//! message's meta component.
//!
//! ## Design Principles
//!
//! 1. **One Case Per Tag**: `MetaField` is a closed enum over the recognized
//!    tags, plus `Unknown` holding raw bytes for anything else.
//! 2. **Tag Byte Is The Schema**: The low five bits name the field and the high
//!    three bits give its width, so any field can be skipped without knowing it.
//! 3. **Lenient Scalars**: Integer fields decode from either a 4-byte or an
//!    8-byte width and encode with the narrowest width that holds the value.
//!
//! ## Tag Byte
//!
//! ```text
//! +-----------+---------------+
//! | size type | field tag     |
//! +-----------+---------------+
//! | bits 7-5  | bits 4-0      |
//! +-----------+---------------+
//!
//! size type 0    : variable; first data byte = field size incl. itself, padded to 4
//! size type n > 0: fixed width of 2^(n+1) bytes (1 -> 4B, 2 -> 8B, 3 -> 16B)
//! ```
//!
//! ## Variable Field Layouts
//!
//! ```text
//! SourceInfo:
//! +------+------------------+--------+------------+----------+-----+
//! | size | app len | v6 bit | port   | ip         | app name | pad |
//! +------+------------------+--------+------------+----------+-----+
//! | 1B   | 1B (7 bits + 1)  | 2B     | 4B or 16B  | app len  | ->4 |
//! +------+------------------+--------+------------+----------+-----+
//!
//! CorrelationId / UdfName:
//! +------+-----+-------+-----+
//! | size | len | bytes | pad |
//! +------+-----+-------+-----+
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes};

use crate::error::{FrameError, FrameResult};
use crate::wire::{ensure, pad};

const TAG_MASK: u8 = 0x1F;
const SIZE_TYPE_SHIFT: u8 = 5;

const SIZE_TYPE_VARIABLE: u8 = 0;
const SIZE_TYPE_4: u8 = 1;
const SIZE_TYPE_8: u8 = 2;
const SIZE_TYPE_16: u8 = 3;

/// Largest size a variable field can declare in its one-byte prefix.
const MAX_VARIABLE_SIZE: usize = 252;
/// Longest app name the seven-bit length can describe.
pub const MAX_APP_NAME_LEN: usize = 0x7F;
/// Longest correlation id or UDF name that fits a variable field.
pub const MAX_SHORT_STRING_LEN: usize = MAX_VARIABLE_SIZE - 2;

const IPV6_FLAG: u8 = 0x80;

/// Recognized meta field tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldTag {
    TimeToLive,
    Version,
    CreationTime,
    ExpirationTime,
    RequestId,
    SourceInfo,
    LastModificationTime,
    OriginatorRequestId,
    CorrelationId,
    RequestHandlingTime,
    UdfName,
}

impl FieldTag {
    pub fn from_u8(raw: u8) -> Option<Self> {
        let tag = match raw {
            1 => FieldTag::TimeToLive,
            2 => FieldTag::Version,
            3 => FieldTag::CreationTime,
            4 => FieldTag::ExpirationTime,
            5 => FieldTag::RequestId,
            6 => FieldTag::SourceInfo,
            7 => FieldTag::LastModificationTime,
            8 => FieldTag::OriginatorRequestId,
            9 => FieldTag::CorrelationId,
            10 => FieldTag::RequestHandlingTime,
            11 => FieldTag::UdfName,
            _ => return None,
        };
        Some(tag)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            FieldTag::TimeToLive => 1,
            FieldTag::Version => 2,
            FieldTag::CreationTime => 3,
            FieldTag::ExpirationTime => 4,
            FieldTag::RequestId => 5,
            FieldTag::SourceInfo => 6,
            FieldTag::LastModificationTime => 7,
            FieldTag::OriginatorRequestId => 8,
            FieldTag::CorrelationId => 9,
            FieldTag::RequestHandlingTime => 10,
            FieldTag::UdfName => 11,
        }
    }
}

/// Originator of a request: address, port and application name.
///
/// The store echoes the address it is reachable on in the response to a ping,
/// which is how a client finds the server behind a load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    pub ip: IpAddr,
    pub port: u16,
    pub app_name: Bytes,
}

impl SourceInfo {
    pub fn new(ip: IpAddr, port: u16, app_name: impl Into<Bytes>) -> Self {
        SourceInfo {
            ip,
            port,
            app_name: app_name.into(),
        }
    }

    fn ip_len(&self) -> usize {
        match self.ip {
            IpAddr::V4(_) => 4,
            IpAddr::V6(_) => 16,
        }
    }

    fn encoded_len(&self) -> usize {
        pad(4 + self.ip_len() + self.app_name.len(), 4)
    }
}

/// One decoded meta field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetaField {
    /// Record lifetime in seconds.
    TimeToLive(u64),
    /// Record version assigned by the store.
    Version(u64),
    /// Creation time in epoch seconds.
    CreationTime(u64),
    /// Expiration time in epoch seconds.
    ExpirationTime(u64),
    RequestId([u8; 16]),
    SourceInfo(SourceInfo),
    /// Last modification time in epoch nanoseconds.
    LastModificationTime(u64),
    OriginatorRequestId([u8; 16]),
    CorrelationId(Bytes),
    /// Time the store spent on the request, as reported by the store.
    RequestHandlingTime(u64),
    UdfName(Bytes),
    /// A tag this decoder does not understand, kept byte-for-byte.
    Unknown { tag_byte: u8, raw: Bytes },
}

impl MetaField {
    /// Returns the recognized tag, or `None` for `Unknown`.
    pub fn tag(&self) -> Option<FieldTag> {
        let tag = match self {
            MetaField::TimeToLive(_) => FieldTag::TimeToLive,
            MetaField::Version(_) => FieldTag::Version,
            MetaField::CreationTime(_) => FieldTag::CreationTime,
            MetaField::ExpirationTime(_) => FieldTag::ExpirationTime,
            MetaField::RequestId(_) => FieldTag::RequestId,
            MetaField::SourceInfo(_) => FieldTag::SourceInfo,
            MetaField::LastModificationTime(_) => FieldTag::LastModificationTime,
            MetaField::OriginatorRequestId(_) => FieldTag::OriginatorRequestId,
            MetaField::CorrelationId(_) => FieldTag::CorrelationId,
            MetaField::RequestHandlingTime(_) => FieldTag::RequestHandlingTime,
            MetaField::UdfName(_) => FieldTag::UdfName,
            MetaField::Unknown { .. } => return None,
        };
        Some(tag)
    }

    /// Packs the tag and size type into the byte written in the meta header.
    pub fn tag_byte(&self) -> u8 {
        if let MetaField::Unknown { tag_byte, .. } = self {
            return *tag_byte;
        }
        let size_type = match self {
            MetaField::LastModificationTime(_) => SIZE_TYPE_8,
            MetaField::RequestId(_) | MetaField::OriginatorRequestId(_) => SIZE_TYPE_16,
            MetaField::SourceInfo(_) | MetaField::CorrelationId(_) | MetaField::UdfName(_) => {
                SIZE_TYPE_VARIABLE
            }
            _ => match self.scalar() {
                Some(value) if value > u64::from(u32::MAX) => SIZE_TYPE_8,
                _ => SIZE_TYPE_4,
            },
        };
        let tag = self.tag().map(FieldTag::as_u8).unwrap_or_default();
        (size_type << SIZE_TYPE_SHIFT) | tag
    }

    /// Bytes this field occupies in the data section.
    pub fn encoded_len(&self) -> usize {
        match self {
            MetaField::SourceInfo(info) => info.encoded_len(),
            MetaField::CorrelationId(bytes) | MetaField::UdfName(bytes) => pad(2 + bytes.len(), 4),
            MetaField::Unknown { raw, .. } => raw.len(),
            _ => fixed_width(self.tag_byte() >> SIZE_TYPE_SHIFT),
        }
    }

    fn scalar(&self) -> Option<u64> {
        match self {
            MetaField::TimeToLive(v)
            | MetaField::Version(v)
            | MetaField::CreationTime(v)
            | MetaField::ExpirationTime(v)
            | MetaField::LastModificationTime(v)
            | MetaField::RequestHandlingTime(v) => Some(*v),
            _ => None,
        }
    }

    fn from_scalar(tag: FieldTag, value: u64) -> Option<Self> {
        let field = match tag {
            FieldTag::TimeToLive => MetaField::TimeToLive(value),
            FieldTag::Version => MetaField::Version(value),
            FieldTag::CreationTime => MetaField::CreationTime(value),
            FieldTag::ExpirationTime => MetaField::ExpirationTime(value),
            FieldTag::LastModificationTime => MetaField::LastModificationTime(value),
            FieldTag::RequestHandlingTime => MetaField::RequestHandlingTime(value),
            _ => return None,
        };
        Some(field)
    }

    /// Checks that the field fits its length prefixes.
    pub(crate) fn validate(&self) -> FrameResult<()> {
        match self {
            MetaField::SourceInfo(info) if info.app_name.len() > MAX_APP_NAME_LEN => {
                Err(FrameError::TooLong {
                    what: "source app name",
                    len: info.app_name.len(),
                    limit: MAX_APP_NAME_LEN,
                })
            }
            MetaField::CorrelationId(bytes) | MetaField::UdfName(bytes)
                if bytes.len() > MAX_SHORT_STRING_LEN =>
            {
                Err(FrameError::TooLong {
                    what: "meta string",
                    len: bytes.len(),
                    limit: MAX_SHORT_STRING_LEN,
                })
            }
            MetaField::Unknown { tag_byte, raw } => {
                let size_type = tag_byte >> SIZE_TYPE_SHIFT;
                let consistent = if size_type == SIZE_TYPE_VARIABLE {
                    !raw.is_empty() && usize::from(raw[0]) == raw.len()
                } else {
                    raw.len() == fixed_width(size_type)
                };
                if consistent {
                    Ok(())
                } else {
                    Err(FrameError::Field {
                        tag: tag_byte & TAG_MASK,
                        reason: "raw bytes disagree with size type",
                    })
                }
            }
            _ => Ok(()),
        }
    }

    /// Writes the field data (not the tag byte).
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        match self {
            MetaField::RequestId(id) | MetaField::OriginatorRequestId(id) => buf.put_slice(id),
            MetaField::SourceInfo(info) => {
                let size = info.encoded_len();
                let mut len_and_flag = info.app_name.len() as u8;
                buf.put_u8(size as u8);
                match info.ip {
                    IpAddr::V4(ip) => {
                        buf.put_u8(len_and_flag);
                        buf.put_u16(info.port);
                        buf.put_slice(&ip.octets());
                    }
                    IpAddr::V6(ip) => {
                        len_and_flag |= IPV6_FLAG;
                        buf.put_u8(len_and_flag);
                        buf.put_u16(info.port);
                        buf.put_slice(&ip.octets());
                    }
                }
                buf.put_slice(&info.app_name);
                buf.put_bytes(0, size - (4 + info.ip_len() + info.app_name.len()));
            }
            MetaField::CorrelationId(bytes) | MetaField::UdfName(bytes) => {
                let size = self.encoded_len();
                buf.put_u8(size as u8);
                buf.put_u8(bytes.len() as u8);
                buf.put_slice(bytes);
                buf.put_bytes(0, size - 2 - bytes.len());
            }
            MetaField::Unknown { raw, .. } => buf.put_slice(raw),
            _ => {
                let value = self.scalar().unwrap_or_default();
                if self.tag_byte() >> SIZE_TYPE_SHIFT == SIZE_TYPE_4 {
                    buf.put_u32(value as u32);
                } else {
                    buf.put_u64(value);
                }
            }
        }
    }

    /// Reads the data for `tag_byte` from the front of `buf`.
    ///
    /// Unknown tags and known tags with an unexpected width become `Unknown`;
    /// only truncated or self-inconsistent data is an error.
    pub(crate) fn decode(tag_byte: u8, buf: &mut &[u8]) -> FrameResult<Self> {
        let tag = tag_byte & TAG_MASK;
        let size_type = tag_byte >> SIZE_TYPE_SHIFT;

        let len = if size_type == SIZE_TYPE_VARIABLE {
            ensure(&*buf, 1)?;
            let size = usize::from(buf[0]);
            if size == 0 {
                return Err(FrameError::Field {
                    tag,
                    reason: "variable field declares zero size",
                });
            }
            size
        } else {
            fixed_width(size_type)
        };
        ensure(&*buf, len)?;
        let raw = buf.copy_to_bytes(len);

        let known = FieldTag::from_u8(tag);
        if let (Some(tag), SIZE_TYPE_4 | SIZE_TYPE_8) = (known, size_type) {
            let value = if size_type == SIZE_TYPE_4 {
                u64::from((&raw[..]).get_u32())
            } else {
                (&raw[..]).get_u64()
            };
            if let Some(field) = Self::from_scalar(tag, value) {
                return Ok(field);
            }
        }

        let field = match (known, size_type) {
            (Some(FieldTag::RequestId), SIZE_TYPE_16) => {
                MetaField::RequestId(uuid_bytes(tag, &raw)?)
            }
            (Some(FieldTag::OriginatorRequestId), SIZE_TYPE_16) => {
                MetaField::OriginatorRequestId(uuid_bytes(tag, &raw)?)
            }
            (Some(FieldTag::SourceInfo), SIZE_TYPE_VARIABLE) => {
                MetaField::SourceInfo(decode_source_info(tag, &raw)?)
            }
            (Some(FieldTag::CorrelationId), SIZE_TYPE_VARIABLE) => {
                MetaField::CorrelationId(decode_short_string(tag, &raw)?)
            }
            (Some(FieldTag::UdfName), SIZE_TYPE_VARIABLE) => {
                MetaField::UdfName(decode_short_string(tag, &raw)?)
            }
            _ => MetaField::Unknown { tag_byte, raw },
        };
        Ok(field)
    }
}

fn fixed_width(size_type: u8) -> usize {
    1usize << (size_type + 1)
}

fn uuid_bytes(tag: u8, raw: &Bytes) -> FrameResult<[u8; 16]> {
    <[u8; 16]>::try_from(&raw[..]).map_err(|_| FrameError::Field {
        tag,
        reason: "id is not 16 bytes",
    })
}

fn decode_source_info(tag: u8, raw: &Bytes) -> FrameResult<SourceInfo> {
    if raw.len() < 4 {
        return Err(FrameError::Field {
            tag,
            reason: "source info shorter than its header",
        });
    }
    let len_and_flag = raw[1];
    let app_len = usize::from(len_and_flag & !IPV6_FLAG);
    let ip_len = if len_and_flag & IPV6_FLAG != 0 { 16 } else { 4 };
    if 4 + ip_len + app_len > raw.len() {
        return Err(FrameError::Field {
            tag,
            reason: "source info overruns its size",
        });
    }

    let port = u16::from_be_bytes([raw[2], raw[3]]);
    let ip_bytes = &raw[4..4 + ip_len];
    let ip = match <[u8; 16]>::try_from(ip_bytes) {
        Ok(octets) => IpAddr::V6(Ipv6Addr::from(octets)),
        Err(_) => IpAddr::V4(Ipv4Addr::new(ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3])),
    };
    let app_name = raw.slice(4 + ip_len..4 + ip_len + app_len);
    Ok(SourceInfo { ip, port, app_name })
}

fn decode_short_string(tag: u8, raw: &Bytes) -> FrameResult<Bytes> {
    if raw.len() < 2 || 2 + usize::from(raw[1]) > raw.len() {
        return Err(FrameError::Field {
            tag,
            reason: "string overruns its size",
        });
    }
    Ok(raw.slice(2..2 + usize::from(raw[1])))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(field: &MetaField) -> Vec<u8> {
        let mut buf = Vec::new();
        field.encode(&mut buf);
        assert_eq!(buf.len(), field.encoded_len());
        buf
    }

    fn decode(tag_byte: u8, data: &[u8]) -> FrameResult<(MetaField, usize)> {
        let mut cur = data;
        let field = MetaField::decode(tag_byte, &mut cur)?;
        Ok((field, data.len() - cur.len()))
    }

    #[test]
    fn test_scalar_uses_four_bytes_when_it_fits() {
        let field = MetaField::Version(9);
        assert_eq!(field.tag_byte(), 0x22);
        assert_eq!(encode(&field), vec![0, 0, 0, 9]);
    }

    #[test]
    fn test_scalar_widens_past_u32() {
        let field = MetaField::TimeToLive(u64::from(u32::MAX) + 1);
        assert_eq!(field.tag_byte(), 0x41);
        let bytes = encode(&field);
        assert_eq!(bytes.len(), 8);
        assert_eq!(decode(0x41, &bytes).unwrap(), (field, 8));
    }

    #[test]
    fn test_scalar_decodes_eight_byte_width() {
        let data = 1234u64.to_be_bytes();
        let (field, used) = decode(0x40 | 10, &data).unwrap();
        assert_eq!(field, MetaField::RequestHandlingTime(1234));
        assert_eq!(used, 8);
    }

    #[test]
    fn test_last_modification_time_is_eight_bytes() {
        let field = MetaField::LastModificationTime(5);
        assert_eq!(field.tag_byte(), 0x47);
        assert_eq!(encode(&field).len(), 8);
    }

    #[test]
    fn test_source_info_ipv4_layout() {
        let info = SourceInfo::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)), 8080, "app");
        let field = MetaField::SourceInfo(info.clone());
        assert_eq!(field.tag_byte(), 0x06);
        let bytes = encode(&field);
        assert_eq!(bytes, vec![12, 3, 0x1F, 0x90, 10, 0, 0, 7, b'a', b'p', b'p', 0]);
        assert_eq!(decode(0x06, &bytes).unwrap(), (field, 12));
    }

    #[test]
    fn test_source_info_ipv6_sets_flag() {
        let info = SourceInfo::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 1, "x");
        let bytes = encode(&MetaField::SourceInfo(info.clone()));
        assert_eq!(bytes[0], 24);
        assert_eq!(bytes[1], 0x81);
        let (decoded, _) = decode(0x06, &bytes).unwrap();
        assert_eq!(decoded, MetaField::SourceInfo(info));
    }

    #[test]
    fn test_correlation_id_padding() {
        let field = MetaField::CorrelationId(Bytes::from_static(b"abcdef"));
        let bytes = encode(&field);
        assert_eq!(bytes, vec![8, 6, b'a', b'b', b'c', b'd', b'e', b'f']);
        assert_eq!(decode(field.tag_byte(), &bytes).unwrap().0, field);
    }

    #[test]
    fn test_unknown_fixed_tag_is_kept_raw() {
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 0xAA];
        let (field, used) = decode(0x40 | 0x1D, &data).unwrap();
        assert_eq!(used, 8);
        assert_eq!(field.tag(), None);
        assert_eq!(encode(&field), data[..8].to_vec());
    }

    #[test]
    fn test_unknown_variable_tag_skips_by_size_byte() {
        let data = [8, 0, 0, 0, 0, 0, 0, 0, 0xFF];
        let (field, used) = decode(0x1C, &data).unwrap();
        assert_eq!(used, 8);
        assert!(matches!(field, MetaField::Unknown { tag_byte: 0x1C, .. }));
    }

    #[test]
    fn test_known_tag_with_odd_width_becomes_unknown() {
        let data = [0u8; 16];
        let (field, _) = decode(0x60 | 2, &data).unwrap();
        assert!(matches!(field, MetaField::Unknown { .. }));
    }

    #[test]
    fn test_truncated_field_fails() {
        assert!(matches!(
            decode(0x22, &[0, 0]),
            Err(FrameError::Truncated { needed: 4, available: 2 })
        ));
        assert!(matches!(decode(0x09, &[12, 3, 0]), Err(FrameError::Truncated { .. })));
        assert!(matches!(decode(0x09, &[0]), Err(FrameError::Field { tag: 9, .. })));
    }

    #[test]
    fn test_validate_limits() {
        let long = MetaField::CorrelationId(Bytes::from(vec![b'x'; MAX_SHORT_STRING_LEN + 1]));
        assert!(matches!(long.validate(), Err(FrameError::TooLong { .. })));
        let max = MetaField::CorrelationId(Bytes::from(vec![b'x'; MAX_SHORT_STRING_LEN]));
        assert!(max.validate().is_ok());
        assert!(max.encoded_len() <= 255);
    }
}
