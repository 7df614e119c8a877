//! # Meta Component
//!
//! Purpose: Hold the ordered list of meta fields attached to one message and
//! frame it as a component.
//!
//! ## Design Principles
//!
//! 1. **Append Order Is Kept**: The field list is stored exactly as built or
//!    received, duplicates included.
//! 2. **Last Wins**: Typed accessors scan from the end, so the most recently
//!    appended value of a tag is the authoritative one.
//! 3. **Duplicates Are Suspicious**: Debug builds log a warning when a tag is
//!    appended twice.
//!
//! ## Layout
//!
//! ```text
//! +------------+---------+-------+----------------------+-----+-------------+-----+
//! | size (u32) | tag (2) | count | count x tag byte     | ->4 | field data  | ->8 |
//! +------------+---------+-------+----------------------+-----+-------------+-----+
//! ```

use bytes::{Buf, BufMut, Bytes};
use tracing::warn;

use crate::error::{FrameError, FrameResult};
use crate::field::{FieldTag, MetaField, SourceInfo};
use crate::wire::{ensure, pad};

/// Component tag identifying a meta component.
pub const META_COMPONENT_TAG: u8 = 0x02;

/// Size, tag and field count bytes.
const META_FIXED_HEADER: usize = 6;

/// Ordered collection of meta fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataComponent {
    fields: Vec<MetaField>,
}

impl MetadataComponent {
    pub fn new() -> Self {
        MetadataComponent { fields: Vec::new() }
    }

    /// Appends a field, keeping any earlier field with the same tag.
    pub fn push(&mut self, field: MetaField) {
        if cfg!(debug_assertions) {
            if let Some(tag) = field.tag() {
                if self.fields.iter().any(|f| f.tag() == Some(tag)) {
                    warn!(?tag, "duplicate meta field appended; the last value wins");
                }
            }
        }
        self.fields.push(field);
    }

    /// Replaces the authoritative field with the same tag, or appends.
    pub fn set(&mut self, field: MetaField) {
        let tag = field.tag();
        if tag.is_some() {
            if let Some(slot) = self.fields.iter_mut().rev().find(|f| f.tag() == tag) {
                *slot = field;
                return;
            }
        }
        self.fields.push(field);
    }

    /// Fields in append order.
    pub fn field_list(&self) -> &[MetaField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Bytes needed to frame this component; zero when there are no fields,
    /// since an empty meta component is not sent.
    pub fn buffer_len(&self) -> usize {
        if self.fields.is_empty() {
            return 0;
        }
        let header = pad(META_FIXED_HEADER + self.fields.len(), 4);
        let data: usize = self.fields.iter().map(MetaField::encoded_len).sum();
        pad(header + data, 8)
    }

    pub fn version(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::Version(v) => Some(*v),
            _ => None,
        })
    }

    pub fn time_to_live(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::TimeToLive(v) => Some(*v),
            _ => None,
        })
    }

    pub fn creation_time(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::CreationTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn expiration_time(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::ExpirationTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn request_handling_time(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::RequestHandlingTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn last_modification_time(&self) -> Option<u64> {
        self.last(|f| match f {
            MetaField::LastModificationTime(v) => Some(*v),
            _ => None,
        })
    }

    pub fn request_id(&self) -> Option<[u8; 16]> {
        self.last(|f| match f {
            MetaField::RequestId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn originator_request_id(&self) -> Option<[u8; 16]> {
        self.last(|f| match f {
            MetaField::OriginatorRequestId(id) => Some(*id),
            _ => None,
        })
    }

    pub fn source_info(&self) -> Option<&SourceInfo> {
        self.fields.iter().rev().find_map(|f| match f {
            MetaField::SourceInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn correlation_id(&self) -> Option<Bytes> {
        self.last(|f| match f {
            MetaField::CorrelationId(id) => Some(id.clone()),
            _ => None,
        })
    }

    pub fn udf_name(&self) -> Option<Bytes> {
        self.last(|f| match f {
            MetaField::UdfName(name) => Some(name.clone()),
            _ => None,
        })
    }

    /// True when at least one field carries `tag`.
    pub fn contains(&self, tag: FieldTag) -> bool {
        self.fields.iter().any(|f| f.tag() == Some(tag))
    }

    fn last<T>(&self, pick: impl Fn(&MetaField) -> Option<T>) -> Option<T> {
        self.fields.iter().rev().find_map(pick)
    }

    pub(crate) fn validate(&self) -> FrameResult<()> {
        if self.fields.len() > usize::from(u8::MAX) {
            return Err(FrameError::TooLong {
                what: "meta field count",
                len: self.fields.len(),
                limit: usize::from(u8::MAX),
            });
        }
        self.fields.iter().try_for_each(MetaField::validate)
    }

    /// Writes the component; callers check `validate` and skip empty lists.
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        let total = self.buffer_len();
        let header = pad(META_FIXED_HEADER + self.fields.len(), 4);

        buf.put_u32(total as u32);
        buf.put_u8(META_COMPONENT_TAG);
        buf.put_u8(self.fields.len() as u8);
        for field in &self.fields {
            buf.put_u8(field.tag_byte());
        }
        buf.put_bytes(0, header - META_FIXED_HEADER - self.fields.len());

        let mut written = header;
        for field in &self.fields {
            field.encode(buf);
            written += field.encoded_len();
        }
        buf.put_bytes(0, total - written);
    }

    /// Parses a whole component, `component` starting at its size word.
    pub(crate) fn decode(component: &[u8]) -> FrameResult<Self> {
        let mut cur = component;
        ensure(&cur, META_FIXED_HEADER)?;
        cur.advance(5);
        let count = usize::from(cur.get_u8());

        let header = pad(META_FIXED_HEADER + count, 4);
        ensure(&cur, header - META_FIXED_HEADER)?;
        let tag_bytes = &cur[..count];
        cur.advance(header - META_FIXED_HEADER);

        let mut meta = MetadataComponent {
            fields: Vec::with_capacity(count),
        };
        for &tag_byte in tag_bytes {
            let field = MetaField::decode(tag_byte, &mut cur)?;
            meta.push(field);
        }
        Ok(meta)
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn roundtrip(meta: &MetadataComponent) -> MetadataComponent {
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        assert_eq!(buf.len(), meta.buffer_len());
        assert_eq!(buf.len() % 8, 0);
        MetadataComponent::decode(&buf).unwrap()
    }

    #[test]
    fn test_last_wins() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::Version(8));
        meta.push(MetaField::Version(9));

        assert_eq!(meta.version(), Some(9));
        assert_eq!(meta.field_list().len(), 2);
        assert_eq!(roundtrip(&meta).version(), Some(9));
    }

    #[test]
    fn test_absent_accessors() {
        let meta = MetadataComponent::new();
        assert_eq!(meta.version(), None);
        assert_eq!(meta.time_to_live(), None);
        assert_eq!(meta.request_handling_time(), None);
        assert_eq!(meta.buffer_len(), 0);
    }

    #[test]
    fn test_set_replaces_last_same_tag() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::TimeToLive(10));
        meta.push(MetaField::Version(1));
        meta.set(MetaField::TimeToLive(20));
        meta.set(MetaField::CreationTime(5));

        assert_eq!(
            meta.field_list(),
            &[
                MetaField::TimeToLive(20),
                MetaField::Version(1),
                MetaField::CreationTime(5)
            ]
        );
    }

    #[test]
    fn test_buffer_len_matches_layout() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::TimeToLive(100));
        meta.push(MetaField::Version(3));
        meta.push(MetaField::RequestId([7; 16]));
        // header: pad4(6 + 3) = 12, data: 4 + 4 + 16 = 24, total pad8(36) = 40
        assert_eq!(meta.buffer_len(), 40);
    }

    #[test]
    fn test_mixed_fields_roundtrip() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::TimeToLive(100));
        meta.push(MetaField::CreationTime(1_700_000_000));
        meta.push(MetaField::CorrelationId(Bytes::from_static(b"corr-1")));
        meta.push(MetaField::SourceInfo(SourceInfo::new(
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            0,
            "svc",
        )));
        meta.push(MetaField::LastModificationTime(1_700_000_000_000_000_000));
        meta.push(MetaField::RequestHandlingTime(250));

        let decoded = roundtrip(&meta);
        assert_eq!(decoded, meta);
        assert_eq!(decoded.creation_time(), Some(1_700_000_000));
        assert_eq!(decoded.correlation_id(), Some(Bytes::from_static(b"corr-1")));
        assert_eq!(decoded.source_info().map(|s| s.port), Some(0));
    }

    #[test]
    fn test_unknown_tag_does_not_hide_known_fields() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::Version(4));
        meta.push(MetaField::Unknown {
            tag_byte: 0x20 | 0x1E,
            raw: Bytes::from_static(&[1, 2, 3, 4]),
        });
        meta.push(MetaField::TimeToLive(60));

        let decoded = roundtrip(&meta);
        assert_eq!(decoded.version(), Some(4));
        assert_eq!(decoded.time_to_live(), Some(60));
        assert_eq!(decoded.len(), 3);
    }

    #[test]
    fn test_truncated_component_fails() {
        let mut meta = MetadataComponent::new();
        meta.push(MetaField::Version(4));
        meta.push(MetaField::RequestId([1; 16]));
        let mut buf = Vec::new();
        meta.encode(&mut buf);
        buf.truncate(14);
        assert!(matches!(
            MetadataComponent::decode(&buf),
            Err(FrameError::Truncated { .. })
        ));
    }
}
