//! # Payload Component
//!
//! Namespace, key and optional value of one operation. The value is carried
//! as-is; the payload type only records whether a peer compressed or
//! encrypted it.
//!
//! ```text
//! +------------+---------+--------+---------+-----------+-----------+-----+-------------+-----+
//! | size (u32) | tag (1) | ns len | key len | value len | namespace | key | value field | ->8 |
//! +------------+---------+--------+---------+-----------+-----------+-----+-------------+-----+
//! | 4B         | 1B      | 1B     | 2B      | 4B        |           |     |             |     |
//! +------------+---------+--------+---------+-----------+-----------+-----+-------------+-----+
//!
//! value field: payload type (1B) [type 3: name len (1B) + name] data
//! value len is 0 when the message carries no value.
//! ```

use bytes::{Buf, BufMut, Bytes};

use crate::error::{FrameError, FrameResult};
use crate::wire::{ensure, pad};

/// Component tag identifying a payload component.
pub const PAYLOAD_COMPONENT_TAG: u8 = 0x01;

const PAYLOAD_FIXED_HEADER: usize = 12;

/// How the value bytes were transformed by the sender.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PayloadType {
    #[default]
    Clear,
    EncryptedByClient,
    EncryptedByProxy,
    /// Compressed by the client; carries the algorithm name, e.g. `Snappy`.
    Compressed { algorithm: Bytes },
}

impl PayloadType {
    fn code(&self) -> u8 {
        match self {
            PayloadType::Clear => 0,
            PayloadType::EncryptedByClient => 1,
            PayloadType::EncryptedByProxy => 2,
            PayloadType::Compressed { .. } => 3,
        }
    }

    fn header_len(&self) -> usize {
        match self {
            PayloadType::Compressed { algorithm } => 2 + algorithm.len(),
            _ => 1,
        }
    }
}

/// Namespace, key and optional value of one message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadComponent {
    pub namespace: Bytes,
    pub key: Bytes,
    pub value: Option<Bytes>,
    pub payload_type: PayloadType,
}

impl PayloadComponent {
    pub fn new(namespace: impl Into<Bytes>, key: impl Into<Bytes>) -> Self {
        PayloadComponent {
            namespace: namespace.into(),
            key: key.into(),
            value: None,
            payload_type: PayloadType::Clear,
        }
    }

    pub fn with_value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// True when there is nothing to send; such a component is omitted.
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.key.is_empty() && self.value.is_none()
    }

    fn value_field_len(&self) -> usize {
        match &self.value {
            Some(value) => self.payload_type.header_len() + value.len(),
            None => 0,
        }
    }

    /// Bytes needed to frame this component, zero when empty.
    pub fn buffer_len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        pad(
            PAYLOAD_FIXED_HEADER + self.namespace.len() + self.key.len() + self.value_field_len(),
            8,
        )
    }

    pub(crate) fn validate(&self) -> FrameResult<()> {
        check_len("namespace", self.namespace.len(), usize::from(u8::MAX))?;
        check_len("key", self.key.len(), usize::from(u16::MAX))?;
        if let PayloadType::Compressed { algorithm } = &self.payload_type {
            check_len("compression name", algorithm.len(), usize::from(u8::MAX))?;
        }
        check_len("value", self.value_field_len(), u32::MAX as usize)
    }

    /// Writes the component; callers check `validate` and skip empty payloads.
    pub(crate) fn encode(&self, buf: &mut impl BufMut) {
        let total = self.buffer_len();
        let value_len = self.value_field_len();

        buf.put_u32(total as u32);
        buf.put_u8(PAYLOAD_COMPONENT_TAG);
        buf.put_u8(self.namespace.len() as u8);
        buf.put_u16(self.key.len() as u16);
        buf.put_u32(value_len as u32);
        buf.put_slice(&self.namespace);
        buf.put_slice(&self.key);
        if let Some(value) = &self.value {
            buf.put_u8(self.payload_type.code());
            if let PayloadType::Compressed { algorithm } = &self.payload_type {
                buf.put_u8(algorithm.len() as u8);
                buf.put_slice(algorithm);
            }
            buf.put_slice(value);
        }
        let written = PAYLOAD_FIXED_HEADER + self.namespace.len() + self.key.len() + value_len;
        buf.put_bytes(0, total - written);
    }

    /// Parses a whole component, `component` starting at its size word.
    pub(crate) fn decode(component: &[u8]) -> FrameResult<Self> {
        let mut cur = component;
        ensure(&cur, PAYLOAD_FIXED_HEADER)?;
        cur.advance(5);
        let ns_len = usize::from(cur.get_u8());
        let key_len = usize::from(cur.get_u16());
        let value_len = cur.get_u32() as usize;

        ensure(&cur, ns_len + key_len + value_len)?;
        let namespace = cur.copy_to_bytes(ns_len);
        let key = cur.copy_to_bytes(key_len);

        let mut payload = PayloadComponent {
            namespace,
            key,
            value: None,
            payload_type: PayloadType::Clear,
        };
        if value_len == 0 {
            return Ok(payload);
        }

        let mut field = cur.copy_to_bytes(value_len);
        payload.payload_type = match field.get_u8() {
            0 => PayloadType::Clear,
            1 => PayloadType::EncryptedByClient,
            2 => PayloadType::EncryptedByProxy,
            3 => {
                ensure(&field, 1)?;
                let name_len = usize::from(field.get_u8());
                ensure(&field, name_len)?;
                PayloadType::Compressed {
                    algorithm: field.copy_to_bytes(name_len),
                }
            }
            _ => {
                return Err(FrameError::Component {
                    tag: PAYLOAD_COMPONENT_TAG,
                    reason: "unknown payload type",
                })
            }
        };
        payload.value = Some(field);
        Ok(payload)
    }
}

fn check_len(what: &'static str, len: usize, limit: usize) -> FrameResult<()> {
    if len > limit {
        return Err(FrameError::TooLong { what, len, limit });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payload: &PayloadComponent) -> PayloadComponent {
        let mut buf = Vec::new();
        payload.encode(&mut buf);
        assert_eq!(buf.len(), payload.buffer_len());
        PayloadComponent::decode(&buf).unwrap()
    }

    #[test]
    fn test_layout_with_value() {
        let payload = PayloadComponent::new("ns", "42").with_value("abc");
        let mut buf = Vec::new();
        payload.encode(&mut buf);

        // 12 header + 2 ns + 2 key + (1 type + 3 data) = 20 -> 24
        assert_eq!(buf.len(), 24);
        assert_eq!(&buf[0..4], &[0, 0, 0, 24]);
        assert_eq!(buf[4], PAYLOAD_COMPONENT_TAG);
        assert_eq!(buf[5], 2);
        assert_eq!(&buf[6..8], &[0, 2]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 4]);
        assert_eq!(&buf[12..20], b"ns42\x00abc");
    }

    #[test]
    fn test_no_value_vs_empty_value() {
        let absent = PayloadComponent::new("ns", "k");
        assert_eq!(roundtrip(&absent).value, None);

        let empty = PayloadComponent::new("ns", "k").with_value(Bytes::new());
        assert_eq!(roundtrip(&empty).value, Some(Bytes::new()));
    }

    #[test]
    fn test_compressed_flag_is_carried() {
        let mut payload = PayloadComponent::new("ns", "k").with_value(vec![9u8; 40]);
        payload.payload_type = PayloadType::Compressed {
            algorithm: Bytes::from_static(b"Snappy"),
        };
        let decoded = roundtrip(&payload);
        assert_eq!(decoded, payload);
        assert_eq!(decoded.value.map(|v| v.len()), Some(40));
    }

    #[test]
    fn test_large_value() {
        let payload = PayloadComponent::new("ns", "big").with_value(vec![0xAB; 64 * 1024]);
        assert_eq!(roundtrip(&payload), payload);
    }

    #[test]
    fn test_unknown_payload_type_rejected() {
        let mut buf = Vec::new();
        PayloadComponent::new("n", "k").with_value("v").encode(&mut buf);
        buf[14] = 9;
        assert!(matches!(
            PayloadComponent::decode(&buf),
            Err(FrameError::Component { .. })
        ));
    }

    #[test]
    fn test_key_too_long() {
        let payload = PayloadComponent::new("ns", vec![b'k'; 70_000]);
        assert!(matches!(payload.validate(), Err(FrameError::TooLong { what: "key", .. })));
    }
}
