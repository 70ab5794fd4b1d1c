//! Envelope format for the Kinetic wire protocol.
//!
//! Envelope layout (9 bytes prefix + command + optional value):
//!
//! ```text
//! +-------+-------------+-----------+
//! | magic | command_len | value_len |
//! | 1 byte|   4 bytes   |  4 bytes  |
//! +-------+-------------+-----------+
//! | command (command_len bytes)     |
//! | value   (value_len bytes)       |
//! +---------------------------------+
//! ```
//!
//! Both lengths are big-endian unsigned integers.

use crate::error::ProtocolError;
use crate::{MAX_COMMAND_SIZE, MAX_VALUE_SIZE};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Magic byte identifying an envelope: 'F'.
pub const MAGIC: u8 = b'F';

/// Size of the fixed envelope prefix in bytes (1+4+4 = 9).
pub const ENVELOPE_PREFIX_SIZE: usize = 9;

/// The fixed-size prefix that precedes every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeHeader {
    /// Length of the serialized command.
    pub command_len: u32,
    /// Length of the attached value (zero when absent).
    pub value_len: u32,
}

impl EnvelopeHeader {
    pub fn new(command_len: u32, value_len: u32) -> Self {
        Self {
            command_len,
            value_len,
        }
    }

    /// Encodes the prefix into its 9-byte wire form.
    pub fn encode(&self) -> [u8; ENVELOPE_PREFIX_SIZE] {
        let mut out = [0u8; ENVELOPE_PREFIX_SIZE];
        out[0] = MAGIC;
        out[1..5].copy_from_slice(&self.command_len.to_be_bytes());
        out[5..9].copy_from_slice(&self.value_len.to_be_bytes());
        out
    }

    /// Parses and validates a 9-byte prefix.
    pub fn decode(prefix: &[u8; ENVELOPE_PREFIX_SIZE]) -> Result<Self, ProtocolError> {
        if prefix[0] != MAGIC {
            return Err(ProtocolError::InvalidMagic(prefix[0]));
        }

        let command_len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
        if command_len > MAX_COMMAND_SIZE {
            return Err(ProtocolError::CommandTooLarge {
                size: command_len,
                max: MAX_COMMAND_SIZE,
            });
        }
        let value_len = u32::from_be_bytes([prefix[5], prefix[6], prefix[7], prefix[8]]);
        if value_len as usize > MAX_VALUE_SIZE {
            return Err(ProtocolError::DeclaredValueTooLarge {
                size: value_len,
                max: MAX_VALUE_SIZE,
            });
        }

        Ok(Self {
            command_len,
            value_len,
        })
    }

    /// Total number of bytes the envelope occupies on the wire.
    pub fn total_len(&self) -> usize {
        ENVELOPE_PREFIX_SIZE + self.command_len as usize + self.value_len as usize
    }
}

/// A fully buffered envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Serialized command bytes.
    pub command: Bytes,
    /// Attached value, if any.
    pub value: Option<Bytes>,
}

impl Envelope {
    pub fn new(command: Bytes) -> Self {
        Self {
            command,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Bytes) -> Self {
        self.value = Some(value);
        self
    }

    /// Returns the prefix describing this envelope.
    pub fn header(&self) -> Result<EnvelopeHeader, ProtocolError> {
        let command_len = u32::try_from(self.command.len()).unwrap_or(u32::MAX);
        if command_len > MAX_COMMAND_SIZE {
            return Err(ProtocolError::CommandTooLarge {
                size: command_len,
                max: MAX_COMMAND_SIZE,
            });
        }
        let value_len = match &self.value {
            Some(v) => u32::try_from(v.len()).map_err(|_| ProtocolError::ValueTooLarge {
                size: v.len(),
                max: u32::MAX as usize,
            })?,
            None => 0,
        };
        Ok(EnvelopeHeader::new(command_len, value_len))
    }

    /// Encodes the envelope into a single buffer.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        let header = self.header()?;
        let mut buf = BytesMut::with_capacity(header.total_len());

        buf.put_slice(&header.encode());
        buf.put_slice(&self.command);
        if let Some(ref value) = self.value {
            buf.put_slice(value);
        }

        Ok(buf)
    }

    /// Decodes an envelope from a buffer.
    ///
    /// Returns `Ok(Some(envelope))` if a complete envelope was decoded,
    /// `Ok(None)` if more data is needed, or `Err` on a corrupt prefix.
    /// Nothing is consumed unless a complete envelope is available.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < ENVELOPE_PREFIX_SIZE {
            return Ok(None);
        }

        let mut prefix = [0u8; ENVELOPE_PREFIX_SIZE];
        prefix.copy_from_slice(&buf[..ENVELOPE_PREFIX_SIZE]);
        let header = EnvelopeHeader::decode(&prefix)?;

        if buf.len() < header.total_len() {
            return Ok(None);
        }

        buf.advance(ENVELOPE_PREFIX_SIZE);
        let command = buf.split_to(header.command_len as usize).freeze();
        let value = if header.value_len > 0 {
            Some(buf.split_to(header.value_len as usize).freeze())
        } else {
            None
        };

        Ok(Some(Self { command, value }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_layout() {
        let prefix = EnvelopeHeader::new(0x0102_0304, 5).encode();
        assert_eq!(prefix, [b'F', 1, 2, 3, 4, 0, 0, 0, 5]);
    }

    #[test]
    fn test_envelope_roundtrip_with_value() {
        let envelope = Envelope::new(Bytes::from_static(b"command"))
            .with_value(Bytes::from_static(b"value bytes"));

        let mut buf = envelope.encode().unwrap();
        let decoded = Envelope::decode(&mut buf).unwrap().unwrap();

        assert_eq!(decoded, envelope);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_envelope_without_value() {
        let envelope = Envelope::new(Bytes::from_static(b"noop"));
        let mut buf = envelope.encode().unwrap();
        assert_eq!(&buf[5..9], &[0, 0, 0, 0]);

        let decoded = Envelope::decode(&mut buf).unwrap().unwrap();
        assert!(decoded.value.is_none());
    }

    #[test]
    fn test_invalid_magic() {
        let mut buf = BytesMut::from(&b"\x00\x00\x00\x00\x01\x00\x00\x00\x00x"[..]);
        let result = Envelope::decode(&mut buf);
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(0x00))));
        // The corrupt prefix is left in place rather than partially consumed.
        assert_eq!(buf.len(), 10);
    }

    #[test]
    fn test_incomplete_envelope() {
        let mut buf = BytesMut::from(&b"F\x00\x00"[..]);
        assert!(Envelope::decode(&mut buf).unwrap().is_none());

        let full = Envelope::new(Bytes::from_static(b"abcdef"))
            .encode()
            .unwrap();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert!(Envelope::decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), full.len() - 1);
    }

    #[test]
    fn test_command_too_large() {
        let mut prefix = EnvelopeHeader::new(0, 0).encode();
        prefix[1..5].copy_from_slice(&(MAX_COMMAND_SIZE + 1).to_be_bytes());
        let result = EnvelopeHeader::decode(&prefix);
        assert!(matches!(result, Err(ProtocolError::CommandTooLarge { .. })));
    }

    #[test]
    fn test_declared_value_too_large() {
        let prefix = EnvelopeHeader::new(0, MAX_VALUE_SIZE as u32 + 1).encode();
        let result = EnvelopeHeader::decode(&prefix);
        assert!(matches!(
            result,
            Err(ProtocolError::DeclaredValueTooLarge { size, .. }) if size == MAX_VALUE_SIZE as u32 + 1
        ));

        let prefix = EnvelopeHeader::new(0, MAX_VALUE_SIZE as u32).encode();
        assert!(EnvelopeHeader::decode(&prefix).is_ok());
    }

    #[test]
    fn test_multiple_envelopes_in_buffer() {
        let first = Envelope::new(Bytes::from_static(b"one")).with_value(Bytes::from_static(b"1"));
        let second = Envelope::new(Bytes::from_static(b"two"));

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&first.encode().unwrap());
        buf.extend_from_slice(&second.encode().unwrap());

        assert_eq!(Envelope::decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(Envelope::decode(&mut buf).unwrap().unwrap(), second);
        assert!(Envelope::decode(&mut buf).unwrap().is_none());
    }
}
