//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors that can occur during framing, signing or decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid magic byte: expected 0x46 ('F'), got {0:#04x}")]
    InvalidMagic(u8),

    #[error("command too large: {size} bytes (max {max})")]
    CommandTooLarge { size: u32, max: u32 },

    #[error("value too large: {size} bytes (max {max})")]
    ValueTooLarge { size: usize, max: usize },

    #[error("declared value length {size} exceeds {max} bytes")]
    DeclaredValueTooLarge { size: u32, max: usize },

    #[error("value length mismatch: declared {declared} bytes, source produced {actual}")]
    ValueLengthMismatch { declared: u32, actual: u64 },

    #[error("peer disconnected: {0}")]
    Disconnected(&'static str),

    #[error("malformed command: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid HMAC secret")]
    InvalidSecret,

    #[error("unknown {kind} code: {code}")]
    UnknownCode { kind: &'static str, code: i32 },

    #[error("invalid security configuration: {0}")]
    InvalidSecurity(String),
}

impl ProtocolError {
    /// Returns whether the error means the byte stream can no longer be trusted.
    pub fn is_stream_fault(&self) -> bool {
        matches!(
            self,
            ProtocolError::InvalidMagic(_)
                | ProtocolError::CommandTooLarge { .. }
                | ProtocolError::DeclaredValueTooLarge { .. }
                | ProtocolError::ValueLengthMismatch { .. }
                | ProtocolError::Disconnected(_)
                | ProtocolError::Decode(_)
                | ProtocolError::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidMagic(0x00);
        assert!(err.to_string().contains("0x00"));

        let err = ProtocolError::CommandTooLarge { size: 100, max: 50 };
        assert!(err.to_string().contains("100"));

        let err = ProtocolError::Disconnected("connection closed by peer");
        assert!(err.to_string().contains("closed by peer"));

        let err = ProtocolError::UnknownCode {
            kind: "role",
            code: 6,
        };
        let msg = err.to_string();
        assert!(msg.contains("role") && msg.contains('6'));
    }

    #[test]
    fn test_stream_fault_classification() {
        assert!(ProtocolError::InvalidMagic(1).is_stream_fault());
        assert!(ProtocolError::Disconnected("eof").is_stream_fault());
        assert!(ProtocolError::DeclaredValueTooLarge { size: 2, max: 1 }.is_stream_fault());
        assert!(!ProtocolError::InvalidSecret.is_stream_fault());
        assert!(!ProtocolError::ValueTooLarge { size: 2, max: 1 }.is_stream_fault());
        assert!(!ProtocolError::InvalidSecurity("x".into()).is_stream_fault());
    }
}
