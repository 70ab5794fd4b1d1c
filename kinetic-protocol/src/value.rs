//! Outbound values attached to an envelope.
//!
//! A value is either a buffer already in memory or a producer that streams
//! itself onto the transport once the envelope prefix and command have been
//! written. The producer must declare its length up front because the
//! length is part of the prefix.

use crate::error::ProtocolError;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

/// A value that knows how to write itself onto the transport.
#[async_trait]
pub trait ValueSource: Send {
    /// Number of bytes the source will write.
    fn len(&self) -> u32;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the value and returns the number of bytes written.
    async fn send_to(
        self: Box<Self>,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ProtocolError>;
}

/// A value attached to an outbound command.
pub enum Value {
    /// In-memory bytes, written by the codec in bounded chunks.
    Bytes(Bytes),
    /// Self-streaming producer.
    Stream(Box<dyn ValueSource>),
}

impl Value {
    /// Wraps a self-streaming producer.
    pub fn stream(source: impl ValueSource + 'static) -> Self {
        Value::Stream(Box::new(source))
    }

    pub fn len(&self) -> usize {
        match self {
            Value::Bytes(b) => b.len(),
            Value::Stream(s) => s.len() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Value::Stream(s) => f.debug_tuple("Stream").field(&s.len()).finish(),
        }
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(bytes))
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Bytes(Bytes::from(s))
    }
}

/// Streams a value of known length from any async reader (a file, a pipe).
pub struct ReaderSource<R> {
    reader: R,
    len: u32,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, len: u32) -> Self {
        Self { reader, len }
    }
}

#[async_trait]
impl<R> ValueSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn len(&self) -> u32 {
        self.len
    }

    async fn send_to(
        self: Box<Self>,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<u64, ProtocolError> {
        let this = *self;
        let mut limited = this.reader.take(u64::from(this.len));
        let written = tokio::io::copy(&mut limited, writer).await?;
        Ok(written)
    }
}
