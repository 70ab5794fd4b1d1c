//! Inbound values left on the socket until the caller reads them.
//!
//! The read half of a connection sits behind an async mutex. A receive
//! holds the lock while decoding an envelope; when the envelope carries a
//! value and the connection defers reads, the lock guard moves into a
//! [`DeferredValue`]. The next receive waits on the same lock, so it cannot
//! start until the value has been read to the end or dropped. Bytes left
//! behind by a dropped value are skipped before the next envelope is read.

use crate::error::ClientError;
use crate::stream::DriveStream;
use bytes::{Bytes, BytesMut};
use kinetic_protocol::{codec, Message, ProtocolError};
use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf};
use tokio::sync::OwnedMutexGuard;

const COPY_BUFFER_SIZE: usize = 16 * 1024;

/// Read half of a connection plus the bookkeeping for partially read values.
pub(crate) struct ReaderState {
    stream: ReadHalf<DriveStream>,
    /// Value bytes still on the socket from a dropped deferred value.
    undrained: u64,
    /// Set when a value read failed mid-transfer; the stream position is lost.
    poisoned: bool,
}

impl ReaderState {
    pub(crate) fn new(stream: ReadHalf<DriveStream>) -> Self {
        Self {
            stream,
            undrained: 0,
            poisoned: false,
        }
    }

    /// Skips any undrained value bytes, then reads the next prefix and command.
    pub(crate) async fn next_message(&mut self) -> Result<(Message, u32), ClientError> {
        if self.poisoned {
            return Err(ClientError::Disconnected(
                "an earlier value transfer failed mid-stream".to_string(),
            ));
        }
        if self.undrained > 0 {
            tracing::debug!(bytes = self.undrained, "skipping undrained value");
            codec::discard(&mut self.stream, self.undrained).await?;
            self.undrained = 0;
        }
        match codec::read_message(&mut self.stream).await {
            Ok(decoded) => Ok(decoded),
            Err(e) => {
                if let ProtocolError::InvalidMagic(byte) = &e {
                    tracing::warn!(byte, "received envelope with bad magic");
                }
                self.poisoned = true;
                Err(e.into())
            }
        }
    }

    pub(crate) async fn read_value(&mut self, len: u32) -> Result<Bytes, ClientError> {
        codec::read_bytes(&mut self.stream, len as usize)
            .await
            .map_err(|e| {
                self.poisoned = true;
                ClientError::from(e)
            })
    }
}

/// A value of known length still waiting on the socket.
///
/// Holding a `DeferredValue` blocks the next receive on its connection.
/// Dropping it early is allowed; the unread bytes are discarded on the next
/// receive.
pub struct DeferredValue {
    guard: Option<OwnedMutexGuard<ReaderState>>,
    len: u32,
    remaining: u32,
    timeout: Duration,
}

impl DeferredValue {
    pub(crate) fn new(guard: OwnedMutexGuard<ReaderState>, len: u32, timeout: Duration) -> Self {
        Self {
            guard: Some(guard),
            len,
            remaining: len,
            timeout,
        }
    }

    /// Total length of the value in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes not yet read.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Reads up to `buf.len()` bytes of the value. Returns 0 once the value
    /// has been read completely, at which point the connection is released.
    /// An empty `buf` is rejected while bytes remain.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        if self.remaining == 0 {
            self.guard = None;
            return Ok(0);
        }
        let reader = self
            .guard
            .as_mut()
            .ok_or_else(|| ClientError::Disconnected("deferred value released".to_string()))?;

        if buf.is_empty() {
            return Err(ClientError::InvalidArgument(
                "read buffer is empty while value bytes remain".to_string(),
            ));
        }
        let want = buf.len().min(self.remaining as usize);

        let n = match tokio::time::timeout(self.timeout, reader.stream.read(&mut buf[..want])).await
        {
            Ok(Ok(0)) => {
                reader.poisoned = true;
                return Err(ClientError::Disconnected(
                    "connection closed while reading value".to_string(),
                ));
            }
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                reader.poisoned = true;
                return Err(ClientError::Io(e));
            }
            Err(_) => {
                reader.poisoned = true;
                return Err(ClientError::Timeout);
            }
        };

        self.remaining -= n as u32;
        if self.remaining == 0 {
            self.guard = None;
        }
        Ok(n)
    }

    /// Reads the rest of the value into memory.
    pub async fn read_to_bytes(mut self) -> Result<Bytes, ClientError> {
        let mut buf = BytesMut::zeroed(self.remaining as usize);
        let mut filled = 0;
        while filled < buf.len() {
            filled += self.read(&mut buf[filled..]).await?;
        }
        self.guard = None;
        Ok(buf.freeze())
    }

    /// Streams the rest of the value into `writer`.
    pub async fn copy_to<W>(mut self, writer: &mut W) -> Result<u64, ClientError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut scratch = vec![0u8; COPY_BUFFER_SIZE.min(self.remaining.max(1) as usize)];
        let mut copied = 0u64;
        while self.remaining > 0 {
            let n = self.read(&mut scratch).await?;
            writer.write_all(&scratch[..n]).await?;
            copied += n as u64;
        }
        writer.flush().await?;
        self.guard = None;
        Ok(copied)
    }
}

impl Drop for DeferredValue {
    fn drop(&mut self) {
        if let Some(mut reader) = self.guard.take() {
            reader.undrained += u64::from(self.remaining);
        }
    }
}

impl fmt::Debug for DeferredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredValue")
            .field("len", &self.len)
            .field("remaining", &self.remaining)
            .finish()
    }
}

/// A value received from the drive.
#[derive(Debug)]
pub enum Payload {
    /// Read in full during the receive.
    Buffered(Bytes),
    /// Still on the socket.
    Deferred(DeferredValue),
}

impl Payload {
    pub fn len(&self) -> u32 {
        match self {
            Payload::Buffered(b) => b.len() as u32,
            Payload::Deferred(d) => d.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the bytes if the value has already been read.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Payload::Buffered(b) => Some(b),
            Payload::Deferred(_) => None,
        }
    }

    /// Resolves the value into memory, reading it off the socket if deferred.
    pub async fn into_bytes(self) -> Result<Bytes, ClientError> {
        match self {
            Payload::Buffered(b) => Ok(b),
            Payload::Deferred(d) => d.read_to_bytes().await,
        }
    }
}
