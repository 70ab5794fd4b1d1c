//! Async envelope reader and writer.
//!
//! The codec operates directly on a byte stream. Reads accumulate partial
//! reads until the requested length is satisfied; writes push the value in
//! bounded chunks. A zero-byte read or write means the peer went away.

use crate::error::ProtocolError;
use crate::frame::{EnvelopeHeader, ENVELOPE_PREFIX_SIZE};
use crate::message::Message;
use crate::value::Value;
use crate::MAX_COMMAND_SIZE;
use bytes::{Bytes, BytesMut};
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the scratch buffer used when discarding unread bytes.
const DISCARD_BUFFER_SIZE: usize = 8 * 1024;

/// Reads exactly `buf.len()` bytes, failing on a zero-byte read.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::Disconnected("connection closed by peer"));
        }
        filled += n;
    }
    Ok(())
}

/// Reads exactly `len` bytes into a new buffer.
pub async fn read_bytes<R>(reader: &mut R, len: usize) -> Result<Bytes, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::zeroed(len);
    read_full(reader, &mut buf).await?;
    Ok(buf.freeze())
}

/// Reads and discards exactly `len` bytes.
pub async fn discard<R>(reader: &mut R, mut len: u64) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut scratch = [0u8; DISCARD_BUFFER_SIZE];
    while len > 0 {
        let step = len.min(DISCARD_BUFFER_SIZE as u64) as usize;
        read_full(reader, &mut scratch[..step]).await?;
        len -= step as u64;
    }
    Ok(())
}

/// Reads the 9-byte envelope prefix and validates the magic byte.
pub async fn read_prefix<R>(reader: &mut R) -> Result<EnvelopeHeader, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; ENVELOPE_PREFIX_SIZE];
    read_full(reader, &mut prefix).await?;
    EnvelopeHeader::decode(&prefix)
}

/// Reads one envelope's prefix and command, leaving the value on the stream.
///
/// Returns the decoded message and the length of the value still waiting
/// to be read. The caller must consume exactly that many bytes before the
/// next envelope can be read.
pub async fn read_message<R>(reader: &mut R) -> Result<(Message, u32), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = read_prefix(reader).await?;
    let command = read_bytes(reader, header.command_len as usize).await?;
    match Message::decode(command) {
        Ok(message) => Ok((message, header.value_len)),
        Err(e) => Err(ProtocolError::Decode(e)),
    }
}

/// Reads one envelope and its value in full.
pub async fn read_envelope<R>(
    reader: &mut R,
) -> Result<(Message, Option<Bytes>), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let (message, value_len) = read_message(reader).await?;
    let value = if value_len > 0 {
        Some(read_bytes(reader, value_len as usize).await?)
    } else {
        None
    };
    Ok((message, value))
}

/// Writes `data` in chunks of at most `chunk_size` bytes.
async fn write_chunked<W>(
    writer: &mut W,
    data: &[u8],
    chunk_size: usize,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let chunk_size = chunk_size.max(1);
    let mut sent = 0;
    while sent < data.len() {
        let end = (sent + chunk_size).min(data.len());
        let n = writer.write(&data[sent..end]).await?;
        if n == 0 {
            return Err(ProtocolError::Disconnected("peer stopped accepting writes"));
        }
        sent += n;
    }
    Ok(())
}

/// Writes a full envelope: prefix, serialized command and optional value.
///
/// The prefix and command go out in one write. In-memory values are then
/// written in chunks of `chunk_size`; streaming values write themselves.
pub async fn write_envelope<W>(
    writer: &mut W,
    command: &[u8],
    value: Option<Value>,
    chunk_size: usize,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + Send,
{
    let command_len = u32::try_from(command.len()).unwrap_or(u32::MAX);
    if command_len > MAX_COMMAND_SIZE {
        return Err(ProtocolError::CommandTooLarge {
            size: command_len,
            max: MAX_COMMAND_SIZE,
        });
    }

    let value_len = match &value {
        Some(v) => u32::try_from(v.len()).map_err(|_| ProtocolError::ValueTooLarge {
            size: v.len(),
            max: u32::MAX as usize,
        })?,
        None => 0,
    };

    let header = EnvelopeHeader::new(command_len, value_len);
    let mut head = BytesMut::with_capacity(ENVELOPE_PREFIX_SIZE + command.len());
    head.extend_from_slice(&header.encode());
    head.extend_from_slice(command);
    write_chunked(writer, &head, head.len()).await?;

    match value {
        Some(Value::Bytes(bytes)) => write_chunked(writer, &bytes, chunk_size).await?,
        Some(Value::Stream(source)) => {
            let written = source.send_to(writer).await?;
            if written != u64::from(value_len) {
                return Err(ProtocolError::ValueLengthMismatch {
                    declared: value_len,
                    actual: written,
                });
            }
        }
        None => {}
    }

    writer.flush().await?;
    Ok(())
}

/// Serializes a message and writes it as an envelope.
pub async fn write_message<W>(
    writer: &mut W,
    message: &Message,
    value: Option<Value>,
    chunk_size: usize,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + Send,
{
    let command = message.encode_to_vec();
    write_envelope(writer, &command, value, chunk_size).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Envelope, MAGIC};
    use crate::message::{Command, MessageType};
    use crate::value::ReaderSource;
    use proptest::prelude::*;
    use prost::Message as _;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    /// A writer that accepts at most `limit` bytes per call and records writes.
    struct ShortWriter {
        limit: usize,
        data: Vec<u8>,
        calls: usize,
    }

    impl AsyncWrite for ShortWriter {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            self.calls += 1;
            Poll::Ready(Ok(n))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn encoded_command(message_type: MessageType) -> Bytes {
        Bytes::from(Message::from_command(Command::new(message_type)).encode_to_vec())
    }

    async fn roundtrip(value: Option<Vec<u8>>, chunk_size: usize) -> (Message, Option<Bytes>) {
        let message = Message::from_command(Command::new(MessageType::Put));
        let (mut client, mut server) = tokio::io::duplex(1024);

        let writer = tokio::spawn(async move {
            write_message(&mut client, &message, value.map(Value::from), chunk_size)
                .await
                .unwrap();
            client
        });

        let decoded = read_envelope(&mut server).await.unwrap();
        drop(writer.await.unwrap());
        decoded
    }

    #[tokio::test]
    async fn test_roundtrip_without_value() {
        let (message, value) = roundtrip(None, 16).await;
        assert_eq!(message.header().unwrap().message_type(), MessageType::Put);
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn test_roundtrip_single_byte_value() {
        let (_, value) = roundtrip(Some(vec![0x7f]), 16).await;
        assert_eq!(value.unwrap().as_ref(), &[0x7f]);
    }

    #[tokio::test]
    async fn test_roundtrip_value_spanning_many_chunks() {
        let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
        let (_, value) = roundtrip(Some(payload.clone()), 4096).await;
        assert_eq!(value.unwrap().as_ref(), payload.as_slice());
    }

    #[tokio::test]
    async fn test_chunked_write_loops_over_short_writes() {
        let mut writer = ShortWriter {
            limit: 3,
            data: Vec::new(),
            calls: 0,
        };
        let value = Value::from(vec![9u8; 10]);
        write_envelope(&mut writer, b"cmd", Some(value), 4).await.unwrap();

        let mut buf = BytesMut::from(writer.data.as_slice());
        let envelope = Envelope::decode(&mut buf).unwrap().unwrap();
        assert_eq!(envelope.command.as_ref(), b"cmd");
        assert_eq!(envelope.value.unwrap().as_ref(), &[9u8; 10]);
        assert!(writer.calls > 4);
    }

    #[tokio::test]
    async fn test_zero_byte_write_is_disconnect() {
        let mut writer = ShortWriter {
            limit: 0,
            data: Vec::new(),
            calls: 0,
        };
        let result = write_envelope(&mut writer, b"cmd", None, 4).await;
        assert!(matches!(result, Err(ProtocolError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_streaming_value_writes_itself() {
        let mut out: Vec<u8> = Vec::new();
        let value = Value::stream(ReaderSource::new(&b"streamed"[..], 8));
        write_envelope(&mut out, b"c", Some(value), 2).await.unwrap();

        let mut buf = BytesMut::from(out.as_slice());
        let envelope = Envelope::decode(&mut buf).unwrap().unwrap();
        assert_eq!(envelope.value.unwrap().as_ref(), b"streamed");
    }

    #[tokio::test]
    async fn test_short_streaming_value_is_rejected() {
        let mut out: Vec<u8> = Vec::new();
        let value = Value::stream(ReaderSource::new(&b"abc"[..], 8));
        let result = write_envelope(&mut out, b"c", Some(value), 2).await;
        assert!(matches!(
            result,
            Err(ProtocolError::ValueLengthMismatch {
                declared: 8,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_bad_magic_is_rejected_before_reading_command() {
        let good = Envelope::new(encoded_command(MessageType::Noop))
            .encode()
            .unwrap();
        let mut stream: Vec<u8> = vec![0x00, 0, 0, 0, 0, 0, 0, 0, 0];
        stream.extend_from_slice(&good);

        let mut reader: &[u8] = &stream;
        let result = read_message(&mut reader).await;
        assert!(matches!(result, Err(ProtocolError::InvalidMagic(0x00))));
        // Only the corrupt prefix was consumed; the following bytes are untouched.
        assert_eq!(reader.len(), good.len());
        assert_eq!(reader[0], MAGIC);
    }

    #[tokio::test]
    async fn test_eof_mid_prefix_is_disconnect() {
        let mut reader: &[u8] = b"F\x00\x00";
        let result = read_prefix(&mut reader).await;
        assert!(matches!(result, Err(ProtocolError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_oversized_declared_value_is_rejected_before_allocating() {
        let mut stream = vec![MAGIC, 0, 0, 0, 2, 0xFF, 0xFF, 0xFF, 0xFF];
        stream.extend_from_slice(&[0x0A, 0x00]);

        let mut reader: &[u8] = &stream;
        let result = read_envelope(&mut reader).await;
        assert!(matches!(
            result,
            Err(ProtocolError::DeclaredValueTooLarge { size: u32::MAX, .. })
        ));
        assert!(result.unwrap_err().is_stream_fault());
        // The command bytes were never read.
        assert_eq!(reader.len(), 2);
    }

    #[tokio::test]
    async fn test_read_message_leaves_value_on_stream() {
        let envelope = Envelope::new(encoded_command(MessageType::GetResponse))
            .with_value(Bytes::from_static(b"payload"));
        let encoded = envelope.encode().unwrap();

        let mut reader: &[u8] = &encoded;
        let (_, value_len) = read_message(&mut reader).await.unwrap();
        assert_eq!(value_len, 7);
        assert_eq!(reader, b"payload");

        discard(&mut reader, 7).await.unwrap();
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn test_partial_reads_accumulate() {
        let encoded = Envelope::new(encoded_command(MessageType::NoopResponse))
            .encode()
            .unwrap();
        let mut mock = tokio_test::io::Builder::new();
        for byte in encoded.iter() {
            mock.read(std::slice::from_ref(byte));
        }
        let mut reader = mock.build();

        let (message, value) = read_envelope(&mut reader).await.unwrap();
        assert_eq!(
            message.header().unwrap().message_type(),
            MessageType::NoopResponse
        );
        assert!(value.is_none());
    }

    proptest! {
        #[test]
        fn prop_non_magic_prefix_never_decodes(
            first in any::<u8>().prop_filter("not magic", |b| *b != MAGIC),
            rest in any::<[u8; 8]>(),
        ) {
            let mut prefix = [0u8; ENVELOPE_PREFIX_SIZE];
            prefix[0] = first;
            prefix[1..].copy_from_slice(&rest);
            let result = EnvelopeHeader::decode(&prefix);
            prop_assert!(matches!(result, Err(ProtocolError::InvalidMagic(b)) if b == first));
        }
    }
}
