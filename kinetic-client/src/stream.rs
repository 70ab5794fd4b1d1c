//! Transport to the drive: plain TCP or TLS.

use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

pin_project! {
    /// A drive transport that can be either plain TCP or TLS.
    #[project = DriveStreamProj]
    pub enum DriveStream {
        Plain { #[pin] stream: TcpStream },
        Tls { #[pin] stream: TlsStream<TcpStream> },
    }
}

impl DriveStream {
    pub fn is_tls(&self) -> bool {
        matches!(self, DriveStream::Tls { .. })
    }

    /// Returns the underlying TCP socket.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            DriveStream::Plain { stream } => stream,
            DriveStream::Tls { stream } => stream.get_ref().0,
        }
    }
}

impl AsyncRead for DriveStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.project() {
            DriveStreamProj::Plain { stream } => stream.poll_read(cx, buf),
            DriveStreamProj::Tls { stream } => stream.poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for DriveStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.project() {
            DriveStreamProj::Plain { stream } => stream.poll_write(cx, buf),
            DriveStreamProj::Tls { stream } => stream.poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            DriveStreamProj::Plain { stream } => stream.poll_flush(cx),
            DriveStreamProj::Tls { stream } => stream.poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.project() {
            DriveStreamProj::Plain { stream } => stream.poll_shutdown(cx),
            DriveStreamProj::Tls { stream } => stream.poll_shutdown(cx),
        }
    }
}
