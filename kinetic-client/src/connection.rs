//! Connection management.

use crate::deferred::{DeferredValue, Payload, ReaderState};
use crate::error::ClientError;
use crate::operation::require_success;
use crate::stream::DriveStream;
use crate::tls::create_connector;
use kinetic_protocol::message::{Command, Message, MessageType};
use kinetic_protocol::security::{DEFAULT_IDENTITY, DEFAULT_KEY};
use kinetic_protocol::{auth, codec, StatusOutcome, Value, DEFAULT_CHUNK_SIZE, DEFAULT_PORT};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::Mutex;

/// Minimum chunk size for value writes (1 KiB).
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Maximum chunk size for value writes (1 MiB).
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// TLS configuration for drive connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Enable TLS for the connection.
    pub enabled: bool,
    /// Path to PEM-encoded CA certificate(s) for drive verification.
    /// If None, the webpki roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip drive certificate verification.
    pub insecure: bool,
    /// Server name for SNI (defaults to the configured host).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }
}

/// Connection configuration.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Drive host name or address.
    pub host: String,
    pub port: u16,
    /// Principal the commands are issued as.
    pub identity: i64,
    /// Cluster version the drive expects in every header.
    pub cluster_version: i64,
    /// HMAC key shared with the drive for `identity`.
    pub secret: Vec<u8>,
    /// Upper bound on a single value write.
    pub chunk_size: usize,
    pub connect_timeout: Duration,
    /// Bound on each send and each receive.
    pub socket_timeout: Duration,
    /// Local address to bind before connecting.
    pub local_addr: Option<SocketAddr>,
    /// Leave inbound values on the socket as [`DeferredValue`]s.
    pub defer_read: bool,
    pub tls: Option<TlsClientConfig>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            identity: DEFAULT_IDENTITY,
            cluster_version: 0,
            secret: DEFAULT_KEY.as_bytes().to_vec(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: Duration::from_secs(10),
            socket_timeout: Duration::from_secs(30),
            local_addr: None,
            defer_read: false,
            tls: None,
        }
    }

    pub fn with_identity(mut self, identity: i64) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.secret = secret.into();
        self
    }

    pub fn with_cluster_version(mut self, version: i64) -> Self {
        self.cluster_version = version;
        self
    }

    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    pub fn with_defer_read(mut self, defer: bool) -> Self {
        self.defer_read = defer;
        self
    }

    pub fn with_tls(mut self, tls_config: TlsClientConfig) -> Self {
        self.tls = Some(tls_config);
        self
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("identity", &self.identity)
            .field("cluster_version", &self.cluster_version)
            .field("secret", &"<redacted>")
            .field("chunk_size", &self.chunk_size)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("local_addr", &self.local_addr)
            .field("defer_read", &self.defer_read)
            .field("tls", &self.tls)
            .finish()
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    Closing,
}

#[derive(Debug, Default)]
struct Session {
    state: ConnectionState,
    next_sequence: i64,
    connection_id: i64,
}

/// A decoded response and the value that came with it.
#[derive(Debug)]
pub struct Response {
    pub message: Message,
    pub value: Option<Payload>,
}

impl Response {
    pub fn status_outcome(&self) -> StatusOutcome {
        self.message.status_outcome()
    }
}

/// A connection to a Kinetic drive.
///
/// One request is in flight at a time. Requests issued concurrently from
/// several tasks are serialized.
pub struct Connection {
    config: ConnectionConfig,
    session: parking_lot::Mutex<Session>,
    /// Write half of the transport.
    writer: Mutex<Option<WriteHalf<DriveStream>>>,
    /// Read half of the transport, gated for deferred values.
    reader: parking_lot::Mutex<Option<Arc<Mutex<ReaderState>>>>,
    /// Held across a send and its receive.
    exchange: Mutex<()>,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            session: parking_lot::Mutex::new(Session::default()),
            writer: Mutex::new(None),
            reader: parking_lot::Mutex::new(None),
            exchange: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.session.lock().state
    }

    /// Returns whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Connection id stamped on outbound headers.
    ///
    /// Client-chosen until the handshake response arrives; the drive's value
    /// afterwards.
    pub fn connection_id(&self) -> i64 {
        self.session.lock().connection_id
    }

    /// Sequence number the next outbound command will carry.
    pub fn next_sequence(&self) -> i64 {
        self.session.lock().next_sequence
    }

    /// Connects to the drive and performs the no-op handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        {
            let mut session = self.session.lock();
            if session.state != ConnectionState::Disconnected {
                return Err(ClientError::AlreadyConnected);
            }
            session.state = ConnectionState::Connecting;
        }

        tracing::debug!(host = %self.config.host, port = self.config.port, "connecting to drive");
        if let Err(e) = self.establish().await {
            tracing::debug!(error = %e, "connect failed");
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    async fn establish(&self) -> Result<(), ClientError> {
        let stream = self.open_transport().await?;
        tracing::debug!(
            peer = ?stream.tcp().peer_addr().ok(),
            tls = stream.is_tls(),
            "transport open"
        );

        let (read_half, write_half) = tokio::io::split(stream);
        *self.writer.lock().await = Some(write_half);
        *self.reader.lock() = Some(Arc::new(Mutex::new(ReaderState::new(read_half))));

        {
            let mut session = self.session.lock();
            session.next_sequence = 0;
            session.connection_id = chrono::Utc::now().timestamp_millis();
            session.state = ConnectionState::Handshaking;
        }

        tracing::debug!("starting handshake");
        let response = self
            .request(Message::from_command(Command::new(MessageType::Noop)), None)
            .await?;
        require_success(&response.message)?;

        self.session.lock().state = ConnectionState::Ready;
        tracing::debug!(connection_id = self.connection_id(), "handshake complete");
        Ok(())
    }

    async fn open_transport(&self) -> Result<DriveStream, ClientError> {
        let host = self.config.host.as_str();
        let addr = tokio::net::lookup_host((host, self.config.port))
            .await
            .map_err(|e| ClientError::AddressResolution(format!("{}: {}", host, e)))?
            .next()
            .ok_or_else(|| ClientError::AddressResolution(format!("{}: no addresses", host)))?;

        let connect = async {
            match self.config.local_addr {
                Some(local) => {
                    let socket = if addr.is_ipv4() {
                        TcpSocket::new_v4()?
                    } else {
                        TcpSocket::new_v6()?
                    };
                    socket.bind(local)?;
                    socket.connect(addr).await
                }
                None => TcpStream::connect(addr).await,
            }
        };

        let tcp = tokio::time::timeout(self.config.connect_timeout, connect)
            .await
            .map_err(|_| {
                tracing::debug!(%addr, "connect timed out");
                ClientError::Timeout
            })??;
        tcp.set_nodelay(true).ok();

        match self.config.tls {
            Some(ref tls) if tls.enabled => {
                if tls.insecure {
                    tracing::warn!("TLS certificate verification disabled");
                }
                let (connector, server_name) = create_connector(tls, host)?;
                let stream = tokio::time::timeout(
                    self.config.connect_timeout,
                    connector.connect(server_name, tcp),
                )
                .await
                .map_err(|_| ClientError::Timeout)?
                .map_err(|e| ClientError::TlsHandshake(e.to_string()))?;
                Ok(DriveStream::Tls { stream })
            }
            _ => Ok(DriveStream::Plain { stream: tcp }),
        }
    }

    /// Stamps cluster version, identity, connection id and the next sequence
    /// number onto the command header.
    ///
    /// Each call consumes a sequence number; call it exactly once per command.
    pub fn update_header(&self, command: &mut Command) {
        let mut session = self.session.lock();
        let header = command.header_mut();
        header.cluster_version = Some(self.config.cluster_version);
        header.identity = Some(self.config.identity);
        header.connection_id = Some(session.connection_id);
        header.sequence = Some(session.next_sequence);
        session.next_sequence += 1;
    }

    /// Signs and writes one message.
    pub async fn send(&self, message: &mut Message, value: Option<Value>) -> Result<(), ClientError> {
        let command = message
            .command
            .as_ref()
            .ok_or_else(|| ClientError::InvalidArgument("message carries no command".to_string()))?;
        let hmac = auth::calculate_hmac(&self.config.secret, command)?;
        message.hmac = Some(hmac);

        let result = {
            let mut writer = self.writer.lock().await;
            let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;
            if let Some(header) = message.header() {
                tracing::debug!(
                    message_type = ?header.message_type(),
                    sequence = header.sequence(),
                    "sending command"
                );
            }
            let write = codec::write_message(writer, message, value, self.config.chunk_size);
            match tokio::time::timeout(self.config.socket_timeout, write).await {
                Ok(written) => written.map_err(ClientError::from),
                Err(_) => Err(ClientError::Timeout),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fault(e).await),
        }
    }

    /// Reads one response.
    ///
    /// Waits first for any deferred value from an earlier receive to be read
    /// or dropped.
    pub async fn receive(&self) -> Result<Response, ClientError> {
        let gate = self.reader.lock().clone().ok_or(ClientError::NotConnected)?;
        let mut reader = gate.lock_owned().await;

        let timeout = self.config.socket_timeout;
        let (message, value_len) = match tokio::time::timeout(timeout, reader.next_message()).await
        {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(e)) => {
                drop(reader);
                return Err(self.fault(e).await);
            }
            Err(_) => {
                drop(reader);
                return Err(self.fault(ClientError::Timeout).await);
            }
        };

        if let Some(header) = message.header() {
            tracing::debug!(
                message_type = ?header.message_type(),
                ack_sequence = header.ack_sequence(),
                value_len,
                "received response"
            );
            if let Some(id) = header.connection_id.filter(|id| *id != 0) {
                self.session.lock().connection_id = id;
            }
        }

        let value = if value_len == 0 {
            None
        } else if self.config.defer_read {
            Some(Payload::Deferred(DeferredValue::new(reader, value_len, timeout)))
        } else {
            match tokio::time::timeout(timeout, reader.read_value(value_len)).await {
                Ok(Ok(bytes)) => Some(Payload::Buffered(bytes)),
                Ok(Err(e)) => {
                    drop(reader);
                    return Err(self.fault(e).await);
                }
                Err(_) => {
                    drop(reader);
                    return Err(self.fault(ClientError::Timeout).await);
                }
            }
        };

        Ok(Response { message, value })
    }

    /// Stamps the header, sends the message and reads the response.
    pub async fn request(
        &self,
        mut message: Message,
        value: Option<Value>,
    ) -> Result<Response, ClientError> {
        let _exchange = self.exchange.lock().await;
        self.update_header(message.command_mut());
        self.send(&mut message, value).await?;
        self.receive().await
    }

    /// Closes the connection if the error left the transport unusable.
    async fn fault(&self, error: ClientError) -> ClientError {
        if error.is_connection_fault() {
            tracing::debug!(error = %error, "closing connection after fault");
            self.close().await;
        }
        error
    }

    /// Closes the connection. Safe to call at any time, any number of times.
    pub async fn close(&self) {
        self.session.lock().state = ConnectionState::Closing;
        self.reader.lock().take();

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            match tokio::time::timeout(self.config.socket_timeout, writer.shutdown()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "error shutting down connection"),
                Err(_) => tracing::warn!("timed out shutting down connection"),
            }
            tracing::debug!("connection closed");
        }

        *self.session.lock() = Session::default();
    }
}
