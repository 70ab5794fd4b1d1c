//! # kinetic-protocol
//!
//! Wire protocol implementation for Kinetic key-value drives.
//!
//! This crate provides:
//! - Envelope framing (magic byte + big-endian length prefixes)
//! - Async envelope codec with chunked and self-streamed value writes
//! - Protobuf command schema and protocol enumerations
//! - HMAC-SHA1 command authentication
//! - Security configuration value objects (roles, domains, ACLs)

pub mod auth;
pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod security;
pub mod value;

pub use auth::{calculate_hmac, verify_hmac};
pub use error::ProtocolError;
pub use frame::{Envelope, EnvelopeHeader, ENVELOPE_PREFIX_SIZE, MAGIC};
pub use message::{Command, Message, MessageType, StatusCode, StatusOutcome};
pub use security::{Acl, Domain, IntegrityAlgorithm, Role};
pub use value::{ReaderSource, Value, ValueSource};

/// Default port for plain TCP connections to a drive.
pub const DEFAULT_PORT: u16 = 8123;

/// Conventional port for TLS connections to a drive.
pub const DEFAULT_TLS_PORT: u16 = 8443;

/// Maximum key size accepted by the drive (4 KiB).
pub const MAX_KEY_SIZE: usize = 4 * 1024;

/// Maximum value size accepted by the drive (1 MiB).
pub const MAX_VALUE_SIZE: usize = 1024 * 1024;

/// Maximum serialized command size accepted by the codec (16 MiB).
pub const MAX_COMMAND_SIZE: u32 = 16 * 1024 * 1024;

/// Default chunk size for value writes (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
