//! # kinetic-client
//!
//! Async client library for Kinetic drives.
//!
//! This crate provides:
//! - Connection lifecycle with handshake, sequencing and HMAC signing
//! - Optional TLS transport
//! - Deferred values that stream straight off the socket
//! - Typed operations with status mapping (`NOT_FOUND` is an absent result)
//! - A paginating key-range iterator

pub mod client;
pub mod connection;
pub mod deferred;
pub mod entry;
pub mod error;
pub mod operation;
pub mod range;
pub mod stream;
pub mod tls;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, ConnectionState, Response, TlsClientConfig};
pub use deferred::{DeferredValue, Payload};
pub use entry::{Entry, EntryMetadata, KeyRange, P2pOp, P2pResult, Peer};
pub use error::ClientError;
pub use operation::Operation;
pub use range::RangeIter;

/// Largest number of keys a single key-range request may ask for.
pub const MAX_KEY_RANGE_COUNT: u32 = 1024;
