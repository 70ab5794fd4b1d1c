//! High-level client API.

use crate::connection::{Connection, ConnectionConfig};
use crate::entry::{Entry, KeyRange, P2pOp, P2pResult, Peer};
use crate::error::ClientError;
use crate::operation::{
    validate_key, Delete, DeleteArgs, Get, GetKeyRange, GetMetadata, GetNext, GetPrevious,
    GetVersion, KeyRangeArgs, Noop, Operation, PeerPush, PipedPush, PipedPushArgs, PushArgs, Put,
    PutArgs,
};
use crate::range::RangeIter;
use crate::MAX_KEY_RANGE_COUNT;
use kinetic_protocol::Value;
use std::sync::Arc;

/// High-level client for a Kinetic drive.
///
/// Operations run over the client's connection. When the connection is not
/// open, an operation opens it for the one call and closes it afterwards.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the drive and performs the handshake.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Runs one operation: build, round trip, parse.
    ///
    /// Failures from the round trip and from parsing go through
    /// [`Operation::on_error`]. Nothing is retried.
    pub async fn process<O: Operation>(&self, args: O::Args) -> Result<O::Output, ClientError> {
        let request = O::build(args)?;

        let opened = if self.conn.is_connected() {
            false
        } else {
            match self.conn.connect().await {
                Ok(()) => true,
                Err(ClientError::AlreadyConnected) => false,
                Err(e) => return O::on_error(e),
            }
        };

        let response = self.conn.request(request.message, request.value).await;
        if opened {
            self.conn.close().await;
        }

        match response.and_then(O::parse) {
            Ok(output) => Ok(output),
            Err(e) => O::on_error(e),
        }
    }

    // =========================================================================
    // Key/value operations
    // =========================================================================

    pub async fn noop(&self) -> Result<(), ClientError> {
        self.process::<Noop>(()).await
    }

    /// Stores `value` under `key` unconditionally.
    pub async fn put(
        &self,
        key: impl Into<Vec<u8>>,
        value: impl Into<Value>,
    ) -> Result<(), ClientError> {
        self.process::<Put>(PutArgs::new(key, value).with_force(true)).await
    }

    /// Stores a value with explicit versioning, durability and tag options.
    pub async fn put_with(&self, args: PutArgs) -> Result<(), ClientError> {
        self.process::<Put>(args).await
    }

    /// Reads a key. Returns `None` if the key does not exist.
    pub async fn get(&self, key: impl Into<Vec<u8>>) -> Result<Option<Entry>, ClientError> {
        self.process::<Get>(key.into()).await
    }

    pub async fn get_metadata(
        &self,
        key: impl Into<Vec<u8>>,
    ) -> Result<Option<Entry>, ClientError> {
        self.process::<GetMetadata>(key.into()).await
    }

    pub async fn get_version(
        &self,
        key: impl Into<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, ClientError> {
        self.process::<GetVersion>(key.into()).await
    }

    /// Deletes a key unconditionally. Returns `false` if it did not exist.
    pub async fn delete(&self, key: impl Into<Vec<u8>>) -> Result<bool, ClientError> {
        self.process::<Delete>(DeleteArgs::new(key).with_force(true)).await
    }

    pub async fn delete_with(&self, args: DeleteArgs) -> Result<bool, ClientError> {
        self.process::<Delete>(args).await
    }

    pub async fn get_next(&self, key: impl Into<Vec<u8>>) -> Result<Option<Entry>, ClientError> {
        self.process::<GetNext>(key.into()).await
    }

    pub async fn get_previous(
        &self,
        key: impl Into<Vec<u8>>,
    ) -> Result<Option<Entry>, ClientError> {
        self.process::<GetPrevious>(key.into()).await
    }

    /// Lists up to `max_returned` keys in a range.
    pub async fn get_key_range(
        &self,
        range: KeyRange,
        max_returned: u32,
        reverse: bool,
    ) -> Result<Vec<Vec<u8>>, ClientError> {
        self.process::<GetKeyRange>(KeyRangeArgs {
            range,
            max_returned,
            reverse,
        })
        .await
    }

    /// Iterates over the entries in a range, listing `prefetch` keys at a time.
    pub fn get_range(&self, range: KeyRange, prefetch: u32) -> Result<RangeIter<'_>, ClientError> {
        if prefetch == 0 || prefetch > MAX_KEY_RANGE_COUNT {
            return Err(ClientError::InvalidArgument(format!(
                "prefetch must be between 1 and {}, got {}",
                MAX_KEY_RANGE_COUNT, prefetch
            )));
        }
        validate_key(&range.start_key)?;
        validate_key(&range.end_key)?;
        Ok(RangeIter::new(self, range, prefetch))
    }

    // =========================================================================
    // Peer-to-peer operations
    // =========================================================================

    /// Asks the drive to copy keys to `peer`.
    pub async fn push(&self, peer: Peer, ops: Vec<P2pOp>) -> Result<Vec<P2pResult>, ClientError> {
        self.process::<PeerPush>(PushArgs { peer, ops }).await
    }

    /// Asks the drive to copy keys down a chain of peers.
    pub async fn piped_push(
        &self,
        peers: Vec<Peer>,
        ops: Vec<P2pOp>,
    ) -> Result<Vec<P2pResult>, ClientError> {
        self.process::<PipedPush>(PipedPushArgs { peers, ops }).await
    }
}
