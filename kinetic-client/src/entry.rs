//! Entries, key ranges and peer-to-peer operation descriptions.

use crate::client::Client;
use crate::connection::Response;
use crate::deferred::Payload;
use crate::error::ClientError;
use crate::operation::found;
use crate::MAX_KEY_RANGE_COUNT;
use bytes::Bytes;
use kinetic_protocol::message::{Algorithm, Range};
use kinetic_protocol::StatusOutcome;

/// A key with its value and metadata.
#[derive(Debug)]
pub struct Entry {
    pub key: Vec<u8>,
    pub value: Option<Payload>,
    pub metadata: EntryMetadata,
}

/// Version and integrity tag stored alongside a value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryMetadata {
    /// Version the drive currently holds for the key.
    pub version: Option<Vec<u8>>,
    pub tag: Option<Vec<u8>>,
    pub algorithm: Option<Algorithm>,
}

impl Entry {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            value: Some(Payload::Buffered(value.into())),
            metadata: EntryMetadata::default(),
        }
    }

    /// Builds an entry from a key/value response.
    ///
    /// `NOT_FOUND` yields `None`; any other failing status is an error.
    pub fn from_response(response: Response) -> Result<Option<Self>, ClientError> {
        if !found(&response.message)? {
            return Ok(None);
        }
        let kv = response.message.key_value().cloned().unwrap_or_default();
        let algorithm = kv.algorithm.and_then(|a| Algorithm::try_from(a).ok());

        Ok(Some(Self {
            key: kv.key.unwrap_or_default(),
            value: response.value,
            metadata: EntryMetadata {
                version: kv.db_version,
                tag: kv.tag,
                algorithm,
            },
        }))
    }

    /// Returns the value if it has already been read into memory.
    pub fn value(&self) -> Option<&Bytes> {
        self.value.as_ref().and_then(Payload::as_bytes)
    }

    /// Resolves the value into memory, reading a deferred value off the socket.
    pub async fn into_value(self) -> Result<Option<Bytes>, ClientError> {
        match self.value {
            Some(payload) => payload.into_bytes().await.map(Some),
            None => Ok(None),
        }
    }
}

/// Number of keys [`KeyRange::fetch`] asks for by default.
pub const DEFAULT_FETCH_COUNT: u32 = MAX_KEY_RANGE_COUNT;

/// A range of keys between two bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    pub start_key: Vec<u8>,
    pub end_key: Vec<u8>,
    pub start_inclusive: bool,
    pub end_inclusive: bool,
}

impl KeyRange {
    /// Creates a range with both bounds inclusive.
    pub fn new(start_key: impl Into<Vec<u8>>, end_key: impl Into<Vec<u8>>) -> Self {
        Self {
            start_key: start_key.into(),
            end_key: end_key.into(),
            start_inclusive: true,
            end_inclusive: true,
        }
    }

    pub fn with_start_inclusive(mut self, inclusive: bool) -> Self {
        self.start_inclusive = inclusive;
        self
    }

    pub fn with_end_inclusive(mut self, inclusive: bool) -> Self {
        self.end_inclusive = inclusive;
        self
    }

    pub(crate) fn to_wire(&self, max_returned: u32, reverse: bool) -> Range {
        Range {
            start_key: Some(self.start_key.clone()),
            end_key: Some(self.end_key.clone()),
            start_key_inclusive: Some(self.start_inclusive),
            end_key_inclusive: Some(self.end_inclusive),
            max_returned: Some(max_returned),
            reverse: Some(reverse),
            key: Vec::new(),
        }
    }

    /// Lists up to `max` keys in the range, in ascending order.
    pub async fn fetch(&self, client: &Client, max: u32) -> Result<Vec<Vec<u8>>, ClientError> {
        client
            .get_key_range(self.clone(), max.clamp(1, MAX_KEY_RANGE_COUNT), false)
            .await
    }
}

/// A drive that receives keys in a peer-to-peer push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub hostname: String,
    pub port: u16,
    pub tls: bool,
}

impl Peer {
    pub fn new(hostname: impl Into<String>, port: u16) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }
}

/// One key to copy to a peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct P2pOp {
    pub key: Vec<u8>,
    /// Version the source entry must have.
    pub version: Option<Vec<u8>>,
    /// Key to store the entry under on the peer; defaults to `key`.
    pub new_key: Option<Vec<u8>>,
    /// Overwrite on the peer regardless of its version.
    pub force: bool,
}

impl P2pOp {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_new_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.new_key = Some(key.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

/// Outcome of one key in a peer-to-peer push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P2pResult {
    pub key: Vec<u8>,
    pub outcome: StatusOutcome,
}

impl P2pResult {
    pub fn is_success(&self) -> bool {
        self.outcome == StatusOutcome::Success
    }
}
