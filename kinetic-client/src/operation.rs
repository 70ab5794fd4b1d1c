//! Typed operations.
//!
//! Every operation follows the same template: [`Operation::build`] turns
//! typed arguments into a request (validating them before any I/O),
//! [`Client::process`](crate::Client::process) carries it over a
//! connection, and [`Operation::parse`] maps the response status onto the
//! result. `NOT_FOUND` becomes an absent result wherever the operation has
//! one; any other failing status surfaces as [`ClientError::Status`].

use crate::connection::Response;
use crate::entry::{Entry, KeyRange, P2pOp, P2pResult, Peer};
use crate::error::ClientError;
use crate::MAX_KEY_RANGE_COUNT;
use kinetic_protocol::message::{
    Algorithm, Body, Command, KeyValue, MessageType, P2pChildOperation, P2pOperation, P2pPeer,
    Synchronization,
};
use kinetic_protocol::{Message, StatusCode, StatusOutcome, Value, MAX_KEY_SIZE, MAX_VALUE_SIZE};

/// An outbound message and its optional value.
#[derive(Debug)]
pub struct Request {
    pub message: Message,
    pub value: Option<Value>,
}

impl Request {
    pub fn new(command: Command) -> Self {
        Self {
            message: Message::from_command(command),
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// A request/response exchange with the drive.
pub trait Operation {
    type Args;
    type Output;

    /// Builds the request. Invalid arguments fail here, before any I/O.
    fn build(args: Self::Args) -> Result<Request, ClientError>;

    /// Maps the response onto the result.
    fn parse(response: Response) -> Result<Self::Output, ClientError>;

    /// Handles a failure from dispatch or parsing.
    fn on_error(error: ClientError) -> Result<Self::Output, ClientError> {
        Err(error)
    }
}

pub fn validate_key(key: &[u8]) -> Result<(), ClientError> {
    if key.len() > MAX_KEY_SIZE {
        return Err(ClientError::InvalidArgument(format!(
            "key is {} bytes (max {})",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    Ok(())
}

pub fn validate_value(value: &Value) -> Result<(), ClientError> {
    if value.len() > MAX_VALUE_SIZE {
        return Err(ClientError::InvalidArgument(format!(
            "value is {} bytes (max {})",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

/// Requires a `SUCCESS` status.
pub(crate) fn require_success(message: &Message) -> Result<(), ClientError> {
    match message.status_outcome() {
        StatusOutcome::Success => Ok(()),
        StatusOutcome::NotFound => Err(ClientError::status(StatusCode::NotFound, "not found")),
        StatusOutcome::Failed { code, message } => Err(ClientError::Status { code, message }),
    }
}

/// Returns `true` for `SUCCESS` and `false` for `NOT_FOUND`.
pub(crate) fn found(message: &Message) -> Result<bool, ClientError> {
    match message.status_outcome() {
        StatusOutcome::Success => Ok(true),
        StatusOutcome::NotFound => Ok(false),
        StatusOutcome::Failed { code, message } => Err(ClientError::Status { code, message }),
    }
}

fn key_value_command(message_type: MessageType, key_value: KeyValue) -> Command {
    Command::new(message_type).with_body(Body {
        key_value: Some(key_value),
        ..Default::default()
    })
}

fn key_request(message_type: MessageType, key: Vec<u8>) -> Result<Request, ClientError> {
    validate_key(&key)?;
    Ok(Request::new(key_value_command(
        message_type,
        KeyValue {
            key: Some(key),
            ..Default::default()
        },
    )))
}

// ============================================================================
// Key/value operations
// ============================================================================

/// No-op round trip; also used as the connection handshake.
pub struct Noop;

impl Operation for Noop {
    type Args = ();
    type Output = ();

    fn build(_: ()) -> Result<Request, ClientError> {
        Ok(Request::new(Command::new(MessageType::Noop)))
    }

    fn parse(response: Response) -> Result<(), ClientError> {
        require_success(&response.message)
    }
}

/// Arguments for [`Put`].
#[derive(Debug)]
pub struct PutArgs {
    pub key: Vec<u8>,
    pub value: Value,
    /// Version to store with the value.
    pub new_version: Option<Vec<u8>>,
    /// Version the drive must currently hold for the write to apply.
    pub db_version: Option<Vec<u8>>,
    /// Write regardless of the stored version.
    pub force: bool,
    pub synchronization: Option<Synchronization>,
    pub tag: Option<Vec<u8>>,
    pub algorithm: Algorithm,
}

impl PutArgs {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            new_version: None,
            db_version: None,
            force: false,
            synchronization: None,
            tag: None,
            algorithm: Algorithm::Sha1,
        }
    }

    pub fn with_new_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.new_version = Some(version.into());
        self
    }

    pub fn with_db_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.db_version = Some(version.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_synchronization(mut self, mode: Synchronization) -> Self {
        self.synchronization = Some(mode);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Vec<u8>>, algorithm: Algorithm) -> Self {
        self.tag = Some(tag.into());
        self.algorithm = algorithm;
        self
    }
}

/// Stores a value under a key.
pub struct Put;

impl Operation for Put {
    type Args = PutArgs;
    type Output = ();

    fn build(args: PutArgs) -> Result<Request, ClientError> {
        validate_key(&args.key)?;
        validate_value(&args.value)?;

        let algorithm = args.tag.as_ref().map(|_| args.algorithm as i32);
        let key_value = KeyValue {
            key: Some(args.key),
            new_version: args.new_version,
            db_version: args.db_version,
            force: Some(args.force),
            synchronization: args.synchronization.map(|s| s as i32),
            tag: args.tag,
            algorithm,
            ..Default::default()
        };
        Ok(Request::new(key_value_command(MessageType::Put, key_value)).with_value(args.value))
    }

    fn parse(response: Response) -> Result<(), ClientError> {
        require_success(&response.message)
    }
}

/// Reads a key's value and metadata.
pub struct Get;

impl Operation for Get {
    type Args = Vec<u8>;
    type Output = Option<Entry>;

    fn build(key: Vec<u8>) -> Result<Request, ClientError> {
        key_request(MessageType::Get, key)
    }

    fn parse(response: Response) -> Result<Option<Entry>, ClientError> {
        Entry::from_response(response)
    }
}

/// Reads a key's metadata without its value.
pub struct GetMetadata;

impl Operation for GetMetadata {
    type Args = Vec<u8>;
    type Output = Option<Entry>;

    fn build(key: Vec<u8>) -> Result<Request, ClientError> {
        validate_key(&key)?;
        Ok(Request::new(key_value_command(
            MessageType::Get,
            KeyValue {
                key: Some(key),
                metadata_only: Some(true),
                ..Default::default()
            },
        )))
    }

    fn parse(response: Response) -> Result<Option<Entry>, ClientError> {
        Entry::from_response(response)
    }
}

/// Reads the version stored for a key.
pub struct GetVersion;

impl Operation for GetVersion {
    type Args = Vec<u8>;
    type Output = Option<Vec<u8>>;

    fn build(key: Vec<u8>) -> Result<Request, ClientError> {
        key_request(MessageType::GetVersion, key)
    }

    fn parse(response: Response) -> Result<Option<Vec<u8>>, ClientError> {
        if !found(&response.message)? {
            return Ok(None);
        }
        Ok(Some(
            response
                .message
                .key_value()
                .and_then(|kv| kv.db_version.clone())
                .unwrap_or_default(),
        ))
    }
}

/// Arguments for [`Delete`].
#[derive(Debug, Clone, Default)]
pub struct DeleteArgs {
    pub key: Vec<u8>,
    /// Version the drive must currently hold for the delete to apply.
    pub db_version: Option<Vec<u8>>,
    pub force: bool,
    pub synchronization: Option<Synchronization>,
}

impl DeleteArgs {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    pub fn with_db_version(mut self, version: impl Into<Vec<u8>>) -> Self {
        self.db_version = Some(version.into());
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_synchronization(mut self, mode: Synchronization) -> Self {
        self.synchronization = Some(mode);
        self
    }
}

/// Deletes a key. Yields `false` if the key did not exist.
pub struct Delete;

impl Operation for Delete {
    type Args = DeleteArgs;
    type Output = bool;

    fn build(args: DeleteArgs) -> Result<Request, ClientError> {
        validate_key(&args.key)?;
        Ok(Request::new(key_value_command(
            MessageType::Delete,
            KeyValue {
                key: Some(args.key),
                db_version: args.db_version,
                force: Some(args.force),
                synchronization: args.synchronization.map(|s| s as i32),
                ..Default::default()
            },
        )))
    }

    fn parse(response: Response) -> Result<bool, ClientError> {
        found(&response.message)
    }
}

/// Reads the entry following a key.
pub struct GetNext;

impl Operation for GetNext {
    type Args = Vec<u8>;
    type Output = Option<Entry>;

    fn build(key: Vec<u8>) -> Result<Request, ClientError> {
        key_request(MessageType::GetNext, key)
    }

    fn parse(response: Response) -> Result<Option<Entry>, ClientError> {
        Entry::from_response(response)
    }
}

/// Reads the entry preceding a key.
pub struct GetPrevious;

impl Operation for GetPrevious {
    type Args = Vec<u8>;
    type Output = Option<Entry>;

    fn build(key: Vec<u8>) -> Result<Request, ClientError> {
        key_request(MessageType::GetPrevious, key)
    }

    fn parse(response: Response) -> Result<Option<Entry>, ClientError> {
        Entry::from_response(response)
    }
}

/// Arguments for [`GetKeyRange`].
#[derive(Debug, Clone)]
pub struct KeyRangeArgs {
    pub range: KeyRange,
    pub max_returned: u32,
    pub reverse: bool,
}

/// Lists the keys in a range.
pub struct GetKeyRange;

impl Operation for GetKeyRange {
    type Args = KeyRangeArgs;
    type Output = Vec<Vec<u8>>;

    fn build(args: KeyRangeArgs) -> Result<Request, ClientError> {
        validate_key(&args.range.start_key)?;
        validate_key(&args.range.end_key)?;
        if args.max_returned == 0 || args.max_returned > MAX_KEY_RANGE_COUNT {
            return Err(ClientError::InvalidArgument(format!(
                "max returned must be between 1 and {}, got {}",
                MAX_KEY_RANGE_COUNT, args.max_returned
            )));
        }
        Ok(Request::new(Command::new(MessageType::GetKeyRange).with_body(
            Body {
                range: Some(args.range.to_wire(args.max_returned, args.reverse)),
                ..Default::default()
            },
        )))
    }

    fn parse(response: Response) -> Result<Vec<Vec<u8>>, ClientError> {
        if !found(&response.message)? {
            return Ok(Vec::new());
        }
        let mut message = response.message;
        Ok(message
            .command
            .as_mut()
            .and_then(|c| c.body.as_mut())
            .and_then(|b| b.range.as_mut())
            .map(|r| std::mem::take(&mut r.key))
            .unwrap_or_default())
    }
}

// ============================================================================
// Peer-to-peer operations
// ============================================================================

/// Arguments for [`PeerPush`].
#[derive(Debug, Clone)]
pub struct PushArgs {
    pub peer: Peer,
    pub ops: Vec<P2pOp>,
}

/// Arguments for [`PipedPush`]. Keys travel down the chain of peers in order.
#[derive(Debug, Clone)]
pub struct PipedPushArgs {
    pub peers: Vec<Peer>,
    pub ops: Vec<P2pOp>,
}

fn validate_ops(ops: &[P2pOp]) -> Result<(), ClientError> {
    if ops.is_empty() {
        return Err(ClientError::InvalidArgument(
            "peer-to-peer push needs at least one key".to_string(),
        ));
    }
    for op in ops {
        validate_key(&op.key)?;
        if let Some(ref new_key) = op.new_key {
            validate_key(new_key)?;
        }
    }
    Ok(())
}

fn p2p_operation(peers: &[Peer], ops: &[P2pOp]) -> Option<P2pOperation> {
    let (peer, rest) = peers.split_first()?;
    let nested = p2p_operation(rest, ops);
    Some(P2pOperation {
        peer: Some(P2pPeer {
            hostname: Some(peer.hostname.clone()),
            port: Some(i32::from(peer.port)),
            tls: Some(peer.tls),
        }),
        operation: ops
            .iter()
            .map(|op| P2pChildOperation {
                key: Some(op.key.clone()),
                version: op.version.clone(),
                new_key: op.new_key.clone(),
                force: Some(op.force),
                status: None,
                p2pop: nested.clone(),
            })
            .collect(),
    })
}

fn push_request(peers: &[Peer], ops: &[P2pOp]) -> Result<Request, ClientError> {
    validate_ops(ops)?;
    let operation = p2p_operation(peers, ops).ok_or_else(|| {
        ClientError::InvalidArgument("peer-to-peer push needs at least one peer".to_string())
    })?;
    Ok(Request::new(Command::new(MessageType::Peer2PeerPush).with_body(
        Body {
            p2p_operation: Some(operation),
            ..Default::default()
        },
    )))
}

fn push_results(response: Response) -> Result<Vec<P2pResult>, ClientError> {
    match response.status_outcome() {
        StatusOutcome::Success => {}
        StatusOutcome::Failed {
            code: StatusCode::NestedOperationErrors,
            ..
        } => {}
        StatusOutcome::NotFound => {
            return Err(ClientError::status(StatusCode::NotFound, "not found"))
        }
        StatusOutcome::Failed { code, message } => {
            return Err(ClientError::Status { code, message })
        }
    }

    Ok(response
        .message
        .p2p_operation()
        .map(|p2p| {
            p2p.operation
                .iter()
                .map(|op| P2pResult {
                    key: op.key.clone().unwrap_or_default(),
                    outcome: match op.status {
                        Some(ref status) => status.outcome(),
                        None => StatusOutcome::Failed {
                            code: StatusCode::NotAttempted,
                            message: String::new(),
                        },
                    },
                })
                .collect()
        })
        .unwrap_or_default())
}

/// Asks the drive to copy keys to a peer drive.
pub struct PeerPush;

impl Operation for PeerPush {
    type Args = PushArgs;
    type Output = Vec<P2pResult>;

    fn build(args: PushArgs) -> Result<Request, ClientError> {
        push_request(std::slice::from_ref(&args.peer), &args.ops)
    }

    fn parse(response: Response) -> Result<Vec<P2pResult>, ClientError> {
        push_results(response)
    }
}

/// Asks the drive to copy keys down a chain of peers.
pub struct PipedPush;

impl Operation for PipedPush {
    type Args = PipedPushArgs;
    type Output = Vec<P2pResult>;

    fn build(args: PipedPushArgs) -> Result<Request, ClientError> {
        push_request(&args.peers, &args.ops)
    }

    fn parse(response: Response) -> Result<Vec<P2pResult>, ClientError> {
        push_results(response)
    }
}
