//! In-process mock drive for integration tests.
//!
//! Speaks the envelope protocol over a loopback TCP listener, verifies the
//! HMAC on every command, records the sequence numbers seen on each
//! connection and serves key/value requests from an ordered in-memory map.

#![allow(dead_code)]

use bytes::Bytes;
use kinetic_client::ConnectionConfig;
use kinetic_protocol::codec;
use kinetic_protocol::message::{
    Body, Command, Header, KeyValue, MessageType, P2pOperation, Range, Status,
};
use kinetic_protocol::{verify_hmac, Message, StatusCode, Value, DEFAULT_CHUNK_SIZE};
use parking_lot::Mutex;
use prost::Message as _;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

pub const SECRET: &[u8] = b"mock-drive-secret";
pub const IDENTITY: i64 = 1;

/// Connection ids handed out by the drive start here.
pub const FIRST_CONNECTION_ID: i64 = 4242;

#[derive(Debug, Clone)]
struct Stored {
    value: Bytes,
    version: Vec<u8>,
    tag: Option<Vec<u8>>,
    algorithm: Option<i32>,
}

#[derive(Default)]
struct DriveState {
    store: Mutex<BTreeMap<Vec<u8>, Stored>>,
    sequences: Mutex<Vec<Vec<i64>>>,
    failures: Mutex<HashMap<Vec<u8>, (StatusCode, String)>>,
    range_queries: AtomicUsize,
    corrupt_next: AtomicBool,
    silent: AtomicBool,
    zero_connection_id: AtomicBool,
    peers: Mutex<Vec<SocketAddr>>,
}

pub struct MockDrive {
    addr: SocketAddr,
    state: Arc<DriveState>,
}

impl MockDrive {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(DriveState::default());

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, peer)) = listener.accept().await {
                accept_state.peers.lock().push(peer);
                tokio::spawn(serve(accept_state.clone(), stream));
            }
        });

        Self { addr, state }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.addr.port())
            .with_identity(IDENTITY)
            .with_secret(SECRET)
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) {
        self.state.store.lock().insert(
            key.to_vec(),
            Stored {
                value: Bytes::copy_from_slice(value),
                version: b"1".to_vec(),
                tag: None,
                algorithm: None,
            },
        );
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        self.state.store.lock().contains_key(key)
    }

    /// Answers every key/value request on `key` with the given status.
    pub fn fail_key(&self, key: &[u8], code: StatusCode, message: &str) {
        self.state
            .failures
            .lock()
            .insert(key.to_vec(), (code, message.to_string()));
    }

    /// Prefixes the next response with a corrupt envelope prefix.
    pub fn corrupt_next_response(&self) {
        self.state.corrupt_next.store(true, Ordering::SeqCst);
    }

    /// Stops answering commands. Commands are still read and recorded.
    pub fn go_silent(&self) {
        self.state.silent.store(true, Ordering::SeqCst);
    }

    /// Answers with a zero connection id from now on.
    pub fn send_zero_connection_id(&self) {
        self.state.zero_connection_id.store(true, Ordering::SeqCst);
    }

    /// Remote addresses of accepted connections, in accept order.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.state.peers.lock().clone()
    }

    /// Sequence numbers received, one list per accepted connection.
    pub fn sequences(&self) -> Vec<Vec<i64>> {
        self.state.sequences.lock().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.state.sequences.lock().len()
    }

    pub fn range_queries(&self) -> usize {
        self.state.range_queries.load(Ordering::SeqCst)
    }
}

async fn serve(state: Arc<DriveState>, stream: TcpStream) {
    let index = {
        let mut sequences = state.sequences.lock();
        sequences.push(Vec::new());
        sequences.len() - 1
    };
    let connection_id = FIRST_CONNECTION_ID + index as i64;
    let (mut reader, mut writer) = stream.into_split();

    loop {
        let Ok((message, value)) = codec::read_envelope(&mut reader).await else {
            return;
        };
        let command = message.command.clone().unwrap_or_default();
        let header = command.header.clone().unwrap_or_default();
        state.sequences.lock()[index].push(header.sequence());
        if state.silent.load(Ordering::SeqCst) {
            continue;
        }

        let signed = message
            .hmac
            .as_deref()
            .is_some_and(|hmac| verify_hmac(SECRET, &command.encode_to_vec(), hmac));
        let (mut reply, reply_value) = if signed {
            state.handle(&header, &command, value)
        } else {
            (Command::default().with_status(Status::new(StatusCode::HmacFailure)), None)
        };

        let reply_header = reply.header_mut();
        reply_header.connection_id = if state.zero_connection_id.load(Ordering::SeqCst) {
            Some(0)
        } else {
            Some(connection_id)
        };
        reply_header.ack_sequence = Some(header.sequence());
        if let Some(response_type) = header.message_type().response_type() {
            reply_header.set_message_type(response_type);
        }

        if state.corrupt_next.swap(false, Ordering::SeqCst) {
            let _ = writer.write_all(&[0u8; 9]).await;
        }
        let written = codec::write_message(
            &mut writer,
            &Message::from_command(reply),
            reply_value.map(Value::from),
            DEFAULT_CHUNK_SIZE,
        )
        .await;
        if written.is_err() {
            return;
        }
    }
}

fn status_only(code: StatusCode) -> (Command, Option<Bytes>) {
    (Command::default().with_status(Status::new(code)), None)
}

fn with_body(body: Body) -> Command {
    Command::default()
        .with_status(Status::new(StatusCode::Success))
        .with_body(body)
}

impl DriveState {
    fn handle(
        &self,
        header: &Header,
        command: &Command,
        value: Option<Bytes>,
    ) -> (Command, Option<Bytes>) {
        let body = command.body.clone().unwrap_or_default();
        let kv = body.key_value.clone().unwrap_or_default();

        if let Some(key) = kv.key.as_ref() {
            if let Some((code, message)) = self.failures.lock().get(key) {
                return (
                    Command::default().with_status(Status::new(*code).with_message(message.clone())),
                    None,
                );
            }
        }

        match header.message_type() {
            MessageType::Noop => status_only(StatusCode::Success),
            MessageType::Put => self.put(&kv, value.unwrap_or_default()),
            MessageType::Get => self.get(&kv),
            MessageType::GetVersion => self.get_version(&kv),
            MessageType::Delete => self.delete(&kv),
            MessageType::GetNext => self.neighbour(&kv, true),
            MessageType::GetPrevious => self.neighbour(&kv, false),
            MessageType::GetKeyRange => self.key_range(body.range.unwrap_or_default()),
            MessageType::Peer2PeerPush => self.push(body.p2p_operation.unwrap_or_default()),
            _ => status_only(StatusCode::InvalidRequest),
        }
    }

    fn put(&self, kv: &KeyValue, value: Bytes) -> (Command, Option<Bytes>) {
        let mut store = self.store.lock();
        if !kv.force() {
            let current = store.get(kv.key()).map(|s| s.version.as_slice());
            if current.unwrap_or_default() != kv.db_version() {
                return status_only(StatusCode::VersionMismatch);
            }
        }
        store.insert(
            kv.key().to_vec(),
            Stored {
                value,
                version: kv.new_version().to_vec(),
                tag: kv.tag.clone(),
                algorithm: kv.algorithm,
            },
        );
        status_only(StatusCode::Success)
    }

    fn entry_reply(key: &[u8], stored: &Stored, with_value: bool) -> (Command, Option<Bytes>) {
        let body = Body {
            key_value: Some(KeyValue {
                key: Some(key.to_vec()),
                db_version: Some(stored.version.clone()),
                tag: stored.tag.clone(),
                algorithm: stored.algorithm,
                ..Default::default()
            }),
            ..Default::default()
        };
        let value = if with_value && !stored.value.is_empty() {
            Some(stored.value.clone())
        } else {
            None
        };
        (with_body(body), value)
    }

    fn get(&self, kv: &KeyValue) -> (Command, Option<Bytes>) {
        match self.store.lock().get(kv.key()) {
            Some(stored) => Self::entry_reply(kv.key(), stored, !kv.metadata_only()),
            None => status_only(StatusCode::NotFound),
        }
    }

    fn get_version(&self, kv: &KeyValue) -> (Command, Option<Bytes>) {
        match self.store.lock().get(kv.key()) {
            Some(stored) => Self::entry_reply(kv.key(), stored, false),
            None => status_only(StatusCode::NotFound),
        }
    }

    fn delete(&self, kv: &KeyValue) -> (Command, Option<Bytes>) {
        let mut store = self.store.lock();
        let Some(stored) = store.get(kv.key()) else {
            return status_only(StatusCode::NotFound);
        };
        if !kv.force() && stored.version.as_slice() != kv.db_version() {
            return status_only(StatusCode::VersionMismatch);
        }
        store.remove(kv.key());
        status_only(StatusCode::Success)
    }

    fn neighbour(&self, kv: &KeyValue, next: bool) -> (Command, Option<Bytes>) {
        let store = self.store.lock();
        let key = kv.key().to_vec();
        let found = if next {
            store
                .range((Bound::Excluded(key), Bound::Unbounded))
                .next()
        } else {
            store.range(..key).next_back()
        };
        match found {
            Some((key, stored)) => Self::entry_reply(key, stored, true),
            None => status_only(StatusCode::NotFound),
        }
    }

    fn key_range(&self, range: Range) -> (Command, Option<Bytes>) {
        self.range_queries.fetch_add(1, Ordering::SeqCst);

        let start = range.start_key().to_vec();
        let end = range.end_key().to_vec();
        let lower = if range.start_key_inclusive() {
            Bound::Included(start)
        } else {
            Bound::Excluded(start)
        };
        let upper = if range.end_key_inclusive() {
            Bound::Included(end)
        } else {
            Bound::Excluded(end)
        };

        let store = self.store.lock();
        let max = range.max_returned() as usize;
        let empty = range.start_key() > range.end_key()
            || (range.start_key() == range.end_key()
                && !(range.start_key_inclusive() && range.end_key_inclusive()));
        let keys: Vec<Vec<u8>> = if empty {
            Vec::new()
        } else if range.reverse() {
            store
                .range((lower, upper))
                .rev()
                .take(max)
                .map(|(k, _)| k.clone())
                .collect()
        } else {
            store
                .range((lower, upper))
                .take(max)
                .map(|(k, _)| k.clone())
                .collect()
        };

        (
            with_body(Body {
                range: Some(Range {
                    key: keys,
                    ..Default::default()
                }),
                ..Default::default()
            }),
            None,
        )
    }

    /// Reports each key as pushed if the drive holds it.
    fn push(&self, mut p2p: P2pOperation) -> (Command, Option<Bytes>) {
        let store = self.store.lock();
        let mut all_ok = true;
        for op in p2p.operation.iter_mut() {
            let code = if store.contains_key(op.key()) {
                StatusCode::Success
            } else {
                all_ok = false;
                StatusCode::NotFound
            };
            op.status = Some(Status::new(code));
            op.p2pop = None;
        }
        let status = if all_ok {
            StatusCode::Success
        } else {
            StatusCode::NestedOperationErrors
        };
        (
            Command::default().with_status(Status::new(status)).with_body(Body {
                p2p_operation: Some(p2p),
                ..Default::default()
            }),
            None,
        )
    }
}
