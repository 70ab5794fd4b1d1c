//! Protobuf command schema for the Kinetic wire protocol.
//!
//! The outer [`Message`] carries the serialized [`Command`] and the HMAC
//! computed over it. Field tags and enumeration values are part of the wire
//! contract with the drive and must not change.

use std::fmt;

// ============================================================================
// Envelope messages
// ============================================================================

/// Top-level message: a command plus its integrity hash.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Message {
    #[prost(message, optional, tag = "1")]
    pub command: Option<Command>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub hmac: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Command {
    #[prost(message, optional, tag = "1")]
    pub header: Option<Header>,
    #[prost(message, optional, tag = "2")]
    pub body: Option<Body>,
    #[prost(message, optional, tag = "3")]
    pub status: Option<Status>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Header {
    #[prost(int64, optional, tag = "1")]
    pub cluster_version: Option<i64>,
    #[prost(int64, optional, tag = "2")]
    pub identity: Option<i64>,
    #[prost(int64, optional, tag = "3")]
    pub connection_id: Option<i64>,
    #[prost(int64, optional, tag = "4")]
    pub sequence: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub ack_sequence: Option<i64>,
    #[prost(enumeration = "MessageType", optional, tag = "7")]
    pub message_type: Option<i32>,
    #[prost(int64, optional, tag = "9")]
    pub timeout: Option<i64>,
    #[prost(bool, optional, tag = "10")]
    pub early_exit: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Body {
    #[prost(message, optional, tag = "3")]
    pub key_value: Option<KeyValue>,
    #[prost(message, optional, tag = "4")]
    pub range: Option<Range>,
    #[prost(message, optional, tag = "6")]
    pub p2p_operation: Option<P2pOperation>,
    #[prost(message, optional, tag = "8")]
    pub security: Option<Security>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(enumeration = "StatusCode", optional, tag = "1")]
    pub code: Option<i32>,
    #[prost(string, optional, tag = "2")]
    pub status_message: Option<String>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub detailed_message: Option<Vec<u8>>,
}

// ============================================================================
// Body messages
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub new_version: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "3")]
    pub key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub db_version: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub tag: Option<Vec<u8>>,
    #[prost(enumeration = "Algorithm", optional, tag = "6")]
    pub algorithm: Option<i32>,
    #[prost(bool, optional, tag = "7")]
    pub metadata_only: Option<bool>,
    #[prost(bool, optional, tag = "8")]
    pub force: Option<bool>,
    #[prost(enumeration = "Synchronization", optional, tag = "9")]
    pub synchronization: Option<i32>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Range {
    #[prost(bytes = "vec", optional, tag = "1")]
    pub start_key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub end_key: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "3")]
    pub start_key_inclusive: Option<bool>,
    #[prost(bool, optional, tag = "4")]
    pub end_key_inclusive: Option<bool>,
    #[prost(uint32, optional, tag = "5")]
    pub max_returned: Option<u32>,
    #[prost(bool, optional, tag = "6")]
    pub reverse: Option<bool>,
    #[prost(bytes = "vec", repeated, tag = "8")]
    pub key: Vec<Vec<u8>>,
}

/// Peer-to-peer push: the drive copies keys to another drive.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P2pOperation {
    #[prost(message, optional, tag = "1")]
    pub peer: Option<P2pPeer>,
    #[prost(message, repeated, tag = "2")]
    pub operation: Vec<P2pChildOperation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P2pChildOperation {
    #[prost(bytes = "vec", optional, tag = "3")]
    pub key: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "4")]
    pub version: Option<Vec<u8>>,
    #[prost(bytes = "vec", optional, tag = "5")]
    pub new_key: Option<Vec<u8>>,
    #[prost(bool, optional, tag = "6")]
    pub force: Option<bool>,
    #[prost(message, optional, tag = "7")]
    pub status: Option<Status>,
    /// Nested push executed by the receiving peer (piped push).
    #[prost(message, optional, tag = "8")]
    pub p2pop: Option<P2pOperation>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct P2pPeer {
    #[prost(string, optional, tag = "1")]
    pub hostname: Option<String>,
    #[prost(int32, optional, tag = "2")]
    pub port: Option<i32>,
    #[prost(bool, optional, tag = "3")]
    pub tls: Option<bool>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Security {
    #[prost(message, repeated, tag = "2")]
    pub acl: Vec<SecurityAcl>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecurityAcl {
    #[prost(int64, optional, tag = "1")]
    pub identity: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub key: Option<Vec<u8>>,
    #[prost(enumeration = "Algorithm", optional, tag = "3")]
    pub hmac_algorithm: Option<i32>,
    #[prost(message, repeated, tag = "4")]
    pub scope: Vec<SecurityScope>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SecurityScope {
    #[prost(int64, optional, tag = "1")]
    pub offset: Option<i64>,
    #[prost(bytes = "vec", optional, tag = "2")]
    pub value: Option<Vec<u8>>,
    #[prost(enumeration = "Permission", repeated, packed = "false", tag = "3")]
    pub permission: Vec<i32>,
    #[prost(bool, optional, tag = "4")]
    pub tls_required: Option<bool>,
}

// ============================================================================
// Enumerations
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    InvalidMessageType = -1,
    GetResponse = 1,
    Get = 2,
    PutResponse = 3,
    Put = 4,
    DeleteResponse = 5,
    Delete = 6,
    GetNextResponse = 7,
    GetNext = 8,
    GetPreviousResponse = 9,
    GetPrevious = 10,
    GetKeyRangeResponse = 11,
    GetKeyRange = 12,
    GetVersionResponse = 15,
    GetVersion = 16,
    SetupResponse = 21,
    Setup = 22,
    GetLogResponse = 23,
    GetLog = 24,
    SecurityResponse = 25,
    Security = 26,
    Peer2PeerPushResponse = 27,
    Peer2PeerPush = 28,
    NoopResponse = 29,
    Noop = 30,
    FlushAllDataResponse = 31,
    FlushAllData = 32,
}

impl MessageType {
    /// Returns the response type paired with a request type.
    ///
    /// Request codes are even and their responses are the preceding odd code.
    pub fn response_type(self) -> Option<MessageType> {
        let code = self as i32;
        if code > 0 && code % 2 == 0 {
            MessageType::try_from(code - 1).ok()
        } else {
            None
        }
    }
}

/// Status codes returned by the drive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum StatusCode {
    InvalidStatusCode = -1,
    NotAttempted = 0,
    Success = 1,
    HmacFailure = 2,
    NotAuthorized = 3,
    VersionFailure = 4,
    InternalError = 5,
    HeaderRequired = 6,
    NotFound = 7,
    VersionMismatch = 8,
    ServiceBusy = 9,
    Expired = 10,
    DataError = 11,
    PermDataError = 12,
    RemoteConnectionError = 13,
    NoSpace = 14,
    NoSuchHmacAlgorithm = 15,
    InvalidRequest = 16,
    NestedOperationErrors = 17,
}

impl StatusCode {
    /// Returns the protocol name of the status code.
    pub fn name(&self) -> &'static str {
        match self {
            StatusCode::InvalidStatusCode => "INVALID_STATUS_CODE",
            StatusCode::NotAttempted => "NOT_ATTEMPTED",
            StatusCode::Success => "SUCCESS",
            StatusCode::HmacFailure => "HMAC_FAILURE",
            StatusCode::NotAuthorized => "NOT_AUTHORIZED",
            StatusCode::VersionFailure => "VERSION_FAILURE",
            StatusCode::InternalError => "INTERNAL_ERROR",
            StatusCode::HeaderRequired => "HEADER_REQUIRED",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::VersionMismatch => "VERSION_MISMATCH",
            StatusCode::ServiceBusy => "SERVICE_BUSY",
            StatusCode::Expired => "EXPIRED",
            StatusCode::DataError => "DATA_ERROR",
            StatusCode::PermDataError => "PERM_DATA_ERROR",
            StatusCode::RemoteConnectionError => "REMOTE_CONNECTION_ERROR",
            StatusCode::NoSpace => "NO_SPACE",
            StatusCode::NoSuchHmacAlgorithm => "NO_SUCH_HMAC_ALGORITHM",
            StatusCode::InvalidRequest => "INVALID_REQUEST",
            StatusCode::NestedOperationErrors => "NESTED_OPERATION_ERRORS",
        }
    }

    /// Returns whether a request failing with this status may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StatusCode::ServiceBusy | StatusCode::Expired)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Algorithm {
    InvalidAlgorithm = -1,
    Sha1 = 1,
    Sha2 = 2,
    Sha3 = 3,
    Crc32 = 4,
    Crc64 = 5,
}

/// Durability mode for writes and deletes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Synchronization {
    InvalidSynchronization = -1,
    WriteThrough = 1,
    WriteBack = 2,
    Flush = 3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Permission {
    InvalidPermission = -1,
    Read = 0,
    Write = 1,
    Delete = 2,
    Range = 3,
    Setup = 4,
    P2pop = 5,
    Getlog = 7,
    Security = 8,
}

// ============================================================================
// Status mapping
// ============================================================================

/// Classification of a response status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusOutcome {
    Success,
    NotFound,
    Failed { code: StatusCode, message: String },
}

impl Status {
    pub fn new(code: StatusCode) -> Self {
        Self {
            code: Some(code as i32),
            status_message: None,
            detailed_message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    /// Maps the status onto success, not-found or failure.
    pub fn outcome(&self) -> StatusOutcome {
        match self.code() {
            StatusCode::Success => StatusOutcome::Success,
            StatusCode::NotFound => StatusOutcome::NotFound,
            code => StatusOutcome::Failed {
                code,
                message: self.status_message.clone().unwrap_or_default(),
            },
        }
    }
}

// ============================================================================
// Construction helpers
// ============================================================================

impl Message {
    pub fn from_command(command: Command) -> Self {
        Self {
            command: Some(command),
            hmac: None,
        }
    }

    /// Returns the command, inserting an empty one if absent.
    pub fn command_mut(&mut self) -> &mut Command {
        self.command.get_or_insert_with(Command::default)
    }

    /// Returns the header of the command, if any.
    pub fn header(&self) -> Option<&Header> {
        self.command.as_ref().and_then(|c| c.header.as_ref())
    }

    /// Returns the key/value body of the command, if any.
    pub fn key_value(&self) -> Option<&KeyValue> {
        self.command
            .as_ref()
            .and_then(|c| c.body.as_ref())
            .and_then(|b| b.key_value.as_ref())
    }

    /// Returns the range body of the command, if any.
    pub fn range(&self) -> Option<&Range> {
        self.command
            .as_ref()
            .and_then(|c| c.body.as_ref())
            .and_then(|b| b.range.as_ref())
    }

    pub fn p2p_operation(&self) -> Option<&P2pOperation> {
        self.command
            .as_ref()
            .and_then(|c| c.body.as_ref())
            .and_then(|b| b.p2p_operation.as_ref())
    }

    /// Classifies the response status. A missing status counts as a failure.
    pub fn status_outcome(&self) -> StatusOutcome {
        match self.command.as_ref().and_then(|c| c.status.as_ref()) {
            Some(status) => status.outcome(),
            None => StatusOutcome::Failed {
                code: StatusCode::InvalidStatusCode,
                message: "response carries no status".to_string(),
            },
        }
    }
}

impl Command {
    /// Creates a command of the given type with an otherwise empty header.
    pub fn new(message_type: MessageType) -> Self {
        let mut header = Header::default();
        header.set_message_type(message_type);
        Self {
            header: Some(header),
            body: None,
            status: None,
        }
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the header, inserting an empty one if absent.
    pub fn header_mut(&mut self) -> &mut Header {
        self.header.get_or_insert_with(Header::default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message as _;

    #[test]
    fn test_command_roundtrip() {
        let command = Command::new(MessageType::Get).with_body(Body {
            key_value: Some(KeyValue {
                key: Some(b"key".to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let message = Message::from_command(command);

        let bytes = message.encode_to_vec();
        let parsed = Message::decode(bytes.as_slice()).unwrap();

        assert_eq!(parsed, message);
        assert_eq!(parsed.key_value().unwrap().key(), b"key");
        assert_eq!(parsed.header().unwrap().message_type(), MessageType::Get);
    }

    #[test]
    fn test_response_type_pairing() {
        assert_eq!(MessageType::Get.response_type(), Some(MessageType::GetResponse));
        assert_eq!(MessageType::Noop.response_type(), Some(MessageType::NoopResponse));
        assert_eq!(
            MessageType::GetKeyRange.response_type(),
            Some(MessageType::GetKeyRangeResponse)
        );
        assert_eq!(MessageType::GetResponse.response_type(), None);
        assert_eq!(MessageType::InvalidMessageType.response_type(), None);
    }

    #[test]
    fn test_status_outcome() {
        assert_eq!(Status::new(StatusCode::Success).outcome(), StatusOutcome::Success);
        assert_eq!(Status::new(StatusCode::NotFound).outcome(), StatusOutcome::NotFound);
        assert_eq!(
            Status::new(StatusCode::VersionMismatch)
                .with_message("stale")
                .outcome(),
            StatusOutcome::Failed {
                code: StatusCode::VersionMismatch,
                message: "stale".to_string(),
            }
        );
    }

    #[test]
    fn test_missing_status_is_failure() {
        let message = Message::from_command(Command::new(MessageType::GetResponse));
        assert!(matches!(
            message.status_outcome(),
            StatusOutcome::Failed {
                code: StatusCode::InvalidStatusCode,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_status_code_maps_to_invalid() {
        let status = Status {
            code: Some(999),
            ..Default::default()
        };
        assert_eq!(status.code(), StatusCode::InvalidStatusCode);
    }

    #[test]
    fn test_status_code_display() {
        assert_eq!(StatusCode::NotFound.to_string(), "NOT_FOUND");
        assert_eq!(StatusCode::HmacFailure.to_string(), "HMAC_FAILURE");
        assert_eq!(
            StatusCode::NoSuchHmacAlgorithm.to_string(),
            "NO_SUCH_HMAC_ALGORITHM"
        );
    }

    #[test]
    fn test_status_code_retryable() {
        assert!(StatusCode::ServiceBusy.is_retryable());
        assert!(!StatusCode::NotFound.is_retryable());
        assert!(!StatusCode::HmacFailure.is_retryable());
    }
}
