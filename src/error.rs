//! Error types for node-connector.
//!
//! [`ConnectorError`] covers every local failure. Failures that cross the
//! wire inside a `response` frame are carried as [`RemoteError`], whose
//! [`ErrorCode`] serializes to the plain string (or null) that JavaScript
//! peers put in `error.code`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Main error type for all node-connector operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// The transport delivered a text message where a binary frame was expected.
    #[error("Expected a binary frame from the socket")]
    NotABinaryFrame,

    /// The frame bytes do not follow the length-prefixed layout.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame metadata must be a JSON object.
    #[error("Metadata should be an object, but was {0}")]
    InvalidMetadataType(&'static str),

    /// Encoded metadata exceeds the 32-bit length prefix budget.
    #[error("Metadata too large. Should be below 4,294MB, but was {0} bytes")]
    MetadataTooLarge(usize),

    /// Too many frames queued before any socket was attached.
    #[error("Too many messages queued before a connection was established (capacity {capacity})")]
    QueueOverflow {
        /// Configured send queue capacity.
        capacity: usize,
    },

    /// A connector with this name is already registered in this context.
    #[error("A node connector of the name is already registered: {0}")]
    DuplicateConnector(String),

    /// No connector with this name exists on the receiving side.
    #[error("No node connector found with name: {0}")]
    NoSuchConnector(String),

    /// The connector exists but exposes no function of that name.
    #[error("execHandlerFnName: {function} no such function in node connector: {connector}")]
    NoSuchFn {
        /// Connector that was addressed.
        connector: String,
        /// Function that was requested.
        function: String,
    },

    /// A handler broke its contract (panicked instead of resolving).
    #[error("Handler contract violation: {0}")]
    HandlerContractViolation(String),

    /// Arguments passed to exec/trigger (or to a typed handler) were invalid.
    #[error("Invalid argument: {0}")]
    InvalidPayloadArgument(String),

    /// A response arrived for a call ID that is not pending.
    #[error("Unable to find response handler for command ID {0}")]
    OrphanResponse(u64),

    /// The peer answered the call with an error.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// The call was not answered within the configured timeout.
    #[error("Call {0} timed out waiting for a response")]
    CallTimeout(u64),

    /// The socket writer or the owning context has shut down.
    #[error("Connection closed")]
    ConnectionClosed,

    /// I/O error on the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ConnectorError {
    /// Wire code used when this error is reported to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectorError::NoSuchConnector(_) => ErrorCode::NoSuchConnector,
            ConnectorError::NoSuchFn { .. } => ErrorCode::NoSuchFn,
            ConnectorError::HandlerContractViolation(_) => ErrorCode::HandlerContractViolation,
            ConnectorError::InvalidPayloadArgument(_) => ErrorCode::InvalidPayloadArgument,
            ConnectorError::Remote(remote) => remote.code.clone(),
            _ => ErrorCode::Unspecified,
        }
    }

    /// Code of the peer's error, if this is a remote rejection.
    pub fn remote_code(&self) -> Option<&ErrorCode> {
        match self {
            ConnectorError::Remote(remote) => Some(&remote.code),
            _ => None,
        }
    }
}

/// Result type alias using ConnectorError.
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Error code carried in `error.code` of a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Value>", into = "Option<String>")]
pub enum ErrorCode {
    /// The addressed connector does not exist on the peer.
    NoSuchConnector,
    /// The addressed function does not exist on the connector.
    NoSuchFn,
    /// The handler panicked.
    HandlerContractViolation,
    /// The call arguments were rejected.
    InvalidPayloadArgument,
    /// Application-defined code set by a handler.
    Application(String),
    /// No code (`null` / absent on the wire).
    Unspecified,
}

impl ErrorCode {
    /// String form used on the wire, `None` for [`ErrorCode::Unspecified`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ErrorCode::NoSuchConnector => Some("NoSuchConnector"),
            ErrorCode::NoSuchFn => Some("NoSuchFn"),
            ErrorCode::HandlerContractViolation => Some("HandlerContractViolation"),
            ErrorCode::InvalidPayloadArgument => Some("InvalidPayloadArgument"),
            ErrorCode::Application(code) => Some(code),
            ErrorCode::Unspecified => None,
        }
    }
}

impl From<Option<String>> for ErrorCode {
    fn from(code: Option<String>) -> Self {
        let Some(code) = code else {
            return ErrorCode::Unspecified;
        };
        match code.as_str() {
            "NoSuchConnector" => ErrorCode::NoSuchConnector,
            "NoSuchFn" => ErrorCode::NoSuchFn,
            "HandlerContractViolation" => ErrorCode::HandlerContractViolation,
            "InvalidPayloadArgument" => ErrorCode::InvalidPayloadArgument,
            _ => ErrorCode::Application(code),
        }
    }
}

impl From<Option<Value>> for ErrorCode {
    fn from(code: Option<Value>) -> Self {
        match code {
            None | Some(Value::Null) => ErrorCode::Unspecified,
            Some(Value::String(code)) => ErrorCode::from(Some(code)),
            // numeric codes (HTTP statuses, errno) are kept as their JSON text
            Some(other) => ErrorCode::Application(other.to_string()),
        }
    }
}

impl From<ErrorCode> for Option<String> {
    fn from(code: ErrorCode) -> Self {
        code.as_str().map(str::to_owned)
    }
}

/// Error object sent inside a `response` frame: `{message, code, stack}`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct RemoteError {
    /// Human-readable message.
    pub message: String,
    /// Machine-readable code.
    #[serde(default = "unspecified")]
    pub code: ErrorCode,
    /// Stack or backtrace text from the failing side, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

fn unspecified() -> ErrorCode {
    ErrorCode::Unspecified
}

impl RemoteError {
    /// Create an error with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: ErrorCode::Unspecified,
            stack: None,
        }
    }

    /// Set the error code.
    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    /// Attach stack text.
    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Build an error from whatever a peer put in `error`.
    ///
    /// Never fails: fields of an unexpected type are kept as JSON text, and
    /// a bare string or number becomes the message.
    pub fn from_value(value: &Value) -> Self {
        let Value::Object(fields) = value else {
            return match value {
                Value::String(message) => Self::new(message.clone()),
                other => Self::new(other.to_string()),
            };
        };
        let message = match fields.get("message") {
            Some(Value::String(message)) => message.clone(),
            None | Some(Value::Null) => "Unknown error".to_string(),
            Some(other) => other.to_string(),
        };
        Self {
            message,
            code: ErrorCode::from(fields.get("code").cloned()),
            stack: fields.get("stack").and_then(Value::as_str).map(str::to_owned),
        }
    }
}

impl From<ConnectorError> for RemoteError {
    fn from(err: ConnectorError) -> Self {
        match err {
            ConnectorError::Remote(remote) => remote,
            other => RemoteError::new(other.to_string()).with_code(other.code()),
        }
    }
}
