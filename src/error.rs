//! Error types for the gRPC transport.
//!
//! Maps between `tonic::Status` (transport-level) and the small protocol
//! error taxonomy this transport surfaces to callers. This taxonomy is
//! deliberately narrow — five entries — because the broader MCP error
//! catalog (auth, rate limiting, prompts, sampling, ...) is out of scope
//! for this core; see [`McpErrorCode`].

use thiserror::Error;
use tonic::Status;

/// Result type for gRPC transport operations.
pub type GrpcResult<T> = Result<T, GrpcError>;

/// The protocol-level error taxonomy this transport understands.
///
/// Every variant is associated with a JSON-RPC-style numeric code via
/// [`McpErrorCode::code`], used when surfacing the error to a caller that
/// expects the classic MCP error shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum McpErrorCode {
    /// Any non-categorized transport or conversion failure.
    #[error("internal error")]
    InternalError,
    /// Wire-to-protocol (or protocol-to-wire) decoding failure.
    #[error("parse error")]
    ParseError,
    /// `ReadResource` targeted a URI the server does not have.
    #[error("resource not found")]
    ResourceNotFound,
    /// The call exceeded its deadline.
    #[error("request timeout")]
    RequestTimeout,
    /// The call was cancelled by the client or aborted by the server.
    #[error("request cancelled")]
    RequestCancelled,
}

impl McpErrorCode {
    /// The JSON-RPC-style numeric code for this error kind.
    ///
    /// `RequestTimeout` and `RequestCancelled` have no numeric JSON-RPC
    /// code in the source protocol (they are reported as named transport
    /// outcomes, not JSON-RPC error objects); this returns `None` for
    /// those two and `Some(code)` for the two that do.
    #[must_use]
    pub fn code(self) -> Option<i32> {
        match self {
            Self::InternalError => Some(-32603),
            Self::ParseError => Some(-32700),
            Self::ResourceNotFound => Some(-32002),
            Self::RequestTimeout | Self::RequestCancelled => None,
        }
    }
}

/// Error type for gRPC transport operations.
#[derive(Debug, Error)]
pub enum GrpcError {
    /// gRPC transport (connection-level) error.
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// A `tonic::Status` returned by the peer, not otherwise classified.
    #[error("gRPC status error: {0}")]
    Status(#[from] Status),

    /// A classified protocol-level error with a message.
    #[error("{code}: {message}")]
    Protocol {
        /// The protocol error kind.
        code: McpErrorCode,
        /// Human-readable detail.
        message: String,
    },

    /// Wire/schema decode or tool-output-validation failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Malformed request (e.g. `CallTool`'s initial message missing its
    /// inner request body).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Failed to establish or maintain the channel.
    #[error("connection error: {0}")]
    Connection(String),

    /// Configuration error (e.g. an unparsable endpoint URI).
    #[error("configuration error: {0}")]
    Config(String),

    /// A transport-session operation this core does not implement (see
    /// the server session's `NotImplemented` surface).
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl GrpcError {
    /// Build a [`GrpcError::Protocol`] with [`McpErrorCode::InternalError`].
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::InternalError,
            message: msg.into(),
        }
    }

    /// Build a [`GrpcError::Protocol`] with [`McpErrorCode::ParseError`].
    #[must_use]
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::ParseError,
            message: msg.into(),
        }
    }

    /// Build a [`GrpcError::Protocol`] with [`McpErrorCode::ResourceNotFound`].
    #[must_use]
    pub fn resource_not_found(msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::ResourceNotFound,
            message: msg.into(),
        }
    }

    /// Build a [`GrpcError::Protocol`] with [`McpErrorCode::RequestTimeout`].
    #[must_use]
    pub fn request_timeout(msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::RequestTimeout,
            message: msg.into(),
        }
    }

    /// Build a [`GrpcError::Protocol`] with [`McpErrorCode::RequestCancelled`].
    #[must_use]
    pub fn request_cancelled(msg: impl Into<String>) -> Self {
        Self::Protocol {
            code: McpErrorCode::RequestCancelled,
            message: msg.into(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create an invalid-request error.
    #[must_use]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a connection error.
    #[must_use]
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an unsupported-operation error.
    #[must_use]
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<GrpcError> for Status {
    fn from(err: GrpcError) -> Self {
        match err {
            GrpcError::Transport(e) => Status::unavailable(e.to_string()),
            GrpcError::Status(s) => s,
            GrpcError::Protocol { code, message } => protocol_to_status(code, &message),
            GrpcError::Serialization(msg) | GrpcError::InvalidRequest(msg) => {
                Status::invalid_argument(msg)
            }
            GrpcError::Connection(msg) => Status::unavailable(msg),
            GrpcError::Config(msg) => Status::failed_precondition(msg),
            GrpcError::Unsupported(msg) => Status::unimplemented(msg),
        }
    }
}

impl From<serde_json::Error> for GrpcError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Map a classified protocol error to the `tonic::Status` code a peer
/// would expect to see on the wire.
fn protocol_to_status(code: McpErrorCode, message: &str) -> Status {
    match code {
        McpErrorCode::InternalError => Status::internal(message),
        McpErrorCode::ParseError => Status::invalid_argument(message),
        McpErrorCode::ResourceNotFound => Status::not_found(message),
        McpErrorCode::RequestTimeout => Status::deadline_exceeded(message),
        McpErrorCode::RequestCancelled => Status::cancelled(message),
    }
}

/// Map an inbound `tonic::Status` (observed by the client) to this
/// transport's protocol error taxonomy, per §4.G / §4.F error mappings.
#[must_use]
pub fn status_to_protocol_error(status: &Status) -> GrpcError {
    use tonic::Code;

    match status.code() {
        Code::NotFound => GrpcError::resource_not_found(status.message()),
        Code::DeadlineExceeded => GrpcError::request_timeout(format!(
            "Timed out while waiting for response. {}",
            status.message()
        )),
        Code::Cancelled => GrpcError::request_cancelled(status.message()),
        _ => GrpcError::internal(status.message()),
    }
}
