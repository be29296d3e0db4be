//! gRPC transport core for the Model Context Protocol (MCP).
//!
//! This crate implements the transport state machine, cache, and streaming
//! call engine that sit between an MCP tool/resource registry and a gRPC
//! channel: catalog enumeration with TTL-bounded client caching, per-call
//! protocol-version negotiation with one-shot retry, and a streaming
//! `CallTool` RPC that interleaves progress notifications with a terminal
//! result and supports client-initiated cancellation.
//!
//! Registration of tools/resources, transport selection (HTTP,
//! streamable-HTTP, stdio), TLS credential loading, and the broader MCP
//! session handshake (initialize, prompts, sampling, elicitation, roots)
//! are deliberately out of scope; this crate consumes a registry only
//! through the [`ToolHandler`] and [`ResourceHandler`] traits.
//!
//! ## Quick start
//!
//! ```ignore
//! use mcp_grpc_transport::server::McpGrpcServer;
//!
//! let server = McpGrpcServer::builder()
//!     .tool_handler(my_handler)
//!     .build()?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

/// Generated protobuf types and tonic service stubs.
pub mod proto {
    #![allow(missing_docs)]
    #![allow(clippy::all)]
    #![allow(clippy::pedantic)]
    tonic::include_proto!("turbomcp.grpc.v1");
}

pub mod cache;
pub mod codec;
pub mod error;
pub mod layer;
pub mod registry;
pub mod types;
pub mod version;

#[cfg(feature = "server")]
#[cfg_attr(docsrs, doc(cfg(feature = "server")))]
pub mod server;

#[cfg(feature = "client")]
#[cfg_attr(docsrs, doc(cfg(feature = "client")))]
pub mod client;

pub use error::{GrpcError, GrpcResult, McpErrorCode};
pub use layer::McpGrpcLayer;
pub use registry::{RequestContext, ResourceHandler, ToolHandler, TransportSession};

#[cfg(feature = "server")]
pub use server::{McpGrpcServer, McpGrpcServerBuilder};

#[cfg(feature = "client")]
pub use client::{McpGrpcClient, McpGrpcClientConfig};

/// Protocol versions this crate understands, oldest first. The last entry is
/// "latest" and is what a freshly constructed client/server negotiates from.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] =
    &["2024-11-05", "2025-03-26", "2025-06-18", "2025-11-25"];

/// The newest protocol version this crate supports.
#[must_use]
pub fn latest_protocol_version() -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .last()
        .copied()
        .unwrap_or("2025-11-25")
}

/// Server-chosen catalog TTL. The reference implementation hard-codes this to
/// one hour; whether clients may hint a different TTL is unspecified, so this
/// crate treats it as server-chosen and fixed.
pub const CATALOG_TTL: std::time::Duration = std::time::Duration::from_secs(60 * 60);

/// Metadata key carrying the negotiated MCP protocol version.
pub const MCP_PROTOCOL_VERSION_KEY: &str = "mcp-protocol-version";

/// Metadata key carrying the tool name on `CallTool` requests.
pub const MCP_TOOL_NAME_KEY: &str = "mcp-tool-name";

/// Metadata key carrying the resource URI on `ReadResource` requests.
pub const MCP_RESOURCE_URI_KEY: &str = "mcp-resource-uri";
