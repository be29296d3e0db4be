//! The registry boundary this transport consumes.
//!
//! The surrounding tool/resource registration surface (discovery,
//! decorators, FastMCP-style ergonomics) is out of scope for this crate;
//! the servicer only ever calls through these two traits.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{GrpcError, GrpcResult};
use crate::proto;
use crate::types::{Resource, ResourceContents, ResourceTemplate, Tool, ToolArguments, ToolReturn};

/// The operations a tool implementation can perform on its originating
/// call, modeled as a trait so the full surface named by the MCP session
/// is visible even though this transport implements only one of them.
///
/// All methods besides [`TransportSession::send_progress_notification`]
/// return [`GrpcError::Unsupported`]: this transport deliberately does not
/// support server-initiated out-of-band calls, and list-changed signals
/// travel via TTL expiry on the client side instead.
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Send a log message notification. Unsupported on this transport.
    async fn send_log_message(&self, _level: &str, _data: serde_json::Value) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_log_message"))
    }

    /// Send a resource-updated notification. Unsupported on this transport.
    async fn send_resource_updated(&self, _uri: &str) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_resource_updated"))
    }

    /// Request the client's roots. Unsupported on this transport.
    async fn list_roots(&self) -> GrpcResult<Vec<String>> {
        Err(GrpcError::unsupported("list_roots"))
    }

    /// Request elicitation from the client. Unsupported on this transport.
    async fn elicit(&self, _message: &str) -> GrpcResult<serde_json::Value> {
        Err(GrpcError::unsupported("elicit"))
    }

    /// Ping the client. Unsupported on this transport.
    async fn send_ping(&self) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_ping"))
    }

    /// Report progress on the in-flight call. The only operation this
    /// transport implements.
    async fn send_progress_notification(
        &self,
        progress_token: &str,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> GrpcResult<()>;

    /// Notify that the resource catalog changed. Unsupported; clients rely
    /// on TTL expiry instead.
    async fn send_resource_list_changed(&self) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_resource_list_changed"))
    }

    /// Notify that the tool catalog changed. Unsupported; clients rely on
    /// TTL expiry instead.
    async fn send_tool_list_changed(&self) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_tool_list_changed"))
    }

    /// Notify that the prompt catalog changed. Unsupported on this
    /// transport (prompts are out of scope for this core entirely).
    async fn send_prompt_list_changed(&self) -> GrpcResult<()> {
        Err(GrpcError::unsupported("send_prompt_list_changed"))
    }
}

/// A [`TransportSession`] backed by the per-call response queue: the only
/// implemented operation enqueues a progress frame for the `CallTool` RPC
/// loop to forward to the client.
pub struct GrpcSession {
    response_tx: mpsc::UnboundedSender<proto::CallToolResponse>,
}

impl GrpcSession {
    /// Build a session that reports progress by enqueueing frames onto
    /// `response_tx`.
    #[must_use]
    pub fn new(response_tx: mpsc::UnboundedSender<proto::CallToolResponse>) -> Self {
        Self { response_tx }
    }
}

#[async_trait]
impl TransportSession for GrpcSession {
    async fn send_progress_notification(
        &self,
        progress_token: &str,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> GrpcResult<()> {
        let frame = proto::CallToolResponse {
            frame: Some(proto::call_tool_response::Frame::Progress(
                proto::ProgressNotification {
                    progress_token: progress_token.to_string(),
                    progress,
                    total,
                    message,
                },
            )),
        };
        self.response_tx
            .send(frame)
            .map_err(|_| GrpcError::internal("response queue closed"))
    }
}

/// Per-invocation context handed to a tool implementation: the request's
/// progress token and the session it reports progress through.
#[derive(Clone)]
pub struct RequestContext {
    /// The progress token supplied by the client for this call, if any.
    pub progress_token: Option<String>,
    /// The session used to report progress.
    pub session: Arc<dyn TransportSession>,
}

/// Hosts and invokes tools.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Return the current tool catalog.
    async fn list_tools(&self) -> GrpcResult<Vec<Tool>>;

    /// Invoke `name` with `arguments`. `context` carries the session a
    /// tool implementation uses to report progress.
    ///
    /// Returns `Err` only for failures the transport should treat as
    /// transport-level (registry unavailable, etc); an ordinary tool
    /// failure is represented as `Ok(ToolReturn::Unstructured(..))` whose
    /// normalized result has `is_error: true` — see [`crate::codec`].
    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        context: RequestContext,
    ) -> GrpcResult<ToolReturn>;
}

/// Hosts readable resources.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Return the current resource catalog.
    async fn list_resources(&self) -> GrpcResult<Vec<Resource>>;

    /// Return the current resource template catalog.
    async fn list_resource_templates(&self) -> GrpcResult<Vec<ResourceTemplate>>;

    /// Read the resource at `uri`. An empty vector is treated by the
    /// servicer as "not found".
    async fn read_resource(&self, uri: &str) -> GrpcResult<Vec<ResourceContents>>;
}

/// A [`ToolHandler`]/[`ResourceHandler`] pair that has neither tools nor
/// resources. Useful as a default for a server that only serves one of
/// the two catalogs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpRegistry;

#[async_trait]
impl ToolHandler for NoOpRegistry {
    async fn list_tools(&self) -> GrpcResult<Vec<Tool>> {
        Ok(Vec::new())
    }

    async fn call_tool(
        &self,
        name: &str,
        _arguments: ToolArguments,
        _context: RequestContext,
    ) -> GrpcResult<ToolReturn> {
        Err(crate::error::GrpcError::invalid_request(format!(
            "no tool handler configured; cannot call '{name}'"
        )))
    }
}

#[async_trait]
impl ResourceHandler for NoOpRegistry {
    async fn list_resources(&self) -> GrpcResult<Vec<Resource>> {
        Ok(Vec::new())
    }

    async fn list_resource_templates(&self) -> GrpcResult<Vec<ResourceTemplate>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, _uri: &str) -> GrpcResult<Vec<ResourceContents>> {
        Ok(Vec::new())
    }
}
