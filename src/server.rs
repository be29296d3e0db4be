//! Server Servicer (§4.D) and Server Session (§4.E).
//!
//! Implements the four RPCs against a [`ToolHandler`]/[`ResourceHandler`]
//! pair, gated uniformly by the protocol version check (§4.C), and the
//! streaming sink tool implementations use to report progress during a
//! `CallTool` invocation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tonic::{Request, Response, Status, Streaming};

use crate::codec;
use crate::error::{GrpcError, GrpcResult};
use crate::proto;
use crate::registry::{GrpcSession, NoOpRegistry, ResourceHandler, ToolHandler};
use crate::types::{Tool, ToolArguments};
use crate::version;
use crate::SUPPORTED_PROTOCOL_VERSIONS;

pub use crate::registry::{RequestContext, TransportSession};

/// The server-side tool-definition cache: a simple name-to-`Tool` map,
/// refilled by a full `list_tools()` call on a miss. Has no TTL of its
/// own; it is authoritative for the servicer's lifetime. Shared between
/// the `ListTools` handler and every `CallTool` invocation's tool runner.
#[derive(Clone)]
struct ToolCache {
    tool_handler: Arc<dyn ToolHandler>,
    entries: Arc<RwLock<HashMap<String, Tool>>>,
}

impl ToolCache {
    fn new(tool_handler: Arc<dyn ToolHandler>) -> Self {
        Self {
            tool_handler,
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn get(&self, name: &str) -> Option<Tool> {
        if let Some(tool) = self.entries.read().await.get(name).cloned() {
            return Some(tool);
        }
        if let Ok(tools) = self.tool_handler.list_tools().await {
            self.refill(tools.clone()).await;
        }
        self.entries.read().await.get(name).cloned()
    }

    async fn refill(&self, tools: Vec<Tool>) {
        let mut entries = self.entries.write().await;
        for tool in tools {
            entries.insert(tool.name.clone(), tool);
        }
    }
}

/// Server-side gRPC servicer for the MCP transport.
pub struct McpGrpcServer {
    tool_handler: Arc<dyn ToolHandler>,
    resource_handler: Arc<dyn ResourceHandler>,
    tool_cache: ToolCache,
    list_resources_ttl: Duration,
    list_resource_templates_ttl: Duration,
    list_tools_ttl: Duration,
    supported_versions: Vec<&'static str>,
}

impl McpGrpcServer {
    /// Start building a server.
    #[must_use]
    pub fn builder() -> McpGrpcServerBuilder {
        McpGrpcServerBuilder::default()
    }

    fn negotiate(&self, metadata: &tonic::metadata::MetadataMap) -> Result<String, Status> {
        let mut initial = tonic::metadata::MetadataMap::new();
        version::negotiate(metadata, &self.supported_versions, &mut initial).map_err(|mut status| {
            *status.metadata_mut() = initial;
            status
        })
    }
}

/// Runs the tool-runner body described in §4.D.3: look up the cached tool
/// definition, invoke the registry, normalize the result through the
/// content codec, and enqueue exactly one terminal frame, always followed
/// (by the caller) with the stream's end.
async fn run_tool(
    tool_handler: Arc<dyn ToolHandler>,
    tool_cache: ToolCache,
    name: String,
    arguments: ToolArguments,
    progress_token: Option<String>,
    response_tx: mpsc::UnboundedSender<proto::CallToolResponse>,
) {
    let Some(tool) = tool_cache.get(&name).await else {
        send_error_frame(&response_tx, format!("Tool '{name}' not found."));
        return;
    };

    let session = Arc::new(GrpcSession::new(response_tx.clone()));
    let context = RequestContext {
        progress_token,
        session,
    };

    let tool_return = match tool_handler.call_tool(&name, arguments, context).await {
        Ok(value) => value,
        Err(e) => {
            send_error_frame(&response_tx, format!("Error executing tool {name}: {e}"));
            return;
        }
    };

    let result = match codec::normalize_tool_return(tool_return, Some(&tool)) {
        Ok(result) => result,
        Err(e) => {
            send_error_frame(&response_tx, e.to_string());
            return;
        }
    };

    match (&result).try_into() {
        Ok(proto_result) => {
            let _ = response_tx.send(proto::CallToolResponse {
                frame: Some(proto::call_tool_response::Frame::Result(proto_result)),
            });
        }
        Err(e) => send_error_frame(&response_tx, format!("Error executing tool {name}: {e}")),
    }
}

fn send_error_frame(response_tx: &mpsc::UnboundedSender<proto::CallToolResponse>, message: String) {
    let _ = response_tx.send(proto::CallToolResponse {
        frame: Some(proto::call_tool_response::Frame::Result(
            proto::CallToolResult {
                content: vec![proto::Content {
                    content: Some(proto::content::Content::Text(proto::TextContent {
                        text: message,
                    })),
                    annotations: None,
                }],
                structured_content: None,
                is_error: true,
            },
        )),
    });
}

#[tonic::async_trait]
impl proto::mcp_server::Mcp for McpGrpcServer {
    #[tracing::instrument(skip(self, request), fields(method = "ListResources"))]
    async fn list_resources(
        &self,
        request: Request<proto::ListResourcesRequest>,
    ) -> Result<Response<proto::ListResourcesResponse>, Status> {
        let negotiated = self.negotiate(request.metadata())?;
        let resources = self
            .resource_handler
            .list_resources()
            .await
            .map_err(internal_status)?;
        let protos: Vec<proto::Resource> = resources.iter().map(Into::into).collect();

        let mut response = Response::new(proto::ListResourcesResponse {
            resources: protos,
            ttl: Some(codec::duration_to_proto(self.list_resources_ttl)),
            next_cursor: None,
        });
        insert_negotiated(&mut response, &negotiated);
        Ok(response)
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListResourceTemplates"))]
    async fn list_resource_templates(
        &self,
        request: Request<proto::ListResourceTemplatesRequest>,
    ) -> Result<Response<proto::ListResourceTemplatesResponse>, Status> {
        let negotiated = self.negotiate(request.metadata())?;
        let templates = self
            .resource_handler
            .list_resource_templates()
            .await
            .map_err(internal_status)?;
        let protos: Vec<proto::ResourceTemplate> = templates.iter().map(Into::into).collect();

        let mut response = Response::new(proto::ListResourceTemplatesResponse {
            resource_templates: protos,
            ttl: Some(codec::duration_to_proto(self.list_resource_templates_ttl)),
            next_cursor: None,
        });
        insert_negotiated(&mut response, &negotiated);
        Ok(response)
    }

    #[tracing::instrument(skip(self, request), fields(method = "ListTools"))]
    async fn list_tools(
        &self,
        request: Request<proto::ListToolsRequest>,
    ) -> Result<Response<proto::ListToolsResponse>, Status> {
        let negotiated = self.negotiate(request.metadata())?;
        let tools = self
            .tool_handler
            .list_tools()
            .await
            .map_err(internal_status)?;
        self.tool_cache.refill(tools.clone()).await;

        let protos = tools
            .iter()
            .map(TryInto::try_into)
            .collect::<GrpcResult<Vec<proto::Tool>>>()
            .map_err(|e| Status::invalid_argument(format!("Failed to parse tool data: {e}")))?;

        let mut response = Response::new(proto::ListToolsResponse {
            tools: protos,
            ttl: Some(codec::duration_to_proto(self.list_tools_ttl)),
            next_cursor: None,
        });
        insert_negotiated(&mut response, &negotiated);
        Ok(response)
    }

    #[tracing::instrument(skip(self, request), fields(method = "ReadResource"))]
    async fn read_resource(
        &self,
        request: Request<proto::ReadResourceRequest>,
    ) -> Result<Response<proto::ReadResourceResponse>, Status> {
        let negotiated = self.negotiate(request.metadata())?;
        let uri = request.get_ref().uri.clone();

        let contents = self
            .resource_handler
            .read_resource(&uri)
            .await
            .map_err(|e| Status::not_found(format!("Resource not found: {e}")))?;

        if contents.is_empty() {
            return Err(Status::not_found(format!("Resource {uri} not found.")));
        }

        let protos = contents
            .iter()
            .map(TryInto::try_into)
            .collect::<GrpcResult<Vec<proto::ResourceContents>>>()
            .map_err(internal_status)?;

        let mut response = Response::new(proto::ReadResourceResponse { contents: protos });
        insert_negotiated(&mut response, &negotiated);
        Ok(response)
    }

    /// Server-streaming response type for [`call_tool`](Self::call_tool).
    type CallToolStream = UnboundedReceiverStream<Result<proto::CallToolResponse, Status>>;

    #[tracing::instrument(skip(self, request), fields(method = "CallTool"))]
    async fn call_tool(
        &self,
        request: Request<Streaming<proto::CallToolRequest>>,
    ) -> Result<Response<Self::CallToolStream>, Status> {
        let negotiated = self.negotiate(request.metadata())?;

        let mut inbound = request.into_inner();
        let initial = inbound
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("Initial request cannot be empty."))?;

        if initial.name.is_empty() {
            return Err(Status::invalid_argument("Initial request cannot be empty."));
        }

        let arguments: ToolArguments = initial
            .arguments
            .as_ref()
            .map(codec::struct_to_json_map)
            .unwrap_or_default()
            .into_iter()
            .collect();

        let (response_tx, mut response_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let tool_handler = Arc::clone(&self.tool_handler);
        let tool_cache = self.tool_cache.clone();
        let name = initial.name.clone();
        let progress_token = initial.progress_token.clone();

        let runner = tokio::spawn(run_tool(
            tool_handler,
            tool_cache,
            name,
            arguments,
            progress_token,
            response_tx,
        ));

        // The RPC loop described in §4.D.4: dequeue; forward; stop at the
        // terminator. Racing the dequeue against `out_tx.closed()` catches a
        // dropped client stream even when the tool never enqueues a frame
        // (e.g. a tool that never returns on its own) — waiting only on a
        // failed `send` would otherwise park here forever.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = out_tx.closed() => break,
                    frame = response_rx.recv() => {
                        let Some(frame) = frame else { break };
                        if out_tx.send(Ok(frame)).is_err() {
                            break;
                        }
                    }
                }
            }
            if !runner.is_finished() {
                runner.abort();
            }
            let _ = runner.await;
        });

        let mut response = Response::new(UnboundedReceiverStream::new(out_rx));
        insert_negotiated(&mut response, &negotiated);
        Ok(response)
    }
}

fn internal_status(err: GrpcError) -> Status {
    Status::internal(format!("An internal error occurred: {err}"))
}

fn insert_negotiated<T>(response: &mut Response<T>, negotiated: &str) {
    if let Ok(value) = negotiated.parse() {
        response
            .metadata_mut()
            .insert(crate::MCP_PROTOCOL_VERSION_KEY, value);
    }
}

/// Builder for [`McpGrpcServer`].
#[derive(Default)]
pub struct McpGrpcServerBuilder {
    tool_handler: Option<Arc<dyn ToolHandler>>,
    resource_handler: Option<Arc<dyn ResourceHandler>>,
    list_resources_ttl: Option<Duration>,
    list_resource_templates_ttl: Option<Duration>,
    list_tools_ttl: Option<Duration>,
}

impl McpGrpcServerBuilder {
    /// Set the tool handler. Defaults to [`NoOpRegistry`] if unset.
    #[must_use]
    pub fn tool_handler(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.tool_handler = Some(handler);
        self
    }

    /// Set the resource handler. Defaults to [`NoOpRegistry`] if unset.
    #[must_use]
    pub fn resource_handler(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        self.resource_handler = Some(handler);
        self
    }

    /// Override the TTL attached to `ListResources` responses.
    #[must_use]
    pub fn list_resources_ttl(mut self, ttl: Duration) -> Self {
        self.list_resources_ttl = Some(ttl);
        self
    }

    /// Override the TTL attached to `ListResourceTemplates` responses.
    #[must_use]
    pub fn list_resource_templates_ttl(mut self, ttl: Duration) -> Self {
        self.list_resource_templates_ttl = Some(ttl);
        self
    }

    /// Override the TTL attached to `ListTools` responses.
    #[must_use]
    pub fn list_tools_ttl(mut self, ttl: Duration) -> Self {
        self.list_tools_ttl = Some(ttl);
        self
    }

    /// Build the server.
    #[must_use]
    pub fn build(self) -> McpGrpcServer {
        let noop = Arc::new(NoOpRegistry);
        let tool_handler = self.tool_handler.unwrap_or_else(|| noop.clone());
        McpGrpcServer {
            tool_cache: ToolCache::new(Arc::clone(&tool_handler)),
            tool_handler,
            resource_handler: self.resource_handler.unwrap_or(noop),
            list_resources_ttl: self.list_resources_ttl.unwrap_or(crate::CATALOG_TTL),
            list_resource_templates_ttl: self
                .list_resource_templates_ttl
                .unwrap_or(crate::CATALOG_TTL),
            list_tools_ttl: self.list_tools_ttl.unwrap_or(crate::CATALOG_TTL),
            supported_versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        }
    }
}
