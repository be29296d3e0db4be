//! Client Transport Session (§4.F).
//!
//! Wraps the generated tonic client stub with: per-call protocol-version
//! negotiation (one retry, triggered only by `UNIMPLEMENTED`), TTL-bounded
//! caches for the three catalog RPCs, and the streaming `call_tool` engine
//! (progress callback dispatch, cooperative cancellation, output-schema
//! validation of the terminal result).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_stream::StreamExt;
use tonic::metadata::MetadataMap;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Status};

use crate::cache::CacheEntry;
use crate::codec;
use crate::error::{GrpcError, GrpcResult};
use crate::proto;
use crate::proto::mcp_client::McpClient as RawClient;
use crate::types::{CallToolResult, Progress, Resource, ResourceContents, ResourceTemplate, Tool, ToolArguments};
use crate::{MCP_PROTOCOL_VERSION_KEY, MCP_RESOURCE_URI_KEY, MCP_TOOL_NAME_KEY};

/// A callback invoked with each progress update for an in-flight `call_tool`.
pub type ProgressCallback =
    Arc<dyn Fn(Progress) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// A callback invoked when a cached catalog (tools, resources, or resource
/// templates) expires, mirroring the reference's list-changed notification.
pub type ListChangedCallback = Arc<dyn Fn(&'static str) + Send + Sync>;

/// Configuration for [`McpGrpcClient`].
pub struct McpGrpcClientConfig {
    /// The endpoint to connect to, e.g. `http://127.0.0.1:50051`.
    pub endpoint: String,
    /// Per-call timeout. `None` means no deadline is set.
    pub read_timeout: Option<Duration>,
    /// Invoked (with the name of the catalog that expired) whenever a
    /// cached catalog's TTL elapses.
    pub on_list_changed: Option<ListChangedCallback>,
}

impl McpGrpcClientConfig {
    /// Build a config pointed at `endpoint` with no timeout and no
    /// list-changed callback.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            read_timeout: None,
            on_list_changed: None,
        }
    }

    /// Set the per-call read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the callback invoked when a cached catalog expires.
    #[must_use]
    pub fn on_list_changed(mut self, callback: ListChangedCallback) -> Self {
        self.on_list_changed = Some(callback);
        self
    }
}

/// Client-side gRPC transport session for MCP.
///
/// Owns one [`tonic::transport::Channel`]-backed stub, a negotiated-version
/// cell shared across calls, the three catalog caches, and the bookkeeping
/// tables for in-flight `call_tool` invocations (progress callbacks,
/// cancellation handles).
pub struct McpGrpcClient {
    stub: RawClient<Channel>,
    read_timeout: Option<Duration>,
    negotiated_version: Mutex<String>,
    request_counter: AtomicI64,
    progress_callbacks: Mutex<HashMap<i64, ProgressCallback>>,
    running_calls: Mutex<HashMap<i64, tokio_util::sync::CancellationToken>>,
    tool_cache: CacheEntry<HashMap<String, Tool>>,
    resource_cache: CacheEntry<HashMap<String, Resource>>,
    resource_template_cache: CacheEntry<HashMap<String, ResourceTemplate>>,
}

impl McpGrpcClient {
    /// Connect to `config.endpoint` and build a client.
    ///
    /// # Errors
    /// Returns [`GrpcError::Config`] if the endpoint cannot be parsed, or
    /// [`GrpcError::Connection`] if the channel cannot be established.
    pub async fn connect(config: McpGrpcClientConfig) -> GrpcResult<Self> {
        let endpoint = Endpoint::from_shared(config.endpoint.clone())
            .map_err(|e| GrpcError::config(format!("invalid endpoint {}: {e}", config.endpoint)))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| GrpcError::connection(e.to_string()))?;
        Ok(Self::from_channel(channel, config))
    }

    /// Build a client from an already-established channel. Useful for
    /// in-process tests over a `tokio::io::duplex` channel.
    #[must_use]
    pub fn from_channel(channel: Channel, config: McpGrpcClientConfig) -> Self {
        let on_list_changed = config.on_list_changed;
        let tools_cb = on_list_changed.clone();
        let resources_cb = on_list_changed.clone();
        let templates_cb = on_list_changed;

        Self {
            stub: RawClient::new(channel),
            read_timeout: config.read_timeout,
            negotiated_version: Mutex::new(crate::latest_protocol_version().to_string()),
            request_counter: AtomicI64::new(0),
            progress_callbacks: Mutex::new(HashMap::new()),
            running_calls: Mutex::new(HashMap::new()),
            tool_cache: CacheEntry::with_expiry_callback(Arc::new(move || {
                let cb = tools_cb.clone();
                Box::pin(async move {
                    if let Some(cb) = cb {
                        cb("tools");
                    }
                })
            })),
            resource_cache: CacheEntry::with_expiry_callback(Arc::new(move || {
                let cb = resources_cb.clone();
                Box::pin(async move {
                    if let Some(cb) = cb {
                        cb("resources");
                    }
                })
            })),
            resource_template_cache: CacheEntry::with_expiry_callback(Arc::new(move || {
                let cb = templates_cb.clone();
                Box::pin(async move {
                    if let Some(cb) = cb {
                        cb("resource_templates");
                    }
                })
            })),
        }
    }

    fn negotiated_version(&self) -> String {
        self.negotiated_version
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Check a failed call for a version-negotiation opportunity
    /// (`UNIMPLEMENTED` carrying a supported version in initial metadata).
    /// Returns `true` if the negotiated version was updated and the caller
    /// should retry once.
    fn check_and_update_version(&self, status: &Status, initial_metadata: &MetadataMap) -> bool {
        if status.code() != tonic::Code::Unimplemented {
            return false;
        }
        let Some(server_version) =
            crate::version::metadata_value(initial_metadata, MCP_PROTOCOL_VERSION_KEY)
        else {
            return false;
        };
        if !crate::SUPPORTED_PROTOCOL_VERSIONS.contains(&server_version.as_str()) {
            return false;
        }
        *self
            .negotiated_version
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = server_version;
        true
    }

    fn set_version_metadata(metadata: &mut MetadataMap, version: &str) {
        if let Ok(value) = version.parse() {
            metadata.insert(MCP_PROTOCOL_VERSION_KEY, value);
        }
    }

    fn apply_deadline<T>(&self, request: &mut Request<T>) {
        if let Some(timeout) = self.read_timeout {
            request.set_timeout(timeout);
        }
    }

    /// Race `fut` against `self.read_timeout`, matching grpcio's locally
    /// enforced per-call deadline (the `timeout=` argument threaded through
    /// every stub call in the reference client): the deadline is observed
    /// by this process regardless of whether the peer honors the
    /// `grpc-timeout` header `apply_deadline` attaches to the request.
    async fn run_with_deadline<F, T>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        match self.read_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(Status::deadline_exceeded(format!(
                    "client-enforced deadline of {timeout:?} elapsed"
                ))),
            },
            None => fut.await,
        }
    }

    /// List the tool catalog, always performing a fresh round-trip and
    /// refreshing the cache with the server-chosen TTL (the cache itself is
    /// only ever consulted for output-schema lookups during result
    /// validation, never used to skip a `ListTools` call).
    ///
    /// # Errors
    /// [`GrpcError::Protocol`] with
    /// [`crate::error::McpErrorCode::ParseError`] on malformed wire data, or
    /// `InternalError` otherwise, per §4.F.
    pub async fn list_tools(&mut self) -> GrpcResult<Vec<Tool>> {
        for attempt in 1..=2 {
            let mut request = Request::new(proto::ListToolsRequest { cursor: None });
            self.apply_deadline(&mut request);
            Self::set_version_metadata(request.metadata_mut(), &self.negotiated_version());
            match self.run_with_deadline(self.stub.clone().list_tools(request)).await {
                Ok(response) => {
                    let proto::ListToolsResponse { tools, ttl, .. } = response.into_inner();
                    let tools: Vec<Tool> = tools
                        .iter()
                        .map(TryInto::try_into)
                        .collect::<GrpcResult<Vec<_>>>()
                        .map_err(|e| GrpcError::parse(format!("Failed to parse tool proto: {e}")))?;
                    let by_name: HashMap<String, Tool> =
                        tools.iter().map(|t| (t.name.clone(), t.clone())).collect();
                    let ttl = ttl.map(|t| codec::duration_from_proto(&t)).unwrap_or_default();
                    self.tool_cache.set(by_name, ttl);
                    return Ok(tools);
                }
                Err(status) => {
                    if attempt == 1 && self.check_and_update_version(&status, status.metadata()) {
                        continue;
                    }
                    return Err(Self::map_unary_status("ListTools", status));
                }
            }
        }
        Err(GrpcError::internal("ListTools failed after retry"))
    }

    /// List the resource catalog.
    ///
    /// # Errors
    /// See [`McpGrpcClient::list_tools`].
    pub async fn list_resources(&mut self) -> GrpcResult<Vec<Resource>> {
        for attempt in 1..=2 {
            let mut request = Request::new(proto::ListResourcesRequest { cursor: None });
            self.apply_deadline(&mut request);
            Self::set_version_metadata(request.metadata_mut(), &self.negotiated_version());
            match self.run_with_deadline(self.stub.clone().list_resources(request)).await {
                Ok(response) => {
                    let proto::ListResourcesResponse { resources, ttl, .. } = response.into_inner();
                    let resources: Vec<Resource> = resources.iter().map(Into::into).collect();
                    let by_name: HashMap<String, Resource> = resources
                        .iter()
                        .map(|r| (r.name.clone(), r.clone()))
                        .collect();
                    let ttl = ttl.map(|t| codec::duration_from_proto(&t)).unwrap_or_default();
                    self.resource_cache.set(by_name, ttl);
                    return Ok(resources);
                }
                Err(status) => {
                    if attempt == 1 && self.check_and_update_version(&status, status.metadata()) {
                        continue;
                    }
                    return Err(Self::map_unary_status("ListResources", status));
                }
            }
        }
        Err(GrpcError::internal("ListResources failed after retry"))
    }

    /// List the resource template catalog.
    ///
    /// # Errors
    /// See [`McpGrpcClient::list_tools`].
    pub async fn list_resource_templates(&mut self) -> GrpcResult<Vec<ResourceTemplate>> {
        for attempt in 1..=2 {
            let mut request = Request::new(proto::ListResourceTemplatesRequest { cursor: None });
            self.apply_deadline(&mut request);
            Self::set_version_metadata(request.metadata_mut(), &self.negotiated_version());
            match self.run_with_deadline(self.stub.clone().list_resource_templates(request)).await {
                Ok(response) => {
                    let proto::ListResourceTemplatesResponse {
                        resource_templates,
                        ttl,
                        ..
                    } = response.into_inner();
                    let templates: Vec<ResourceTemplate> =
                        resource_templates.iter().map(Into::into).collect();
                    let by_name: HashMap<String, ResourceTemplate> = templates
                        .iter()
                        .map(|t| (t.name.clone(), t.clone()))
                        .collect();
                    let ttl = ttl.map(|t| codec::duration_from_proto(&t)).unwrap_or_default();
                    self.resource_template_cache.set(by_name, ttl);
                    return Ok(templates);
                }
                Err(status) => {
                    if attempt == 1 && self.check_and_update_version(&status, status.metadata()) {
                        continue;
                    }
                    return Err(Self::map_unary_status("ListResourceTemplates", status));
                }
            }
        }
        Err(GrpcError::internal("ListResourceTemplates failed after retry"))
    }

    /// Read the resource at `uri`.
    ///
    /// # Errors
    /// A [`crate::error::McpErrorCode::ResourceNotFound`]-coded
    /// [`GrpcError::Protocol`] if the server reports `NOT_FOUND`; otherwise
    /// per §4.F.
    pub async fn read_resource(&mut self, uri: &str) -> GrpcResult<Vec<ResourceContents>> {
        for attempt in 1..=2 {
            let mut request = Request::new(proto::ReadResourceRequest { uri: uri.to_string() });
            self.apply_deadline(&mut request);
            if let Ok(value) = uri.parse() {
                request.metadata_mut().insert(MCP_RESOURCE_URI_KEY, value);
            }
            Self::set_version_metadata(request.metadata_mut(), &self.negotiated_version());
            match self.run_with_deadline(self.stub.clone().read_resource(request)).await {
                Ok(response) => {
                    return response
                        .into_inner()
                        .contents
                        .iter()
                        .map(TryInto::try_into)
                        .collect();
                }
                Err(status) => {
                    if attempt == 1 && self.check_and_update_version(&status, status.metadata()) {
                        continue;
                    }
                    if status.code() == tonic::Code::NotFound {
                        return Err(GrpcError::resource_not_found(format!(
                            "Resource {uri} not found."
                        )));
                    }
                    return Err(Self::map_unary_status("ReadResource", status));
                }
            }
        }
        Err(GrpcError::internal("ReadResource failed after retry"))
    }

    /// Call `name` with `arguments`, dispatching progress updates to
    /// `progress_callback` if given, and validating the terminal result's
    /// structured content against the tool's cached output schema.
    ///
    /// Applies the one-shot version-retry described in §4.C, and tears
    /// down its entry in the running-calls and progress-callback tables on
    /// every exit path (success, cancellation, or error).
    ///
    /// # Errors
    /// A [`GrpcError::Protocol`] with
    /// [`crate::error::McpErrorCode::RequestCancelled`] if cancelled,
    /// `RequestTimeout` on deadline exceeded, `ParseError` on malformed
    /// wire data, or `InternalError` otherwise.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: ToolArguments,
        progress_callback: Option<ProgressCallback>,
    ) -> GrpcResult<CallToolResult> {
        let request_id = self.request_counter.fetch_add(1, Ordering::SeqCst);
        if let Some(cb) = progress_callback {
            self.progress_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(request_id, cb);
        }

        let result = self.call_tool_with_retry(request_id, name, &arguments).await;

        self.running_calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&request_id);
        self.progress_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&request_id);

        let result = result?;
        self.validate_tool_result(name, &result).await?;
        Ok(result)
    }

    async fn call_tool_with_retry(
        &mut self,
        request_id: i64,
        name: &str,
        arguments: &ToolArguments,
    ) -> GrpcResult<CallToolResult> {
        for attempt in 1..=2 {
            let cancel = tokio_util::sync::CancellationToken::new();
            self.running_calls
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .insert(request_id, cancel.clone());

            let timeout = self.read_timeout;
            let outcome = match timeout {
                Some(timeout) => {
                    match tokio::time::timeout(
                        timeout,
                        self.call_tool_once(request_id, name, arguments, &cancel),
                    )
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => Err((
                            Status::deadline_exceeded(format!(
                                "client-enforced deadline of {timeout:?} elapsed"
                            )),
                            MetadataMap::new(),
                        )),
                    }
                }
                None => self.call_tool_once(request_id, name, arguments, &cancel).await,
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err((status, initial_metadata)) => {
                    if attempt == 1 && self.check_and_update_version(&status, &initial_metadata) {
                        continue;
                    }
                    return Err(Self::map_call_tool_status(name, status, cancel.is_cancelled()));
                }
            }
        }
        Err(GrpcError::internal("CallTool failed after retry"))
    }

    fn map_call_tool_status(name: &str, status: Status, locally_cancelled: bool) -> GrpcError {
        if locally_cancelled || status.code() == tonic::Code::Cancelled {
            return GrpcError::request_cancelled(format!("Tool call \"{name}\" was cancelled"));
        }
        if status.code() == tonic::Code::DeadlineExceeded {
            return GrpcError::request_timeout(format!(
                "Timed out while waiting for response to CallTool: {}",
                status.message()
            ));
        }
        if status.code() == tonic::Code::InvalidArgument {
            return GrpcError::parse(format!(
                "failed to parse tool result for \"{name}\": {}",
                status.message()
            ));
        }
        GrpcError::internal(format!(
            "grpc error - failed to call tool \"{name}\": {}",
            status.message()
        ))
    }

    async fn call_tool_once(
        &mut self,
        request_id: i64,
        name: &str,
        arguments: &ToolArguments,
        cancel: &tokio_util::sync::CancellationToken,
    ) -> Result<CallToolResult, (Status, MetadataMap)> {
        let version = self.negotiated_version();

        let struct_args = codec::json_map_to_struct(
            &arguments.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        );
        let initial = proto::CallToolRequest {
            name: name.to_string(),
            arguments: Some(struct_args),
            progress_token: Some(request_id.to_string()),
        };

        let mut request = Request::new(tokio_stream::once(initial));
        self.apply_deadline(&mut request);
        Self::set_version_metadata(request.metadata_mut(), &version);
        if let Ok(value) = name.parse() {
            request.metadata_mut().insert(MCP_TOOL_NAME_KEY, value);
        }

        let response = self
            .stub
            .call_tool(request)
            .await
            .map_err(|status| (status, MetadataMap::new()))?;

        let initial_metadata = response.metadata().clone();
        let mut stream = response.into_inner();

        let mut content = Vec::new();
        let mut structured_content = None;
        let mut is_error = false;

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err((Status::cancelled("call cancelled by client"), initial_metadata));
                }
                item = stream.next() => item,
            };

            let Some(item) = next else { break };
            let frame = item.map_err(|status| (status, initial_metadata.clone()))?;

            match frame.frame {
                Some(proto::call_tool_response::Frame::Progress(progress)) => {
                    self.dispatch_progress(&progress).await;
                }
                Some(proto::call_tool_response::Frame::Result(result)) => {
                    content = result.content;
                    structured_content = result.structured_content;
                    is_error = result.is_error;
                }
                None => {}
            }
        }

        let proto_result = proto::CallToolResult {
            content,
            structured_content,
            is_error,
        };
        (&proto_result).try_into().map_err(|_| {
            (
                Status::invalid_argument("failed to decode tool result"),
                initial_metadata,
            )
        })
    }

    async fn dispatch_progress(&self, progress: &proto::ProgressNotification) {
        let Ok(token) = progress.progress_token.parse::<i64>() else {
            return;
        };
        let callback = self
            .progress_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&token)
            .cloned();
        if let Some(callback) = callback {
            callback(Progress {
                progress_token: progress.progress_token.clone(),
                progress: progress.progress,
                total: progress.total,
                message: progress.message.clone(),
            })
            .await;
        }
    }

    async fn validate_tool_result(&mut self, name: &str, result: &CallToolResult) -> GrpcResult<()> {
        if result.is_error {
            return Ok(());
        }
        let mut cached = self.tool_cache.get();
        if cached.is_none() {
            self.list_tools().await?;
            cached = self.tool_cache.get();
        }
        let Some(schema) = cached.and_then(|tools| tools.get(name).and_then(|t| t.output_schema.clone()))
        else {
            return Ok(());
        };
        let Some(structured) = result.structured_content.as_ref().and_then(|v| v.as_object()) else {
            return Ok(());
        };
        codec::validate_structured_content(&schema, structured, name).map_err(|e| {
            GrpcError::internal(format!("Tool result validation failed for \"{name}\": {e}"))
        })
    }

    /// Dispatch a client-initiated cancellation for `request_id`.
    ///
    /// Mirrors the reference's `send_notification`/`CancelledNotification`
    /// handling: looks up the running call and signals its cancellation
    /// token, interrupting the next `stream.next()` poll in
    /// [`McpGrpcClient::call_tool_once`].
    pub fn cancel_request(&self, request_id: i64) {
        if let Some(cancel) = self
            .running_calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&request_id)
        {
            cancel.cancel();
        }
    }

    /// Tear down cache expiry timers. Idempotent; does not close the
    /// underlying channel (tonic channels have no explicit close, they are
    /// simply dropped).
    pub fn close(&self) {
        self.tool_cache.cancel_expiry_task();
        self.resource_cache.cancel_expiry_task();
        self.resource_template_cache.cancel_expiry_task();
    }

    /// Classify a failed unary call into the taxonomy from §4.G rather than
    /// surfacing the raw `Status`, so a second version-negotiation failure
    /// (or any other unclassified error) reaches the caller as
    /// `InternalError` per the reference's `_call_unary_rpc`.
    fn map_unary_status(rpc_name: &str, status: Status) -> GrpcError {
        match status.code() {
            tonic::Code::NotFound => GrpcError::resource_not_found(status.message()),
            tonic::Code::DeadlineExceeded => GrpcError::request_timeout(format!(
                "Timed out while waiting for response to {rpc_name}: {}",
                status.message()
            )),
            tonic::Code::Cancelled => GrpcError::request_cancelled(status.message()),
            _ => GrpcError::internal(format!(
                "grpc error - failed to call {rpc_name}: {}",
                status.message()
            )),
        }
    }
}
