//! Shared test fixtures: an in-memory registry implementing the catalog
//! used by the end-to-end scenarios, and a helper that serves it over a
//! loopback TCP listener for the duration of a test.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mcp_grpc_transport::{
    GrpcError, GrpcResult, RequestContext, ResourceHandler, ToolHandler, TransportSession,
};
use mcp_grpc_transport::server::McpGrpcServer;
use mcp_grpc_transport::types::{
    Resource, ResourceContents, ResourceTemplate, Tool, ToolArguments, ToolReturn,
};
use serde_json::{Map, Value};
use tonic::transport::Server;

/// The registry backing every end-to-end scenario: `greet`, `test_tool`,
/// `download_file`, and `blocking_tool`, plus one readable resource at
/// `test://hello`. `non_existent` and `test://nonexistent` are deliberately
/// absent from both catalogs.
pub struct Fixtures;

#[async_trait]
impl ToolHandler for Fixtures {
    async fn list_tools(&self) -> GrpcResult<Vec<Tool>> {
        Ok(vec![
            Tool {
                name: "greet".into(),
                description: Some("Greets someone".into()),
                title: None,
                input_schema: Map::new(),
                output_schema: None,
            },
            Tool {
                name: "test_tool".into(),
                description: Some("Adds two numbers".into()),
                title: None,
                input_schema: Map::new(),
                output_schema: None,
            },
            Tool {
                name: "download_file".into(),
                description: Some("Reports download progress".into()),
                title: None,
                input_schema: Map::new(),
                output_schema: None,
            },
            Tool {
                name: "blocking_tool".into(),
                description: Some("Never returns on its own".into()),
                title: None,
                input_schema: Map::new(),
                output_schema: None,
            },
        ])
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        context: RequestContext,
    ) -> GrpcResult<ToolReturn> {
        match name {
            "greet" => greet(&arguments),
            "test_tool" => Ok(add(&arguments)),
            "download_file" => download_file(&context).await,
            "blocking_tool" => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolReturn::Unstructured(vec![
                    mcp_grpc_transport::types::Content::text("never reached"),
                ]))
            }
            other => Err(GrpcError::invalid_request(format!("no such tool: {other}"))),
        }
    }
}

fn greet(arguments: &ToolArguments) -> GrpcResult<ToolReturn> {
    use mcp_grpc_transport::types::Content;

    let Some(name) = arguments.get("name") else {
        return Err(GrpcError::invalid_request(
            "1 validation error for greet\nname\n  Field required [type=missing]",
        ));
    };
    let Some(name) = name.as_str() else {
        return Err(GrpcError::invalid_request(
            "1 validation error for greet\nname\n  Input should be a valid string [type=string_type]",
        ));
    };

    let text = format!("Hello, {name}! Welcome to the Simple gRPC Server!");
    let mut structured = Map::new();
    structured.insert("result".into(), Value::String(text.clone()));
    Ok(ToolReturn::Both(vec![Content::text(text)], structured))
}

fn add(arguments: &ToolArguments) -> ToolReturn {
    use mcp_grpc_transport::types::Content;

    let a = arguments.get("a").and_then(Value::as_f64).unwrap_or(0.0);
    let b = arguments.get("b").and_then(Value::as_f64).unwrap_or(0.0);
    let sum = a + b;

    let mut structured = Map::new();
    let rendered = if sum.fract() == 0.0 {
        structured.insert("result".into(), Value::from(sum as i64));
        (sum as i64).to_string()
    } else {
        structured.insert("result".into(), Value::from(sum));
        sum.to_string()
    };
    ToolReturn::Both(vec![Content::text(rendered)], structured)
}

async fn download_file(context: &RequestContext) -> GrpcResult<ToolReturn> {
    use mcp_grpc_transport::types::Content;

    let token = context.progress_token.clone().unwrap_or_default();
    context
        .session
        .send_progress_notification(&token, 0.5, Some(1.0), Some("halfway".into()))
        .await?;
    context
        .session
        .send_progress_notification(&token, 1.0, Some(1.0), Some("done".into()))
        .await?;
    Ok(ToolReturn::Unstructured(vec![Content::text(
        "Download complete",
    )]))
}

#[async_trait]
impl ResourceHandler for Fixtures {
    async fn list_resources(&self) -> GrpcResult<Vec<Resource>> {
        Ok(vec![Resource {
            uri: "test://hello".into(),
            name: "hello".into(),
            description: None,
            title: None,
            mime_type: Some("text/plain".into()),
            size: None,
            annotations: None,
        }])
    }

    async fn list_resource_templates(&self) -> GrpcResult<Vec<ResourceTemplate>> {
        Ok(Vec::new())
    }

    async fn read_resource(&self, uri: &str) -> GrpcResult<Vec<ResourceContents>> {
        if uri == "test://hello" {
            Ok(vec![ResourceContents::text(
                uri,
                "text/plain",
                "Hello from resource!",
            )])
        } else {
            Ok(Vec::new())
        }
    }
}

/// Spawn an [`McpGrpcServer`] backed by [`Fixtures`] on a loopback port and
/// return its address plus the serving task, so the caller can connect a
/// client and drop/abort the task when the test ends.
pub async fn spawn_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind loopback listener");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let server = McpGrpcServer::builder()
        .tool_handler(Arc::new(Fixtures))
        .resource_handler(Arc::new(Fixtures))
        .build();

    let svc = mcp_grpc_transport::proto::mcp_server::McpServer::new(server);
    let handle = tokio::spawn(async move {
        Server::builder()
            .add_service(svc)
            .serve(addr)
            .await
            .expect("server failed");
    });

    // Give the listener a moment to come up before the caller connects.
    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, handle)
}
