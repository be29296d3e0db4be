//! End-to-end scenarios run against a real server over a loopback TCP
//! connection: tool invocation (success and in-band error), resource
//! reads, and streamed progress.

mod support;

use std::sync::{Arc, Mutex};

use mcp_grpc_transport::client::{McpGrpcClient, McpGrpcClientConfig};
use mcp_grpc_transport::error::{GrpcError, McpErrorCode};
use mcp_grpc_transport::types::Progress;
use serde_json::json;

async fn connect(addr: std::net::SocketAddr) -> McpGrpcClient {
    let config = McpGrpcClientConfig::new(format!("http://{addr}"));
    McpGrpcClient::connect(config).await.expect("connect")
}

#[tokio::test]
async fn s1_greet_returns_text_and_structured_content() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let mut args = std::collections::HashMap::new();
    args.insert("name".to_string(), json!("World"));
    let result = client.call_tool("greet", args, None).await.expect("call_tool");

    assert!(!result.is_error);
    assert_eq!(
        result.content[0].as_text(),
        Some("Hello, World! Welcome to the Simple gRPC Server!")
    );
    assert_eq!(
        result.structured_content,
        Some(json!({"result": "Hello, World! Welcome to the Simple gRPC Server!"}))
    );
}

#[tokio::test]
async fn s2_test_tool_adds_two_numbers() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let mut args = std::collections::HashMap::new();
    args.insert("a".to_string(), json!(1));
    args.insert("b".to_string(), json!(2));
    let result = client.call_tool("test_tool", args, None).await.expect("call_tool");

    assert!(!result.is_error);
    assert_eq!(result.content[0].as_text(), Some("3"));
    assert_eq!(result.structured_content, Some(json!({"result": 3})));
}

#[tokio::test]
async fn s3_unknown_tool_reports_not_found_in_band() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let result = client
        .call_tool("non_existent", std::collections::HashMap::new(), None)
        .await
        .expect("call_tool should not fail transport-level");

    assert!(result.is_error);
    assert!(result.content[0]
        .as_text()
        .unwrap()
        .contains("Tool 'non_existent' not found."));
}

#[tokio::test]
async fn s4_greet_with_non_string_name_reports_validation_error_in_band() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let mut args = std::collections::HashMap::new();
    args.insert("name".to_string(), json!(123));
    let result = client.call_tool("greet", args, None).await.expect("call_tool");

    assert!(result.is_error);
    let text = result.content[0].as_text().unwrap();
    assert!(text.contains("validation error"));
    assert!(text.contains("name"));
    assert!(text.contains("Input should be a valid string"));
}

#[tokio::test]
async fn s5_read_resource_returns_text_contents() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let contents = client.read_resource("test://hello").await.expect("read_resource");
    assert_eq!(contents.len(), 1);
    assert_eq!(contents[0].uri, "test://hello");
    assert_eq!(contents[0].mime_type.as_deref(), Some("text/plain"));
    assert_eq!(contents[0].text.as_deref(), Some("Hello from resource!"));
}

#[tokio::test]
async fn s6_read_missing_resource_maps_to_resource_not_found() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let err = client
        .read_resource("test://nonexistent")
        .await
        .expect_err("should not be found");

    match err {
        GrpcError::Protocol { code, message } => {
            assert_eq!(code, McpErrorCode::ResourceNotFound);
            assert_eq!(code.code(), Some(-32002));
            assert!(message.contains("Resource test://nonexistent not found."));
        }
        other => panic!("expected Protocol(ResourceNotFound), got {other:?}"),
    }
}

#[tokio::test]
async fn s7_download_file_reports_progress_before_final_result() {
    let (addr, _server) = support::spawn_server().await;
    let mut client = connect(addr).await;

    let updates: Arc<Mutex<Vec<Progress>>> = Arc::new(Mutex::new(Vec::new()));
    let updates_cb = Arc::clone(&updates);
    let callback: mcp_grpc_transport::client::ProgressCallback = Arc::new(move |progress| {
        let updates = Arc::clone(&updates_cb);
        Box::pin(async move {
            updates.lock().unwrap().push(progress);
        })
    });

    let mut args = std::collections::HashMap::new();
    args.insert("filename".to_string(), json!("f"));
    args.insert("size_mb".to_string(), json!(0.1));
    let result = client
        .call_tool("download_file", args, Some(callback))
        .await
        .expect("call_tool");

    assert!(!result.is_error);
    let seen = updates.lock().unwrap();
    assert!(!seen.is_empty(), "progress callback should fire at least once");
    for p in seen.iter() {
        assert!(p.progress >= 0.0 && p.progress <= 1.0);
        assert_eq!(p.total, Some(1.0));
    }
}
