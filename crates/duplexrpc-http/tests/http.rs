//! Integration tests for `HttpClient` against a wiremock JSON-RPC endpoint.

use std::time::Duration;

use duplexrpc_core::{JsonRpcRequest, RpcTransport, TransportError};
use duplexrpc_http::{HttpClient, HttpClientConfig};
use serde_json::{json, Value};
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

// ─── Helpers ──────────────────────────────────────────────────────────────────

async fn server_replying(body: Value) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&server)
        .await;
    server
}

/// Batch responder: answers every request with `{"echo": <method>}`, except
/// methods named `fail`, which get a protocol error.
fn echo_batch(req: &Request) -> ResponseTemplate {
    let calls: Vec<Value> = serde_json::from_slice(&req.body).unwrap();
    let replies: Vec<Value> = calls
        .iter()
        .map(|c| {
            if c["method"] == "fail" {
                json!({"id": c["id"], "jsonrpc": "2.0", "error": {"code": -32000, "message": "boom"}})
            } else {
                json!({"id": c["id"], "jsonrpc": "2.0", "result": {"echo": c["method"], "id": c["id"]}})
            }
        })
        .collect();
    ResponseTemplate::new(200).set_body_json(replies)
}

async fn echo_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(echo_batch)
        .mount(&server)
        .await;
    server
}

fn req(method: &str) -> JsonRpcRequest {
    JsonRpcRequest::with_params(99, method, &json!({})).unwrap()
}

// ─── Single requests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn request_sends_id_zero_and_decodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"id": 0, "jsonrpc": "2.0", "method": "get_height"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 0, "jsonrpc": "2.0", "result": 1234})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let height: u64 = client.request("get_height", &json!({})).await.unwrap();
    assert_eq!(height, 1234);
}

#[tokio::test]
async fn protocol_error_is_returned_with_server_message() {
    let server = server_replying(
        json!({"id": 0, "jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}}),
    )
    .await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let err = client.request::<_, u64>("nope", &()).await.unwrap_err();
    assert!(err.is_protocol_error());
    assert_eq!(err.rpc_error().unwrap().message, "Method not found");
}

#[tokio::test]
async fn decode_failure_is_distinct_from_protocol_error() {
    let server = server_replying(json!({"id": 0, "jsonrpc": "2.0", "result": "abc"})).await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let err = client.request::<_, u64>("get_height", &()).await.unwrap_err();
    assert!(matches!(err, TransportError::Deserialization(_)));
    assert!(!err.is_protocol_error());
}

#[tokio::test]
async fn headers_are_attached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": 0, "jsonrpc": "2.0", "result": true})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = HttpClientConfig::default().with_header("Authorization", "Basic dXNlcjpwYXNz");
    let client = HttpClient::new(server.uri(), config).unwrap();
    let ok: bool = client.request("ping", &()).await.unwrap();
    assert!(ok);
}

#[tokio::test]
async fn non_success_status_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let err = client.request::<_, Value>("ping", &()).await.unwrap_err();
    match err {
        TransportError::Http(msg) => assert!(msg.contains("503"), "{msg}"),
        other => panic!("expected Http, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": 0, "jsonrpc": "2.0", "result": 1}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = HttpClientConfig::default().with_timeout(Duration::from_millis(50));
    let client = HttpClient::new(server.uri(), config).unwrap();
    let err = client.request::<_, u64>("slow", &()).await.unwrap_err();
    assert!(err.is_timeout(), "got {err:?}");
}

#[tokio::test]
async fn transport_trait_call() {
    let server = server_replying(json!({"id": 0, "jsonrpc": "2.0", "result": "1.2.0"})).await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let version: String = client.call("get_version", &()).await.unwrap();
    assert_eq!(version, "1.2.0");
    assert_eq!(RpcTransport::url(&client), server.uri());
}

// ─── Batches ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_assigns_sequential_ids() {
    let server = echo_server().await;
    let client = HttpClient::default_for(server.uri()).unwrap();

    let mut a: Option<Value> = None;
    let mut b: Option<Value> = None;
    let mut c: Option<Value> = None;
    let errors = client
        .batch_request(
            vec![req("first"), req("second"), req("third")],
            &mut [&mut a, &mut b, &mut c],
        )
        .await
        .unwrap();

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(a.unwrap(), json!({"echo": "first", "id": 0}));
    assert_eq!(b.unwrap(), json!({"echo": "second", "id": 1}));
    assert_eq!(c.unwrap(), json!({"echo": "third", "id": 2}));
}

#[tokio::test]
async fn batch_partial_failure_keeps_successful_slots() {
    let server = echo_server().await;
    let client = HttpClient::default_for(server.uri()).unwrap();

    let mut ok: Option<Value> = None;
    let mut failed: Option<Value> = None;
    let errors = client
        .batch_request(vec![req("get_info"), req("fail")], &mut [&mut ok, &mut failed])
        .await
        .unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].index, Some(1));
    assert_eq!(errors[0].error.rpc_error().unwrap().message, "boom");
    assert_eq!(ok.unwrap()["echo"], "get_info");
    assert!(failed.is_none());
}

#[tokio::test]
async fn batch_with_short_results_reports_missing_slots() {
    let server = echo_server().await;
    let client = HttpClient::default_for(server.uri()).unwrap();

    let mut only: Option<Value> = None;
    let errors = client
        .batch_request(vec![req("a"), req("b"), req("c")], &mut [&mut only])
        .await
        .unwrap();

    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].index, Some(1));
    assert!(matches!(errors[0].error, TransportError::MissingSlot { index: 1 }));
    assert_eq!(errors[1].index, Some(2));
    assert!(matches!(errors[1].error, TransportError::MissingSlot { index: 2 }));
    assert_eq!(only.unwrap()["echo"], "a");
}

#[tokio::test]
async fn batch_decode_failure_is_per_index() {
    let server = echo_server().await;
    let client = HttpClient::default_for(server.uri()).unwrap();

    let mut good: Option<Value> = None;
    let mut wrong_shape: Option<u64> = None;
    let errors = client
        .batch_request(vec![req("a"), req("b")], &mut [&mut good, &mut wrong_shape])
        .await
        .unwrap();

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].index, Some(1));
    assert!(matches!(errors[0].error, TransportError::Deserialization(_)));
    assert!(good.is_some());
    assert!(wrong_shape.is_none());
}

#[tokio::test]
async fn empty_batch_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = HttpClient::default_for(server.uri()).unwrap();
    let errors = client.batch_request(vec![], &mut []).await.unwrap();
    assert!(errors.is_empty());
}

#[tokio::test]
async fn batch_body_that_is_not_an_array_fails_whole_call() {
    let server = server_replying(json!({"id": 0, "jsonrpc": "2.0", "result": 1})).await;
    let client = HttpClient::default_for(server.uri()).unwrap();

    let mut a: Option<u64> = None;
    let err = client
        .batch_request(vec![req("a")], &mut [&mut a])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Deserialization(_)));
}
