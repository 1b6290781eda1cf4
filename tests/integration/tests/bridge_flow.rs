//! End-to-end bridge tests: a real bridge between a fake upstream gateway
//! and real WebSocket clients.

use clawbridge_integration_tests::{dead_upstream_url, FakeGateway, TestBridge, RECONNECT_DELAY};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn test_handshake_announces_hello() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;

    let mut client = bridge.client().await;
    assert_eq!(
        client.recv().await,
        json!({"type": "status", "connected": false, "agentName": "Tron", "userName": "Alan"})
    );

    let mut upstream = gateway.accept().await;
    let params = upstream.complete_handshake(Some("agent:main:main")).await;
    assert_eq!(params["minProtocol"], 3);
    assert_eq!(params["maxProtocol"], 3);
    assert_eq!(params["role"], "operator");
    assert_eq!(params["scopes"], json!(["operator.admin"]));
    assert_eq!(params["client"]["id"], "gateway-client");
    assert_eq!(params["auth"]["token"], "test-token");

    assert_eq!(
        client.recv().await,
        json!({"type": "status", "connected": true, "agentName": "Tron", "userName": "Alan"})
    );
    assert_eq!(
        client.recv().await,
        json!({"type": "hello", "sessionKey": "agent:main:main", "agentName": "Tron", "userName": "Alan"})
    );
}

#[tokio::test]
async fn test_late_client_gets_hello_on_connect() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let _upstream = gateway.accept_ready("main").await;

    // Wait until the bridge has processed the handshake.
    let mut early = bridge.client().await;
    early.recv_type("hello").await;

    let mut late = bridge.client().await;
    assert_eq!(late.recv().await["connected"], true);
    assert_eq!(late.recv().await["type"], "hello");
}

#[tokio::test]
async fn test_chat_streams_reassembled_reply() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;
    let mut watcher = bridge.client().await;
    watcher.recv_type("hello").await;

    client.send(json!({"type": "chat", "message": "  What's up?  "})).await;

    let request = upstream.next_request().await;
    assert_eq!(request.method, "chat.send");
    assert_eq!(request.params["message"], "What's up?");
    assert_eq!(request.params["sessionKey"], "main");
    assert_eq!(request.params["deliver"], false);
    let run_id = request.params["idempotencyKey"].as_str().unwrap().to_string();

    for c in [&mut client, &mut watcher] {
        assert_eq!(
            c.recv().await,
            json!({"type": "stream", "state": "start", "runId": run_id})
        );
    }
    upstream.reply(&request.id, json!({"runId": run_id})).await;

    for chunk in ["Hi", "Hi there", "Go", "Go!"] {
        upstream.chat_delta(&run_id, chunk).await;
    }
    upstream
        .event("chat", json!({"state": "final", "runId": run_id}))
        .await;

    for c in [&mut client, &mut watcher] {
        let mut texts = Vec::new();
        for _ in 0..4 {
            let msg = c.recv().await;
            assert_eq!(msg["state"], "delta");
            texts.push(msg["text"].as_str().unwrap().to_string());
        }
        assert_eq!(texts, vec!["Hi", "Hi there", "Hi thereGo", "Hi thereGo!"]);

        assert_eq!(
            c.recv().await,
            json!({"type": "stream", "state": "final", "text": "Hi thereGo!", "runId": run_id})
        );
    }
    assert_eq!(bridge.bridge.link().run_id(), None);
}

#[tokio::test]
async fn test_chat_while_disconnected_errors_only_to_sender() {
    let bridge = TestBridge::start(&dead_upstream_url().await).await;

    let mut sender = bridge.client().await;
    let mut other = bridge.client().await;
    assert_eq!(sender.recv().await["connected"], false);
    assert_eq!(other.recv().await["connected"], false);

    sender.send(json!({"type": "chat", "message": "hello?"})).await;

    assert_eq!(
        sender.recv().await,
        json!({"type": "error", "error": "Gateway not connected"})
    );
    other.expect_silence(Duration::from_millis(300)).await;
}

#[tokio::test]
async fn test_rejected_send_is_private() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut sender = bridge.client().await;
    sender.recv_type("hello").await;
    let mut other = bridge.client().await;
    other.recv_type("hello").await;

    sender.send(json!({"type": "chat", "message": "hi"})).await;
    let request = upstream.next_request().await;
    upstream.reject(&request.id, "session busy").await;

    assert_eq!(sender.recv().await["state"], "start");
    assert_eq!(
        sender.recv().await,
        json!({"type": "error", "error": "session busy"})
    );
    assert_eq!(other.recv().await["state"], "start");
    other.expect_silence(Duration::from_millis(300)).await;
    assert_eq!(bridge.bridge.link().run_id(), None);
}

#[tokio::test]
async fn test_upstream_loss_fails_pending_and_reconnects() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;

    client.send(json!({"type": "history"})).await;
    let request = upstream.next_request().await;
    assert_eq!(request.method, "chat.history");
    assert_eq!(request.params, json!({"sessionKey": "main", "limit": 100}));

    upstream.close().await;

    // The pending history call degrades to an empty list; the status change
    // is broadcast once. Their relative order is not fixed.
    let mut seen: Vec<Value> = vec![client.recv().await, client.recv().await];
    seen.sort_by_key(|v| v["type"].as_str().unwrap_or_default().to_string());
    assert_eq!(seen[0], json!({"type": "history", "messages": []}));
    assert_eq!(seen[1], json!({"type": "status", "connected": false}));

    // Next attempt comes after the reconnect delay.
    let started = tokio::time::Instant::now();
    let mut upstream = gateway.accept().await;
    assert!(started.elapsed() >= RECONNECT_DELAY / 2);

    upstream.complete_handshake(Some("main")).await;
    assert_eq!(client.recv().await["connected"], true);
    assert_eq!(client.recv().await["type"], "hello");
}

#[tokio::test]
async fn test_failed_handshake_is_retried() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;

    let mut upstream = gateway.accept().await;
    let request = upstream.next_request().await;
    upstream.reject(&request.id, "unauthorized").await;
    upstream.expect_closed().await;
    assert!(!bridge.bridge.link().is_ready());

    let _retry = gateway.accept_ready("main").await;
    let mut client = bridge.client().await;
    client.recv_type("hello").await;
}

#[tokio::test]
async fn test_history_round_trip() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;
    client.send(json!({"type": "history"})).await;

    let request = upstream.next_request().await;
    upstream
        .reply(
            &request.id,
            json!({"messages": [
                {"role": "user", "content": "ping", "timestamp": 1},
                {"role": "assistant", "content": [{"type": "text", "text": "<thinking>hm</thinking>pong"}], "timestamp": 2}
            ]}),
        )
        .await;

    assert_eq!(
        client.recv().await,
        json!({"type": "history", "messages": [
            {"role": "user", "text": "ping", "timestamp": 1},
            {"role": "assistant", "text": "pong", "timestamp": 2}
        ]})
    );
}

#[tokio::test]
async fn test_abort_forwards_active_run() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;

    client.send(json!({"type": "chat", "message": "long task"})).await;
    let send = upstream.next_request().await;
    let run_id = send.params["idempotencyKey"].clone();
    upstream.reply(&send.id, json!({})).await;
    client.recv_type("stream").await;

    client.send(json!({"type": "abort"})).await;
    let abort = upstream.next_request().await;
    assert_eq!(abort.method, "chat.abort");
    assert_eq!(abort.params, json!({"sessionKey": "main", "runId": run_id}));
    upstream.reply(&abort.id, json!({})).await;

    upstream
        .event("chat", json!({"state": "aborted", "runId": run_id}))
        .await;
    assert_eq!(
        client.recv().await,
        json!({"type": "stream", "state": "aborted", "runId": run_id})
    );
}

#[tokio::test]
async fn test_tool_notices_and_noise() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let mut upstream = gateway.accept_ready("main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;

    upstream.send_raw("{definitely not json").await;
    upstream.event("presence", json!({"online": true})).await;
    upstream
        .event(
            "agent",
            json!({"stream": "tool", "data": {"phase": "update", "name": "exec"}}),
        )
        .await;
    upstream
        .event(
            "agent",
            json!({"stream": "tool", "data": {"phase": "start", "name": "exec", "toolCallId": "call-1"}}),
        )
        .await;

    assert_eq!(
        client.recv().await,
        json!({"type": "tool", "phase": "start", "name": "exec", "toolCallId": "call-1"})
    );

    // Malformed client frames are dropped too.
    client.send_raw("garbage").await;
    client.send(json!({"type": "reboot"})).await;
    client.expect_silence(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_health_endpoint() {
    let mut gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;
    let _upstream = gateway.accept_ready("agent:main").await;

    let mut client = bridge.client().await;
    client.recv_type("hello").await;

    let health: Value = reqwest::get(bridge.health_url())
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        health,
        json!({
            "status": "ok",
            "clients": 1,
            "upstream": {"connected": true, "ready": true, "sessionKey": "agent:main"}
        })
    );
}

#[tokio::test]
async fn test_client_disconnect_unregisters() {
    let gateway = FakeGateway::start().await;
    let bridge = TestBridge::start(&gateway.url()).await;

    let mut client = bridge.client().await;
    client.recv().await;
    assert_eq!(bridge.bridge.hub().client_count(), 1);

    client.close().await;
    for _ in 0..50 {
        if bridge.bridge.hub().client_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("client was not unregistered");
}
