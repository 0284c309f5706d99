//! Integration tests for the ACP transport client over in-memory streams.
//!
//! Covers:
//! - request/response correlation and error-object mapping
//! - timeout rejection with the pending entry removed
//! - late and unknown-id responses being dropped harmlessly
//! - exactly-once settlement per request id
//! - notification fan-out and drop-based unsubscription
//! - the permission round trip, including the fail-closed default
//! - disconnect rejecting every outstanding request

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;

use agent_conductor::acp::client::{PermissionDecision, PermissionRequest};

use super::test_helpers::{connect, request_id, wait_until};

// ── Correlation ──────────────────────────────────────────────────────────────

/// A request settles with the result of the response carrying its id.
#[tokio::test]
async fn request_settles_with_its_matching_response() {
    let (client, mut fake) = connect();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("initialize", json!({"probe": true}), Duration::from_secs(2))
                .await
        }
    });

    let frame = fake.read_frame().await;
    assert_eq!(frame["jsonrpc"], json!("2.0"));
    assert_eq!(frame["method"], json!("initialize"));
    assert_eq!(frame["params"]["probe"], json!(true));

    fake.respond_ok(request_id(&frame), json!({"protocolVersion": 1}))
        .await;

    let result = request
        .await
        .expect("request task must not panic")
        .expect("request must settle successfully");
    assert_eq!(result["protocolVersion"], json!(1));
    assert_eq!(client.pending_requests(), 0);
}

/// Two in-flight requests settle independently even when the responses
/// arrive out of order.
#[tokio::test]
async fn interleaved_responses_settle_the_right_requests() {
    let (client, mut fake) = connect();

    let first = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/new", json!({"n": 1}), Duration::from_secs(2))
                .await
        }
    });
    let frame_one = fake.read_frame().await;

    let second = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/new", json!({"n": 2}), Duration::from_secs(2))
                .await
        }
    });
    let frame_two = fake.read_frame().await;

    // Answer in reverse order.
    fake.respond_ok(request_id(&frame_two), json!({"n": 2})).await;
    fake.respond_ok(request_id(&frame_one), json!({"n": 1})).await;

    let result_one = first.await.expect("task").expect("first must settle");
    let result_two = second.await.expect("task").expect("second must settle");
    assert_eq!(result_one["n"], json!(1));
    assert_eq!(result_two["n"], json!(2));
}

/// A JSON-RPC error object rejects the request with a protocol error
/// carrying the agent's code and message.
#[tokio::test]
async fn error_response_rejects_the_request() {
    let (client, mut fake) = connect();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/new", json!({}), Duration::from_secs(2))
                .await
        }
    });

    let frame = fake.read_frame().await;
    fake.respond_err(request_id(&frame), -32000, "agent exploded")
        .await;

    let err = request
        .await
        .expect("request task must not panic")
        .expect_err("error response must reject the request");
    assert_eq!(err.code(), "PROTOCOL_ERROR");
    assert!(err.to_string().contains("agent exploded"));
    assert!(err.to_string().contains("-32000"));
}

// ── Timeouts ─────────────────────────────────────────────────────────────────

/// A request with no response rejects at its deadline, not before and not
/// much after, and its pending entry is removed.
#[tokio::test]
async fn unanswered_request_times_out_and_clears_its_entry() {
    let (client, mut fake) = connect();

    let started = Instant::now();
    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/prompt", json!({}), Duration::from_millis(50))
                .await
        }
    });

    // Consume the frame but never answer it.
    let frame = fake.read_frame().await;

    let err = request
        .await
        .expect("request task must not panic")
        .expect_err("an unanswered request must time out");
    let elapsed = started.elapsed();

    assert_eq!(err.code(), "AGENT_TIMEOUT");
    assert!(err.is_retryable(), "timeouts must be retryable");
    assert!(
        elapsed >= Duration::from_millis(45),
        "rejected too early: {elapsed:?}"
    );
    assert!(
        elapsed < Duration::from_secs(1),
        "rejected too late: {elapsed:?}"
    );
    assert_eq!(client.pending_requests(), 0, "the entry must be removed");

    // A late response for the timed-out id is dropped without disturbing
    // later traffic.
    fake.respond_ok(request_id(&frame), json!({"late": true})).await;

    let follow_up = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/new", json!({}), Duration::from_secs(2))
                .await
        }
    });
    let next = fake.read_frame().await;
    fake.respond_ok(request_id(&next), json!({"ok": true})).await;
    let result = follow_up.await.expect("task").expect("follow-up must settle");
    assert_eq!(result["ok"], json!(true));
}

/// A response whose id matches no pending request is silently dropped.
#[tokio::test]
async fn unknown_id_responses_are_dropped() {
    let (client, mut fake) = connect();

    fake.respond_ok(999, json!({"stray": true})).await;

    // The client is still healthy afterwards.
    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("initialize", json!({}), Duration::from_secs(2))
                .await
        }
    });
    let frame = fake.read_frame().await;
    fake.respond_ok(request_id(&frame), json!({})).await;
    request
        .await
        .expect("request task must not panic")
        .expect("request must settle");
    assert_eq!(client.pending_requests(), 0);
}

/// Duplicate responses for one id settle the request exactly once.
#[tokio::test]
async fn duplicate_responses_settle_exactly_once() {
    let (client, mut fake) = connect();

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/new", json!({}), Duration::from_secs(2))
                .await
        }
    });

    let frame = fake.read_frame().await;
    let id = request_id(&frame);
    fake.respond_ok(id, json!({"first": true})).await;
    fake.respond_ok(id, json!({"second": true})).await;

    let result = request
        .await
        .expect("request task must not panic")
        .expect("request must settle");
    assert_eq!(result["first"], json!(true), "the first response wins");
    assert_eq!(client.pending_requests(), 0);
}

// ── Notifications ────────────────────────────────────────────────────────────

/// Every handler registered for a method fires; dropping one subscription
/// removes only that registration.
#[tokio::test]
async fn notification_fan_out_and_unsubscription() {
    let (client, mut fake) = connect();

    let first_count = Arc::new(AtomicUsize::new(0));
    let second_count = Arc::new(AtomicUsize::new(0));

    let first_sub = client.on_notification("session/update", {
        let count = Arc::clone(&first_count);
        move |_params| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    });
    let second_sub = client.on_notification("session/update", {
        let count = Arc::clone(&second_count);
        move |_params| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    });

    fake.notify("session/update", json!({"sessionId": "s-1"})).await;
    wait_until("both handlers fire", || {
        first_count.load(Ordering::SeqCst) == 1 && second_count.load(Ordering::SeqCst) == 1
    })
    .await;

    drop(second_sub);

    fake.notify("session/update", json!({"sessionId": "s-1"})).await;
    wait_until("the surviving handler fires again", || {
        first_count.load(Ordering::SeqCst) == 2
    })
    .await;
    assert_eq!(
        second_count.load(Ordering::SeqCst),
        1,
        "the dropped subscription must not fire again"
    );

    drop(first_sub);
}

/// A notification for a method with no subscribers is a no-op.
#[tokio::test]
async fn unsubscribed_notifications_are_ignored() {
    let (client, mut fake) = connect();

    fake.notify("agent/heartbeat", json!({})).await;

    // The client stays healthy.
    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("initialize", json!({}), Duration::from_secs(2))
                .await
        }
    });
    let frame = fake.read_frame().await;
    fake.respond_ok(request_id(&frame), json!({})).await;
    request
        .await
        .expect("request task must not panic")
        .expect("request must settle");
}

// ── Permissions ──────────────────────────────────────────────────────────────

/// With a handler installed, an inbound permission request is answered on
/// the same id with the handler's decision.
#[tokio::test]
async fn permission_requests_are_answered_by_the_handler() {
    let (client, mut fake) = connect();

    let seen_session = Arc::new(std::sync::Mutex::new(None::<String>));
    client.set_permission_handler({
        let seen = Arc::clone(&seen_session);
        move |request: PermissionRequest| {
            *seen.lock().expect("seen lock") = request.session_id.clone();
            PermissionDecision {
                approved: true,
                reason: Some("test policy".into()),
            }
        }
    });

    fake.write_frame(&json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "session/request_permission",
        "params": {"sessionId": "s-1", "tool": "fs/write"},
    }))
    .await;

    let response = fake.read_frame().await;
    assert_eq!(response["id"], json!(7));
    assert_eq!(response["result"]["approved"], json!(true));
    assert_eq!(response["result"]["reason"], json!("test policy"));
    assert_eq!(
        seen_session.lock().expect("seen lock").as_deref(),
        Some("s-1"),
        "the handler must see the session id"
    );
}

/// Without a handler, permission requests are denied with a reason.
#[tokio::test]
async fn permission_requests_fail_closed_without_a_handler() {
    let (_client, mut fake) = connect();

    fake.write_frame(&json!({
        "jsonrpc": "2.0",
        "id": 8,
        "method": "session/request_permission",
        "params": {"tool": "fs/write"},
    }))
    .await;

    let response = fake.read_frame().await;
    assert_eq!(response["id"], json!(8));
    assert_eq!(response["result"]["approved"], json!(false));
    assert_eq!(
        response["result"]["reason"],
        json!("no permission handler configured")
    );
}

/// An inbound request for any other method is answered with a
/// method-not-found error on the same id.
#[tokio::test]
async fn unsupported_inbound_requests_get_a_method_not_found_error() {
    let (_client, mut fake) = connect();

    fake.write_frame(&json!({
        "jsonrpc": "2.0",
        "id": 9,
        "method": "agent/elevate",
        "params": {},
    }))
    .await;

    let response = fake.read_frame().await;
    assert_eq!(response["id"], json!(9));
    assert_eq!(response["error"]["code"], json!(-32601));
}

// ── Disconnect ───────────────────────────────────────────────────────────────

/// Closing the agent stream rejects every outstanding request and fires the
/// disconnect handlers.
#[tokio::test]
async fn disconnect_rejects_outstanding_requests() {
    let (client, mut fake) = connect();

    let disconnected = Arc::new(AtomicBool::new(false));
    let _sub = client.on_disconnect({
        let flag = Arc::clone(&disconnected);
        move |_reason| {
            flag.store(true, Ordering::SeqCst);
        }
    });

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("session/prompt", json!({}), Duration::from_secs(10))
                .await
        }
    });

    // Wait for the request to be in flight, then hang up.
    let _frame = fake.read_frame().await;
    drop(fake);

    let err = request
        .await
        .expect("request task must not panic")
        .expect_err("disconnect must reject the pending request");
    assert_eq!(err.code(), "NETWORK_ERROR");
    assert!(
        err.to_string().contains("agent disconnected"),
        "unexpected message: {err}"
    );
    assert!(err.is_retryable(), "connection loss must be retryable");

    wait_until("the disconnect handler fires", || {
        disconnected.load(Ordering::SeqCst)
    })
    .await;
    assert_eq!(client.pending_requests(), 0);
}

/// Malformed inbound lines are skipped without killing the stream.
#[tokio::test]
async fn malformed_lines_do_not_kill_the_stream() {
    let (client, mut fake) = connect();

    fake.write_frame(&json!("not an object")).await;

    let request = tokio::spawn({
        let client = client.clone();
        async move {
            client
                .send_request("initialize", json!({}), Duration::from_secs(2))
                .await
        }
    });
    let frame = fake.read_frame().await;
    fake.respond_ok(request_id(&frame), json!({})).await;
    request
        .await
        .expect("request task must not panic")
        .expect("the stream must survive a malformed line");
}
