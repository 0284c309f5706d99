//! Unit tests for JSON-RPC wire-frame classification and serialization.
//!
//! Covers:
//! - `method` + `id` classifies as a request
//! - `id` without `method` classifies as a response (result and error forms)
//! - `method` without `id` classifies as a notification
//! - frames with neither field, non-objects, and malformed JSON are errors
//! - every emitted frame carries `"jsonrpc": "2.0"`

use serde_json::{json, Value};

use agent_conductor::acp::codec::{ResponseError, WireMessage};
use agent_conductor::AppError;

// ── Classification ───────────────────────────────────────────────────────────

/// A frame with both `method` and `id` is an inbound request.
#[test]
fn method_and_id_classifies_as_request() {
    let frame = WireMessage::parse(
        r#"{"jsonrpc":"2.0","id":5,"method":"session/request_permission","params":{"tool":"fs"}}"#,
    )
    .expect("valid request frame must parse");

    assert_eq!(
        frame,
        WireMessage::Request {
            id: 5,
            method: "session/request_permission".to_owned(),
            params: json!({"tool": "fs"}),
        }
    );
}

/// A frame with `id` and `result` but no `method` is a successful response.
#[test]
fn id_without_method_classifies_as_response() {
    let frame = WireMessage::parse(r#"{"jsonrpc":"2.0","id":3,"result":{"sessionId":"s-1"}}"#)
        .expect("valid response frame must parse");

    assert_eq!(
        frame,
        WireMessage::Response {
            id: 3,
            result: Some(json!({"sessionId": "s-1"})),
            error: None,
        }
    );
}

/// A response carrying a JSON-RPC error object surfaces code, message, and
/// data.
#[test]
fn error_response_carries_the_error_object() {
    let frame = WireMessage::parse(
        r#"{"jsonrpc":"2.0","id":9,"error":{"code":-32000,"message":"boom","data":{"k":1}}}"#,
    )
    .expect("error response frame must parse");

    assert_eq!(
        frame,
        WireMessage::Response {
            id: 9,
            result: None,
            error: Some(ResponseError {
                code: -32000,
                message: "boom".to_owned(),
                data: Some(json!({"k": 1})),
            }),
        }
    );
}

/// A frame with `method` but no `id` is a notification.
#[test]
fn method_without_id_classifies_as_notification() {
    let frame = WireMessage::parse(
        r#"{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"s-1"}}"#,
    )
    .expect("valid notification frame must parse");

    assert_eq!(
        frame,
        WireMessage::Notification {
            method: "session/update".to_owned(),
            params: json!({"sessionId": "s-1"}),
        }
    );
}

/// Absent `params` defaults to `null` rather than failing classification.
#[test]
fn missing_params_defaults_to_null() {
    let frame = WireMessage::parse(r#"{"jsonrpc":"2.0","method":"ping"}"#)
        .expect("notification without params must parse");

    assert_eq!(
        frame,
        WireMessage::Notification {
            method: "ping".to_owned(),
            params: Value::Null,
        }
    );
}

// ── Rejection ────────────────────────────────────────────────────────────────

/// A frame with neither `method` nor `id` matches no shape and is rejected.
#[test]
fn frame_without_method_or_id_is_rejected() {
    let err = WireMessage::parse(r#"{"jsonrpc":"2.0","params":{}}"#)
        .expect_err("shapeless frame must be rejected");
    assert!(matches!(err, AppError::Protocol(_)));
}

/// Malformed JSON is a `Protocol` error, not a panic.
#[test]
fn malformed_json_is_a_protocol_error() {
    let err = WireMessage::parse("{not json").expect_err("malformed JSON must be rejected");
    match err {
        AppError::Protocol(msg) => {
            assert!(msg.contains("malformed json"), "message must say why: {msg}");
        }
        other => panic!("expected Protocol error, got {other:?}"),
    }
}

/// A JSON value that is not an object cannot be a frame.
#[test]
fn non_object_frame_is_rejected() {
    let err = WireMessage::parse("[1,2,3]").expect_err("array frame must be rejected");
    assert!(matches!(err, AppError::Protocol(_)));
}

// ── Serialization ────────────────────────────────────────────────────────────

/// Every serialized frame carries the `jsonrpc` version marker.
#[test]
fn serialized_frames_carry_the_jsonrpc_marker() {
    let frames = [
        WireMessage::Request {
            id: 1,
            method: "initialize".to_owned(),
            params: json!({}),
        },
        WireMessage::Response {
            id: 2,
            result: Some(json!({"ok": true})),
            error: None,
        },
        WireMessage::Notification {
            method: "session/update".to_owned(),
            params: json!({}),
        },
    ];

    for frame in frames {
        let line = frame.to_line().expect("frame must serialize");
        let value: Value = serde_json::from_str(&line).expect("output must be valid JSON");
        assert_eq!(
            value.get("jsonrpc"),
            Some(&json!("2.0")),
            "frame missing jsonrpc marker: {line}"
        );
        assert!(!line.contains('\n'), "frame must be a single line: {line}");
    }
}

/// A serialized error response nests the error object and omits `result`.
#[test]
fn serialized_error_response_nests_the_error_object() {
    let line = WireMessage::Response {
        id: 4,
        result: None,
        error: Some(ResponseError {
            code: -32601,
            message: "method not found: x".to_owned(),
            data: None,
        }),
    }
    .to_line()
    .expect("error response must serialize");

    let value: Value = serde_json::from_str(&line).expect("output must be valid JSON");
    assert_eq!(value["error"]["code"], json!(-32601));
    assert!(value.get("result").is_none(), "error form must omit result");
}

/// A frame survives a serialize-then-classify round trip unchanged.
#[test]
fn request_round_trips_through_the_wire_form() {
    let original = WireMessage::Request {
        id: 42,
        method: "session/prompt".to_owned(),
        params: json!({"sessionId": "s-1", "prompt": "build it"}),
    };

    let line = original.to_line().expect("frame must serialize");
    let parsed = WireMessage::parse(&line).expect("serialized frame must reparse");
    assert_eq!(parsed, original);
}
