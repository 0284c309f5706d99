//! NDJSON codec and wire-frame model for ACP agent streams.
//!
//! The Agent Client Protocol is JSON-RPC 2.0 over newline-delimited JSON:
//! exactly one JSON object per `\n`-terminated line. [`AcpCodec`] wraps
//! [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or maliciously large message from a misbehaving agent
//! process cannot exhaust memory. [`WireMessage`] classifies each decoded
//! line into one of the three JSON-RPC frame shapes.

use bytes::BytesMut;
use serde_json::{json, Value};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use crate::{AppError, Result};

/// Maximum line length accepted by the ACP codec: 1 MiB.
///
/// Lines exceeding this limit on the inbound stream cause [`AcpCodec::decode`]
/// to return [`AppError::Protocol`] with `"line too long"` rather than
/// allocating unbounded memory for a single message.
pub const MAX_LINE_BYTES: usize = 1_048_576;

// ── Line framing ──────────────────────────────────────────────────────────────

/// NDJSON codec for bidirectional ACP agent streams.
///
/// Delegates line-framing to [`LinesCodec`] with a fixed [`MAX_LINE_BYTES`]
/// limit. Each newline-terminated UTF-8 string is one complete wire frame.
#[derive(Debug)]
pub struct AcpCodec(LinesCodec);

impl AcpCodec {
    /// Create a new `AcpCodec` with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new_with_max_length(MAX_LINE_BYTES))
    }
}

impl Default for AcpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for AcpCodec {
    type Item = String;
    type Error = AppError;

    /// Decode the next newline-terminated line from `src`.
    ///
    /// Returns `Ok(None)` when `src` contains no complete line yet (the
    /// child may write in arbitrary chunk boundaries; partial lines are
    /// buffered). Returns `Err(AppError::Protocol("line too long: …"))` when
    /// the line exceeds [`MAX_LINE_BYTES`].
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final line when the stream reaches EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

impl Encoder<String> for AcpCodec {
    type Error = AppError;

    /// Encode `item` as a `\n`-terminated NDJSON line into `dst`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] on underlying I/O failures.
    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        // LinesCodec::encode does not enforce a max line length;
        // the limit applies only to decoding.
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

/// Map a [`LinesCodecError`] to an [`AppError`].
fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol(format!("line too long: exceeded {MAX_LINE_BYTES} bytes"))
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}

// ── Wire frames ───────────────────────────────────────────────────────────────

/// JSON-RPC error object carried in a response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseError {
    /// JSON-RPC error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured error payload.
    pub data: Option<Value>,
}

/// One classified JSON-RPC frame.
///
/// Classification rules (ACP over NDJSON):
/// - has `method` **and** `id` → [`WireMessage::Request`]
/// - has `id`, no `method`     → [`WireMessage::Response`]
/// - has `method`, no `id`     → [`WireMessage::Notification`]
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// A request expecting exactly one matching response.
    Request {
        /// Caller-assigned correlation ID, unique among outstanding requests.
        id: u64,
        /// Method name (e.g. `session/prompt`).
        method: String,
        /// Method-specific payload.
        params: Value,
    },
    /// A response correlating to exactly one prior request by `id`.
    Response {
        /// Correlation ID of the originating request.
        id: u64,
        /// Successful result, when present.
        result: Option<Value>,
        /// Error object, when the request failed.
        error: Option<ResponseError>,
    },
    /// A fire-and-forget notification; zero or many may arrive per method.
    Notification {
        /// Method name (e.g. `session/update`).
        method: String,
        /// Method-specific payload.
        params: Value,
    },
}

impl WireMessage {
    /// Classify a single decoded line into a wire frame.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] when the line is not valid JSON, is not
    /// an object, or matches none of the three frame shapes. Malformed lines
    /// are a local, recoverable condition: the caller logs and skips them.
    pub fn parse(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

        let obj = value
            .as_object()
            .ok_or_else(|| AppError::Protocol("frame is not a JSON object".into()))?;

        let id = obj.get("id").and_then(Value::as_u64);
        let method = obj.get("method").and_then(Value::as_str);

        match (method, id) {
            (Some(method), Some(id)) => Ok(Self::Request {
                id,
                method: method.to_owned(),
                params: obj.get("params").cloned().unwrap_or(Value::Null),
            }),
            (Some(method), None) => Ok(Self::Notification {
                method: method.to_owned(),
                params: obj.get("params").cloned().unwrap_or(Value::Null),
            }),
            (None, Some(id)) => {
                let error = match obj.get("error") {
                    Some(Value::Object(err)) => Some(ResponseError {
                        code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                        message: err
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error")
                            .to_owned(),
                        data: err.get("data").cloned(),
                    }),
                    _ => None,
                };
                Ok(Self::Response {
                    id,
                    result: obj.get("result").cloned(),
                    error,
                })
            }
            (None, None) => Err(AppError::Protocol(
                "frame has neither `method` nor `id`".into(),
            )),
        }
    }

    /// Encode the frame as a single-line JSON string (no trailing newline).
    ///
    /// Every frame carries `"jsonrpc": "2.0"`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Protocol`] if serialization fails (should not
    /// occur for `Value` payloads).
    pub fn to_line(&self) -> Result<String> {
        let value = match self {
            Self::Request { id, method, params } => json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }),
            Self::Response { id, result, error } => match error {
                Some(err) => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "error": {
                        "code": err.code,
                        "message": err.message,
                        "data": err.data,
                    },
                }),
                None => json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": result.clone().unwrap_or(Value::Null),
                }),
            },
            Self::Notification { method, params } => json!({
                "jsonrpc": "2.0",
                "method": method,
                "params": params,
            }),
        };

        serde_json::to_string(&value)
            .map_err(|e| AppError::Protocol(format!("failed to serialise frame: {e}")))
    }
}
