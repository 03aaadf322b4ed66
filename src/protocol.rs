//! JSON wire protocol: request/response types, framing and codec.
//!
//! One request and one response travel over each connection:
//! - Request:  `{"action": "<name>", "params": {...}}`
//! - Response: `{"status": "ok"|"error", "message": "...", ...payload}`
//!
//! Two framings are supported:
//! - `json`: the message ends once the buffer holds one complete JSON value,
//!   or when the peer half-closes the connection.
//! - `length-prefixed`: a 4-byte big-endian length followed by the payload.

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::ops::Range;
use thiserror::Error;

/// Size of the length header used by [`Framing::LengthPrefixed`].
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// A parsed client request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Selects the behaviour in the executor.
    pub action: String,
    /// Loosely typed arguments, interpreted only by the executor.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Map<String, Value>,
}

impl Command {
    /// Create a command with no parameters.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Map::new(),
        }
    }

    /// Builder-style parameter insertion.
    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome discriminator carried in every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// The structured outcome of one command.
///
/// Domain payloads (for example the `objects` list) are flattened into the
/// top-level JSON object next to `status` and `message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Response {
    /// Success with a human-readable message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: Status::Ok,
            message: Some(message.into()),
            payload: Map::new(),
        }
    }

    /// Success carrying a single payload field and no message.
    pub fn ok_with(field: &str, value: impl Into<Value>) -> Self {
        let mut payload = Map::new();
        payload.insert(field.to_string(), value.into());
        Self {
            status: Status::Ok,
            message: None,
            payload,
        }
    }

    /// Failure with a human-readable message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            message: Some(message.into()),
            payload: Map::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// How message boundaries are found on the byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Framing {
    /// Self-delimiting JSON value, or everything up to the peer's half-close.
    #[default]
    Json,
    /// 4-byte big-endian length header followed by the payload.
    LengthPrefixed,
}

/// Result of looking for one complete message in a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameStatus {
    /// A full message occupies this byte range of the buffer.
    Complete(Range<usize>),
    /// More bytes are needed.
    Incomplete,
    /// The message cannot fit in the configured limit.
    TooLarge,
}

/// Errors from decoding a request or response payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty request")]
    Empty,
    #[error("malformed request: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty response")]
    EmptyResponse,
    #[error("malformed response: {0}")]
    MalformedResponse(#[source] serde_json::Error),
}

/// Look for one complete message at the start of `buf`.
///
/// `limit` bounds the payload size; for `json` framing it bounds the whole
/// buffer.
pub fn frame(buf: &[u8], framing: Framing, limit: usize) -> FrameStatus {
    match framing {
        Framing::Json => frame_json(buf, limit),
        Framing::LengthPrefixed => frame_length_prefixed(buf, limit),
    }
}

fn frame_json(buf: &[u8], limit: usize) -> FrameStatus {
    if buf.len() > limit {
        return FrameStatus::TooLarge;
    }

    let mut values = serde_json::Deserializer::from_slice(buf).into_iter::<serde::de::IgnoredAny>();
    match values.next() {
        Some(Ok(_)) => FrameStatus::Complete(0..values.byte_offset()),
        // Truncated value: wait for more bytes or the peer's half-close
        Some(Err(e)) if e.is_eof() => FrameStatus::Incomplete,
        // Cut off inside a token, e.g. after `1.`, `-` or `1e`
        Some(Err(e)) if error_at_end(&e, buf) => FrameStatus::Incomplete,
        // Garbage will never become valid; hand it to decode() for the error
        Some(Err(_)) => FrameStatus::Complete(0..buf.len()),
        None => FrameStatus::Incomplete,
    }
}

/// Whether a syntax error was raised at the very end of `buf`, where more
/// bytes could still turn the input into valid JSON.
fn error_at_end(e: &serde_json::Error, buf: &[u8]) -> bool {
    if !e.is_syntax() {
        return false;
    }
    // serde_json reports 1-based lines and 0-based byte columns
    let start_of_line = buf
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);
    let lines = 1 + buf.iter().filter(|&&b| b == b'\n').count();
    e.line() == lines && e.column() == buf.len() - start_of_line
}

fn frame_length_prefixed(buf: &[u8], limit: usize) -> FrameStatus {
    let Some(header) = buf.get(..LENGTH_PREFIX_BYTES) else {
        return FrameStatus::Incomplete;
    };
    let mut len_bytes = [0u8; LENGTH_PREFIX_BYTES];
    len_bytes.copy_from_slice(header);
    let len = u32::from_be_bytes(len_bytes) as usize;

    if len > limit {
        return FrameStatus::TooLarge;
    }

    let end = LENGTH_PREFIX_BYTES + len;
    if buf.len() < end {
        FrameStatus::Incomplete
    } else {
        FrameStatus::Complete(LENGTH_PREFIX_BYTES..end)
    }
}

/// Decode a request payload (framing already stripped).
pub fn decode(payload: &[u8]) -> Result<Command, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Encode a response, including the framing header if any.
pub fn encode(response: &Response, framing: Framing) -> BytesMut {
    let body = match serde_json::to_vec(response) {
        Ok(body) => body,
        // Only reachable with non-string map keys, which `Map` rules out
        Err(e) => fallback_error(&e),
    };
    with_framing(&body, framing)
}

/// Encode a request for sending from the client side.
pub fn encode_command(command: &Command, framing: Framing) -> Result<BytesMut, serde_json::Error> {
    let body = serde_json::to_vec(command)?;
    Ok(with_framing(&body, framing))
}

/// Decode a response payload on the client side.
pub fn decode_response(payload: &[u8]) -> Result<Response, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::EmptyResponse);
    }
    serde_json::from_slice(payload).map_err(DecodeError::MalformedResponse)
}

fn with_framing(body: &[u8], framing: Framing) -> BytesMut {
    match framing {
        Framing::Json => BytesMut::from(body),
        Framing::LengthPrefixed => {
            let mut out = BytesMut::with_capacity(LENGTH_PREFIX_BYTES + body.len());
            out.put_u32(body.len() as u32);
            out.extend_from_slice(body);
            out
        }
    }
}

fn fallback_error(e: &serde_json::Error) -> Vec<u8> {
    let message = Value::String(format!("failed to encode response: {e}"));
    format!("{{\"status\":\"error\",\"message\":{message}}}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_command() {
        let cmd = decode(br#"{"action":"add_cube","params":{"size":2}}"#).unwrap();
        assert_eq!(cmd.action, "add_cube");
        assert_eq!(cmd.params.get("size"), Some(&json!(2)));
    }

    #[test]
    fn test_decode_missing_or_null_params() {
        let cmd = decode(br#"{"action":"list_objects"}"#).unwrap();
        assert!(cmd.params.is_empty());

        let cmd = decode(br#"{"action":"list_objects","params":null}"#).unwrap();
        assert!(cmd.params.is_empty());
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(b""), Err(DecodeError::Empty)));
        assert!(matches!(decode(b"  \n"), Err(DecodeError::Empty)));
        assert!(matches!(
            decode(br#"{"action":"add_cu"#),
            Err(DecodeError::Json(_))
        ));
        assert!(matches!(decode(br#"{"params":{}}"#), Err(DecodeError::Json(_))));
        assert!(matches!(decode(b"[1,2,3]"), Err(DecodeError::Json(_))));
        assert!(matches!(decode(&[0xff, 0xfe, 0x00]), Err(DecodeError::Json(_))));

        let err = decode(b"{").unwrap_err();
        assert!(err.to_string().starts_with("malformed request: "));
    }

    #[test]
    fn test_command_round_trip() {
        let cmd = Command::new("move_object")
            .with_param("object_name", "Cube")
            .with_param("location", json!([1.0, 2.0, 3.0]));

        let bytes = encode_command(&cmd, Framing::Json).unwrap();
        assert_eq!(decode(&bytes).unwrap(), cmd);

        let bytes = encode_command(&cmd, Framing::LengthPrefixed).unwrap();
        match frame(&bytes, Framing::LengthPrefixed, 1024) {
            FrameStatus::Complete(range) => assert_eq!(decode(&bytes[range]).unwrap(), cmd),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_encode_response_shapes() {
        let bytes = encode(&Response::ok("Cube added"), Framing::Json);
        assert_eq!(&bytes[..], br#"{"status":"ok","message":"Cube added"}"#);

        let bytes = encode(&Response::error("Object not found"), Framing::Json);
        assert_eq!(&bytes[..], br#"{"status":"error","message":"Object not found"}"#);

        let list = Response::ok_with("objects", json!([{"name": "Cube"}]));
        let value: Value = serde_json::from_slice(&encode(&list, Framing::Json)).unwrap();
        assert_eq!(value, json!({"status": "ok", "objects": [{"name": "Cube"}]}));
    }

    #[test]
    fn test_response_round_trip_keeps_payload() {
        let response = Response::ok_with("objects", json!([{"name": "Cube", "type": "MESH"}]));
        let bytes = encode(&response, Framing::Json);
        assert_eq!(decode_response(&bytes).unwrap(), response);
    }

    #[test]
    fn test_frame_json() {
        let limit = 1024;
        assert_eq!(frame(b"", Framing::Json, limit), FrameStatus::Incomplete);
        assert_eq!(frame(b"   ", Framing::Json, limit), FrameStatus::Incomplete);
        assert_eq!(
            frame(br#"{"action":"add"#, Framing::Json, limit),
            FrameStatus::Incomplete
        );

        let msg = br#"{"action":"add_cube"}"#;
        assert_eq!(
            frame(msg, Framing::Json, limit),
            FrameStatus::Complete(0..msg.len())
        );

        // Trailing bytes after the first value are not part of the frame
        let mut with_newline = msg.to_vec();
        with_newline.push(b'\n');
        assert_eq!(
            frame(&with_newline, Framing::Json, limit),
            FrameStatus::Complete(0..msg.len())
        );

        assert_eq!(
            frame(b"not json", Framing::Json, limit),
            FrameStatus::Complete(0..8)
        );
        assert_eq!(frame(msg, Framing::Json, 4), FrameStatus::TooLarge);
    }

    #[test]
    fn test_frame_json_split_inside_number() {
        let limit = 1024;
        for partial in [
            &br#"{"action":"add_cube","params":{"size":1."#[..],
            br#"{"action":"add_cube","params":{"size":-"#,
            br#"{"action":"add_cube","params":{"size":1e"#,
            br#"{"action":"add_cube","params":{"size":1e+"#,
            br#"{"action":"move_object","params":{"location":[-"#,
            b"{\"action\":\"add_cube\",\n\"params\":{\"size\":2.",
        ] {
            assert_eq!(
                frame(partial, Framing::Json, limit),
                FrameStatus::Incomplete,
                "{}",
                String::from_utf8_lossy(partial)
            );
        }

        // Invalid bytes before the end are still reported straight away
        let bad = br#"{"action":"add_cube","params":{"size":1.x}}"#;
        assert_eq!(
            frame(bad, Framing::Json, limit),
            FrameStatus::Complete(0..bad.len())
        );
    }

    #[test]
    fn test_decode_response_errors() {
        assert!(matches!(decode_response(b""), Err(DecodeError::EmptyResponse)));

        let err = decode_response(br#"{"status":"#).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedResponse(_)));
        assert!(err.to_string().starts_with("malformed response: "));
    }

    #[test]
    fn test_frame_length_prefixed() {
        let limit = 16;
        assert_eq!(
            frame(&[0, 0], Framing::LengthPrefixed, limit),
            FrameStatus::Incomplete
        );
        assert_eq!(
            frame(&[0, 0, 0, 3, b'{'], Framing::LengthPrefixed, limit),
            FrameStatus::Incomplete
        );
        assert_eq!(
            frame(&[0, 0, 0, 2, b'{', b'}', b'x'], Framing::LengthPrefixed, limit),
            FrameStatus::Complete(4..6)
        );
        assert_eq!(
            frame(&[0, 0, 1, 0], Framing::LengthPrefixed, limit),
            FrameStatus::TooLarge
        );
    }

    #[test]
    fn test_length_prefixed_response_header() {
        let bytes = encode(&Response::ok("x"), Framing::LengthPrefixed);
        let body_len = bytes.len() - LENGTH_PREFIX_BYTES;
        assert_eq!(&bytes[..4], &(body_len as u32).to_be_bytes());
    }
}
