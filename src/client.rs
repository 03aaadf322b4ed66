//! One-shot client: send a single command, read the single response.

use crate::protocol::{self, Command, DecodeError, FrameStatus, Framing, Response};
use std::io;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest response the client accepts
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("server closed the connection mid-response")]
    Truncated,
}

/// Send `command` to `addr` and wait for the response.
pub async fn send(
    addr: &str,
    command: &Command,
    framing: Framing,
    timeout: Duration,
) -> Result<Response, ClientError> {
    tokio::time::timeout(timeout, exchange(addr, command, framing))
        .await
        .map_err(|_| ClientError::Timeout(timeout))?
}

async fn exchange(addr: &str, command: &Command, framing: Framing) -> Result<Response, ClientError> {
    let request = protocol::encode_command(command, framing)?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|source| ClientError::Connect {
            addr: addr.to_string(),
            source,
        })?;

    stream.write_all(&request).await?;
    // Half-close marks the end of the request for servers that read to EOF
    stream.shutdown().await?;

    let mut reply = Vec::new();
    (&mut stream)
        .take(MAX_RESPONSE_BYTES as u64 + protocol::LENGTH_PREFIX_BYTES as u64)
        .read_to_end(&mut reply)
        .await?;

    match framing {
        Framing::Json => Ok(protocol::decode_response(&reply)?),
        Framing::LengthPrefixed => match protocol::frame(&reply, framing, MAX_RESPONSE_BYTES) {
            FrameStatus::Complete(range) => Ok(protocol::decode_response(&reply[range])?),
            FrameStatus::Incomplete | FrameStatus::TooLarge => Err(ClientError::Truncated),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_send_reads_reply_after_half_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            stream
                .write_all(br#"{"status":"ok","message":"hi"}"#)
                .await
                .unwrap();
            request
        });

        let response = send(&addr, &Command::new("hello"), Framing::Json, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response, Response::ok("hi"));
        assert_eq!(server.await.unwrap(), br#"{"action":"hello","params":{}}"#);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Bind then drop to get a port with nothing listening
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };
        let err = send(&addr, &Command::new("x"), Framing::Json, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_truncated_length_prefixed_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            stream.write_all(&[0, 0, 0, 40, b'{']).await.unwrap();
        });

        let err = send(&addr, &Command::new("x"), Framing::LengthPrefixed, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Truncated));
    }

    #[tokio::test]
    async fn test_garbled_reply_is_reported_as_response_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.unwrap();
            stream.write_all(b"<html>").await.unwrap();
        });

        let err = send(&addr, &Command::new("x"), Framing::Json, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Decode(DecodeError::MalformedResponse(_))));
        assert!(err.to_string().starts_with("malformed response: "));
    }
}
