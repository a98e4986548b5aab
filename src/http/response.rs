//! Responses written directly to a client socket.
//!
//! Used where no HTTP server connection exists yet: tunnel setup failures
//! and requests rejected while sniffing the head.

use axum::http::StatusCode;
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

/// Acknowledgment sent once a tunnel to the target is open.
pub const CONNECT_ESTABLISHED: &[u8] = b"HTTP/1.0 200 OK\r\n\r\n";

/// Formats a complete `text/plain` response that closes the connection.
pub fn plain_response(status: StatusCode, message: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        message.len(),
        message
    )
}

/// Writes a `text/plain` response and flushes it.
pub async fn write_plain_response<W>(
    writer: &mut W,
    status: StatusCode,
    message: &str,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(plain_response(status, message).as_bytes())
        .await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_status_line_and_length() {
        let response = plain_response(StatusCode::BAD_GATEWAY, "dial failed");
        assert!(response.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(response.contains("Content-Length: 11\r\n"));
        assert!(response.contains("Connection: close\r\n"));
        assert!(response.ends_with("\r\n\r\ndial failed"));
    }

    #[tokio::test]
    async fn writes_to_stream() {
        let mut out = Vec::new();
        write_plain_response(&mut out, StatusCode::BAD_REQUEST, "bad")
            .await
            .unwrap();
        assert!(out.starts_with(b"HTTP/1.1 400 Bad Request\r\n"));
    }
}
