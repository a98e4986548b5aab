//! Request head sniffing.
//!
//! The dispatcher needs the method and request target before deciding how
//! to serve a connection. The head is parsed from the read-ahead buffer and
//! left there, so the HTTP server or the tunnel can still consume it.

use axum::http::Method;
use tokio::io::{self, AsyncRead};

use crate::net::prebuffered::Prebuffered;

/// Largest request head accepted.
pub const MAX_HEAD_LEN: usize = 64 * 1024;

const MAX_HEADERS: usize = 100;

/// Error type for request head sniffing.
#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("Failed to read request head: {0}")]
    Io(#[from] io::Error),
    /// The client closed the connection before a full head arrived.
    #[error("Connection closed before request head was complete")]
    Closed,
    #[error("Request head exceeds {} bytes", MAX_HEAD_LEN)]
    TooLarge,
    #[error("Malformed request head: {0}")]
    Malformed(String),
}

/// Method and request target of a buffered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: Method,
    pub target: String,
    /// Length of the head, including the terminating blank line.
    pub len: usize,
}

impl RequestHead {
    pub fn is_connect(&self) -> bool {
        self.method == Method::CONNECT
    }
}

/// Parses a request head from `buf`. Returns `None` when incomplete.
pub fn parse(buf: &[u8]) -> Result<Option<RequestHead>, HeadError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Partial) => return Ok(None),
        Ok(httparse::Status::Complete(len)) => len,
        Err(e) => return Err(HeadError::Malformed(e.to_string())),
    };

    let method = req
        .method
        .ok_or_else(|| HeadError::Malformed("missing method".into()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|e| HeadError::Malformed(e.to_string()))?;
    let target = req
        .path
        .ok_or_else(|| HeadError::Malformed("missing request target".into()))?;

    Ok(Some(RequestHead {
        method,
        target: target.to_string(),
        len,
    }))
}

/// Buffers until a full request head is available and parses it.
///
/// The head stays in `reader`'s buffer.
pub async fn peek<S>(reader: &mut Prebuffered<S>) -> Result<RequestHead, HeadError>
where
    S: AsyncRead + Unpin,
{
    loop {
        if let Some(head) = parse(reader.buffer())? {
            return Ok(head);
        }
        if reader.is_full() {
            return Err(HeadError::TooLarge);
        }
        if reader.buffer_more().await? == 0 {
            return Err(HeadError::Closed);
        }
    }
}
