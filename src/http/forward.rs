//! Plain HTTP forwarding.
//!
//! # Responsibilities
//! - Rewrite the client request for the upstream leg
//! - Send it with a client whose dial timeout matches CONNECT tunnels
//! - Run the response body through the stream pipeline
//! - Adjust the headers the pipeline invalidated
//!
//! # Design Decisions
//! - Response bodies are streamed, never buffered whole
//! - Dropping the response body releases every pipeline stage and the
//!   upstream body, whether or not the copy to the client completed

use std::io;

use axum::{
    body::Body,
    http::{
        header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, HOST},
        HeaderValue, Request, Response, StatusCode, Uri,
    },
    response::IntoResponse,
};
use futures_util::TryStreamExt;
use hyper::body::Body as _;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::config::ProxyConfig;
use crate::net::connection::ConnectionId;
use crate::stream::{PipelineOptions, StreamPipeline};

const KEEP_ALIVE: &str = "keep-alive";

/// Error type for request rewriting.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error("Request target has no host")]
    MissingHost,
    #[error("Scheme {0:?} cannot be forwarded, use CONNECT")]
    UnsupportedScheme(String),
    #[error("Invalid request target: {0}")]
    InvalidTarget(#[from] axum::http::Error),
}

/// Prepare a client request for the upstream leg.
///
/// The target becomes an absolute `http` URI (origin-form targets are
/// completed from `Host`). `Keep-Alive` and `Connection` are removed and
/// `Connection: close` is set.
pub fn rewrite_request(mut req: Request<Body>) -> Result<Request<Body>, RewriteError> {
    match req.uri().scheme_str() {
        Some("http") => {}
        Some(other) => return Err(RewriteError::UnsupportedScheme(other.to_string())),
        None => {
            let host = req
                .headers()
                .get(HOST)
                .and_then(|value| value.to_str().ok())
                .filter(|host| !host.is_empty())
                .ok_or(RewriteError::MissingHost)?;
            let path = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let uri = Uri::builder()
                .scheme("http")
                .authority(host)
                .path_and_query(path)
                .build()?;
            *req.uri_mut() = uri;
        }
    }

    let headers = req.headers_mut();
    headers.remove(KEEP_ALIVE);
    headers.remove(CONNECTION);
    headers.insert(CONNECTION, HeaderValue::from_static("close"));

    Ok(req)
}

/// Forwards plain HTTP requests to their targets.
#[derive(Clone)]
pub struct Forwarder {
    client: Client<HttpConnector, Body>,
    options: PipelineOptions,
}

impl Forwarder {
    pub fn new(config: &ProxyConfig) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(config.timeouts.target_connect()));

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            options: PipelineOptions::from_config(config),
        }
    }

    /// Forward `req` and build the client response.
    ///
    /// Failures before the response head is produced are answered with an
    /// error status.
    pub async fn forward(&self, req: Request<Body>, id: ConnectionId) -> Response<Body> {
        let req = match rewrite_request(req) {
            Ok(req) => req,
            Err(e) => {
                tracing::warn!(connection_id = %id, error = %e, "Request rejected");
                return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
            }
        };

        let target = req.uri().clone();
        tracing::debug!(connection_id = %id, method = %req.method(), target = %target, "Forwarding request");

        let response = match self.client.request(req).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(connection_id = %id, target = %target, error = %e, "Upstream request failed");
                return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
            }
        };

        let (mut parts, body) = response.into_parts();
        if body.is_end_stream() {
            return Response::from_parts(parts, Body::new(body));
        }

        let encoding = parts
            .headers
            .get(CONTENT_ENCODING)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let source = StreamReader::new(
            Body::new(body)
                .into_data_stream()
                .map_err(io::Error::other),
        );

        let pipeline =
            match StreamPipeline::build(source, encoding.as_deref(), &self.options).await {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    tracing::error!(
                        connection_id = %id,
                        target = %target,
                        stage = %e.stage(),
                        error = %e,
                        "Response pipeline failed"
                    );
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Response decoding failed")
                        .into_response();
                }
            };

        if pipeline.encoding_changed() {
            parts.headers.remove(CONTENT_ENCODING);
        }
        if pipeline.length_changed() {
            parts.headers.remove(CONTENT_LENGTH);
        }

        tracing::debug!(
            connection_id = %id,
            status = %parts.status,
            stages = ?pipeline.stages(),
            "Streaming response"
        );

        let body = Body::from_stream(ReaderStream::new(pipeline.into_reader()));
        Response::from_parts(parts, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    fn request(uri: &str) -> axum::http::request::Builder {
        Request::builder().uri(uri)
    }

    #[test]
    fn strips_hop_by_hop_and_forces_close() {
        let req = request("http://example.com/a?b=c")
            .header("keep-alive", "timeout=5")
            .header("connection", "keep-alive, upgrade")
            .header("x-kept", "1")
            .body(Body::empty())
            .unwrap();

        let req = rewrite_request(req).unwrap();
        assert!(req.headers().get(KEEP_ALIVE).is_none());
        assert_eq!(req.headers().get_all(CONNECTION).iter().count(), 1);
        assert_eq!(req.headers()[CONNECTION], "close");
        assert_eq!(req.headers()["x-kept"], "1");
        assert_eq!(req.uri(), "http://example.com/a?b=c");
    }

    #[test]
    fn completes_origin_form_from_host() {
        let req = request("/index.html?x=1")
            .header(HOST, "example.com:8080")
            .body(Body::empty())
            .unwrap();

        let req = rewrite_request(req).unwrap();
        assert_eq!(req.uri(), "http://example.com:8080/index.html?x=1");
    }

    #[test]
    fn rejects_unroutable_targets() {
        let no_host = request("/").body(Body::empty()).unwrap();
        assert!(matches!(rewrite_request(no_host), Err(RewriteError::MissingHost)));

        let https = request("https://example.com/").body(Body::empty()).unwrap();
        assert!(matches!(
            rewrite_request(https),
            Err(RewriteError::UnsupportedScheme(s)) if s == "https"
        ));
    }

    /// Upstream that answers one request with `response` and reports the
    /// request head it received.
    async fn one_shot_upstream(response: Vec<u8>) -> (SocketAddr, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            let _ = tx.send(String::from_utf8_lossy(&head).into_owned());
            socket.write_all(&response).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        (addr, rx)
    }

    fn forwarder(remove_bom: bool) -> Forwarder {
        let mut config = ProxyConfig::default();
        config.content.remove_bom = remove_bom;
        config.speed_limiter.enabled = false;
        Forwarder::new(&config)
    }

    #[tokio::test]
    async fn forwards_and_strips_bom() {
        let (addr, head) = one_shot_upstream(
            b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\nX-Upstream: yes\r\n\r\n\xEF\xBB\xBFabc".to_vec(),
        )
        .await;

        let req = request(&format!("http://{addr}/page"))
            .header("keep-alive", "300")
            .body(Body::empty())
            .unwrap();
        let response = forwarder(true).forward(req, ConnectionId::new()).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-upstream"], "yes");
        assert!(response.headers().get(CONTENT_LENGTH).is_none());

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abc");

        let head = head.await.unwrap().to_ascii_lowercase();
        assert!(head.starts_with("get /page http/1.1\r\n"));
        assert!(head.contains("connection: close\r\n"));
        assert!(!head.contains("keep-alive"));
    }

    #[tokio::test]
    async fn unchanged_body_keeps_length() {
        let (addr, _head) =
            one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nplain".to_vec()).await;

        let req = request(&format!("http://{addr}/")).body(Body::empty()).unwrap();
        let response = forwarder(true).forward(req, ConnectionId::new()).await;

        assert_eq!(response.headers()[CONTENT_LENGTH], "5");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"plain");
    }

    #[tokio::test]
    async fn unreachable_upstream_is_bad_gateway() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let req = request(&format!("http://{addr}/")).body(Body::empty()).unwrap();
        let response = forwarder(false).forward(req, ConnectionId::new()).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn undecodable_gzip_is_server_error() {
        let (addr, _head) = one_shot_upstream(
            b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 4\r\n\r\nnope".to_vec(),
        )
        .await;

        let mut config = ProxyConfig::default();
        config.content.decode_gzip = true;
        let req = request(&format!("http://{addr}/")).body(Body::empty()).unwrap();
        let response = Forwarder::new(&config).forward(req, ConnectionId::new()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn corrupt_gzip_header_is_server_error_without_bom_stage() {
        let body: &[u8] = b"\x1f\x8b\x63not really gzip at all";
        let mut response = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            body.len()
        )
        .into_bytes();
        response.extend_from_slice(body);
        let (addr, _head) = one_shot_upstream(response).await;

        let mut config = ProxyConfig::default();
        config.content.decode_gzip = true;
        config.content.remove_bom = false;
        config.speed_limiter.enabled = false;
        let req = request(&format!("http://{addr}/")).body(Body::empty()).unwrap();
        let response = Forwarder::new(&config).forward(req, ConnectionId::new()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn truncated_body_fails_bom_stage_with_server_error() {
        let (addr, _head) =
            one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n".to_vec()).await;

        let req = request(&format!("http://{addr}/")).body(Body::empty()).unwrap();
        let response = forwarder(true).forward(req, ConnectionId::new()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
