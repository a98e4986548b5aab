//! Per-connection entry point.
//!
//! # Responsibilities
//! - Apply the access guard before reading anything from the client
//! - Sniff the request head and route CONNECT to the tunnel, anything else
//!   to the forwarder
//! - Log how long each request took
//!
//! # Design Decisions
//! - The dispatcher owns the raw client socket, so denial and tunnel setup
//!   never need to take it back from the HTTP layer
//! - Client-facing HTTP connections serve a single request

use std::convert::Infallible;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::http::forward::Forwarder;
use crate::http::head::{self, HeadError, MAX_HEAD_LEN};
use crate::http::response::write_plain_response;
use crate::http::tunnel::{self, TunnelSettings};
use crate::net::connection::{ConnectionGuard, ConnectionId};
use crate::net::prebuffered::Prebuffered;
use crate::security::access_control::{deny, AccessGuard};
use crate::security::work_mode::WorkMode;

/// Routes each accepted connection. Holds only read-only configuration.
pub struct Dispatcher {
    guard: AccessGuard,
    forwarder: Forwarder,
    tunnel: TunnelSettings,
}

impl Dispatcher {
    pub fn new(config: &ProxyConfig, mode: WorkMode) -> Self {
        Self {
            guard: AccessGuard::new(mode),
            forwarder: Forwarder::new(config),
            tunnel: TunnelSettings::from_config(config),
        }
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    /// Serve one client connection to completion.
    pub async fn handle(&self, stream: TcpStream, conn: ConnectionGuard) {
        let id = conn.id();
        let peer = conn.peer();

        match self.guard.allows(peer.ip()) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(connection_id = %id, peer = %peer, "Client denied");
                deny(stream).await;
                return;
            }
            Err(e) => {
                tracing::error!(connection_id = %id, peer = %peer, error = %e, "Client address rejected");
                deny(stream).await;
                return;
            }
        }

        let mut stream = Prebuffered::new(stream, MAX_HEAD_LEN);
        let head = match head::peek(&mut stream).await {
            Ok(head) => head,
            Err(HeadError::Closed) => {
                tracing::trace!(connection_id = %id, "Client closed before sending a request");
                return;
            }
            Err(HeadError::Io(e)) => {
                tracing::debug!(connection_id = %id, error = %e, "Failed to read request head");
                return;
            }
            Err(e) => {
                tracing::debug!(connection_id = %id, peer = %peer, error = %e, "Bad request head");
                let status = match e {
                    HeadError::TooLarge => StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE,
                    _ => StatusCode::BAD_REQUEST,
                };
                let _ = write_plain_response(&mut stream, status, &e.to_string()).await;
                return;
            }
        };

        if head.is_connect() {
            stream.discard(head.len);
            let (leftover, client) = stream.into_parts();
            if let Err(e) = tunnel::serve(client, leftover, &head.target, &self.tunnel, id).await {
                tracing::error!(connection_id = %id, target = %head.target, error = %e, "Tunnel failed");
            }
        } else {
            self.serve_http(stream, id).await;
        }

        tracing::debug!(
            connection_id = %id,
            peer = %peer,
            method = %head.method,
            target = %head.target,
            elapsed_ms = conn.elapsed().as_millis() as u64,
            "Request served"
        );
    }

    async fn serve_http(&self, stream: Prebuffered<TcpStream>, id: ConnectionId) {
        let forwarder = self.forwarder.clone();
        let service = service_fn(move |req: Request<Incoming>| {
            let forwarder = forwarder.clone();
            async move { Ok::<_, Infallible>(forwarder.forward(req.map(Body::new), id).await) }
        });

        if let Err(e) = http1::Builder::new()
            .keep_alive(false)
            .serve_connection(TokioIo::new(stream), service)
            .await
        {
            tracing::debug!(connection_id = %id, error = %e, "Client connection error");
        }
    }
}
