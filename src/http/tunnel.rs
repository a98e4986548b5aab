//! CONNECT tunnels.
//!
//! # Responsibilities
//! - Dial the requested target within the dial timeout
//! - Acknowledge the tunnel on the client socket
//! - Relay bytes both ways until each direction finishes
//!
//! # Design Decisions
//! - Each direction is its own task and owns only its read and write halves
//! - A finished direction shuts down its write half and leaves the other
//!   direction running
//! - The relay waits for one completion per direction; dropping the relay
//!   aborts both copy tasks, which closes every half

use std::io;
use std::str::FromStr;
use std::time::Duration;

use axum::http::uri::Authority;
use axum::http::StatusCode;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::ProxyConfig;
use crate::http::response::{write_plain_response, CONNECT_ESTABLISHED};
use crate::net::connection::ConnectionId;
use crate::net::prebuffered::replay;
use crate::stream::limiter::{BandwidthLimiter, LimiterSettings};
use crate::stream::BoxReader;

/// Error type for tunnel setup.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("Invalid tunnel target {0:?}")]
    InvalidTarget(String),
    #[error("Timed out connecting to {target}")]
    DialTimeout { target: String },
    #[error("Failed to connect to {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to acknowledge tunnel: {0}")]
    Handshake(io::Error),
}

impl TunnelError {
    /// Status reported to the client, if it can still receive one.
    pub fn status(&self) -> StatusCode {
        match self {
            TunnelError::InvalidTarget(_) => StatusCode::BAD_REQUEST,
            TunnelError::DialTimeout { .. } | TunnelError::Dial { .. } => StatusCode::BAD_GATEWAY,
            TunnelError::Handshake(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Settings shared by every tunnel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunnelSettings {
    pub dial_timeout: Duration,
    pub limiter: Option<LimiterSettings>,
}

impl TunnelSettings {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            dial_timeout: config.timeouts.target_connect(),
            limiter: LimiterSettings::from_config(&config.speed_limiter),
        }
    }
}

/// Split an authority-form target into host and port.
fn parse_target(target: &str) -> Result<(String, u16), TunnelError> {
    let invalid = || TunnelError::InvalidTarget(target.to_string());
    let authority = Authority::from_str(target).map_err(|_| invalid())?;
    let port = authority.port_u16().ok_or_else(invalid)?;
    let host = authority
        .host()
        .trim_start_matches('[')
        .trim_end_matches(']');
    if host.is_empty() {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Open a TCP connection to `target` within `dial_timeout`.
pub async fn dial(target: &str, dial_timeout: Duration) -> Result<TcpStream, TunnelError> {
    let (host, port) = parse_target(target)?;
    match tokio::time::timeout(dial_timeout, TcpStream::connect((host.as_str(), port))).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(TunnelError::Dial {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(TunnelError::DialTimeout {
            target: target.to_string(),
        }),
    }
}

/// Serve a CONNECT request on a client socket whose request head has been
/// consumed. `leftover` holds bytes the client sent after the head.
///
/// Setup failures are answered on the client socket before returning.
pub async fn serve(
    mut client: TcpStream,
    leftover: Bytes,
    target: &str,
    settings: &TunnelSettings,
    id: ConnectionId,
) -> Result<(), TunnelError> {
    let upstream = match dial(target, settings.dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            let _ = write_plain_response(&mut client, e.status(), &e.to_string()).await;
            return Err(e);
        }
    };

    tracing::debug!(connection_id = %id, target = %target, "Tunnel target connected");

    client
        .write_all(CONNECT_ESTABLISHED)
        .await
        .map_err(TunnelError::Handshake)?;

    relay(client, leftover, upstream, settings.limiter, id).await;
    Ok(())
}

/// Copy direction within a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToTarget,
    TargetToClient,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::ClientToTarget => f.write_str("client-to-target"),
            Direction::TargetToClient => f.write_str("target-to-client"),
        }
    }
}

/// Reports a direction as finished when dropped, including on abort.
struct CompletionSignal {
    direction: Direction,
    tx: mpsc::Sender<Direction>,
}

impl Drop for CompletionSignal {
    fn drop(&mut self) {
        let _ = self.tx.try_send(self.direction);
    }
}

/// The two copy tasks of one tunnel.
struct RelayPair {
    tasks: [JoinHandle<()>; 2],
}

impl Drop for RelayPair {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Relay bytes between `client` and `target` until both directions finish.
pub async fn relay(
    client: TcpStream,
    leftover: Bytes,
    target: TcpStream,
    limiter: Option<LimiterSettings>,
    id: ConnectionId,
) {
    let (client_read, client_write) = client.into_split();
    let (target_read, target_write) = target.into_split();
    let (tx, mut rx) = mpsc::channel(2);

    let _pair = RelayPair {
        tasks: [
            spawn_copy(
                Direction::ClientToTarget,
                paced(replay(leftover, client_read), limiter),
                target_write,
                tx.clone(),
                id,
            ),
            spawn_copy(
                Direction::TargetToClient,
                paced(target_read, limiter),
                client_write,
                tx,
                id,
            ),
        ],
    };

    for _ in 0..2 {
        if rx.recv().await.is_none() {
            break;
        }
    }

    tracing::debug!(connection_id = %id, "Tunnel closed");
}

fn paced<R>(reader: R, limiter: Option<LimiterSettings>) -> BoxReader
where
    R: AsyncRead + Send + Unpin + 'static,
{
    match limiter {
        Some(settings) => Box::new(BandwidthLimiter::new(reader, settings)),
        None => Box::new(reader),
    }
}

fn spawn_copy<W>(
    direction: Direction,
    mut reader: BoxReader,
    mut writer: W,
    tx: mpsc::Sender<Direction>,
    id: ConnectionId,
) -> JoinHandle<()>
where
    W: AsyncWrite + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let _signal = CompletionSignal { direction, tx };
        match tokio::io::copy(&mut reader, &mut writer).await {
            Ok(bytes) => tracing::trace!(
                connection_id = %id,
                direction = %direction,
                bytes,
                "Tunnel direction finished"
            ),
            Err(e) => tracing::warn!(
                connection_id = %id,
                direction = %direction,
                error = %e,
                "Tunnel direction failed"
            ),
        }
        let _ = writer.shutdown().await;
    })
}
