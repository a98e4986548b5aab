//! Client access control.
//!
//! Decides whether a client address may use the proxy and, when it may not,
//! drops the connection at the transport level before any byte is read.

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::security::work_mode::WorkMode;

/// Deadline imposed on the closing write in the soft denial path.
const SOFT_DENY_WRITE_DEADLINE: Duration = Duration::from_millis(1);

/// Pause that lets the soft denial's write fail before the socket is dropped.
const SOFT_DENY_PAUSE: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    #[error("client address {0} is not IPv4")]
    NotIpv4(IpAddr),
}

/// Normalize a peer address to IPv4, unwrapping IPv4-mapped IPv6.
pub fn client_ipv4(peer: IpAddr) -> Result<Ipv4Addr, AccessError> {
    match peer {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => ip.to_ipv4_mapped().ok_or(AccessError::NotIpv4(peer)),
    }
}

/// Evaluates client addresses against the configured work mode.
#[derive(Debug, Clone, Default)]
pub struct AccessGuard {
    mode: WorkMode,
}

impl AccessGuard {
    pub fn new(mode: WorkMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> &WorkMode {
        &self.mode
    }

    /// Returns whether `peer` may proceed.
    ///
    /// Public mode allows everyone. In private mode an address that cannot be
    /// read as IPv4 is an error rather than an implicit allow.
    pub fn allows(&self, peer: IpAddr) -> Result<bool, AccessError> {
        match &self.mode {
            WorkMode::Public => Ok(true),
            WorkMode::Private(whitelist) => Ok(whitelist.contains(&client_ipv4(peer)?)),
        }
    }
}

/// Transport-level capability to drop a connection abruptly.
pub trait ForceClose {
    /// Arrange for the next close to reset the connection.
    fn force_close(&self) -> io::Result<()>;
}

impl ForceClose for TcpStream {
    #[allow(deprecated)]
    fn force_close(&self) -> io::Result<()> {
        self.set_linger(Some(Duration::ZERO))
    }
}

/// Refuse a connection.
///
/// The preferred path resets the socket, which looks like a refused
/// connection to the client. When that is not possible the socket gets a
/// near-zero write deadline and a short pause before it is dropped. The
/// fallback does not guarantee an immediate disconnect.
pub async fn deny<S>(mut stream: S)
where
    S: ForceClose + AsyncWrite + Unpin,
{
    match stream.force_close() {
        Ok(()) => drop(stream),
        Err(e) => {
            tracing::debug!(error = %e, "Reset unavailable, using soft denial");
            let _ = tokio::time::timeout(SOFT_DENY_WRITE_DEADLINE, stream.shutdown()).await;
            tokio::time::sleep(SOFT_DENY_PAUSE).await;
        }
    }
}
