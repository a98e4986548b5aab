//! Response body transformation subsystem.
//!
//! # Data Flow
//! ```text
//! Upstream body reader
//!     → gzip.rs (decode, when enabled and Content-Encoding is gzip)
//!     → bom.rs (skip a leading byte-order mark, when enabled)
//!     → limiter.rs (pace reads, when enabled)
//!     → Client response body
//! ```
//!
//! # Design Decisions
//! - The order is fixed: BOM detection must see decoded bytes and the limiter
//!   paces the bytes the client actually receives
//! - Every stage owns the reader it wraps, so dropping the pipeline releases
//!   each stage exactly once, outermost first, and the upstream body last

pub mod bom;
pub mod gzip;
pub mod limiter;

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};

use crate::config::ProxyConfig;
use limiter::{BandwidthLimiter, LimiterSettings};

/// Type-erased body reader.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// A transformation applied to a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    GzipDecode,
    BomStrip,
    RateLimit,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::GzipDecode => "gzip-decode",
            StageKind::BomStrip => "bom-strip",
            StageKind::RateLimit => "rate-limit",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure while setting up a pipeline stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("gzip decoding failed: {0}")]
    Gzip(io::Error),
    #[error("byte-order mark detection failed: {0}")]
    Bom(io::Error),
}

impl StageError {
    pub fn stage(&self) -> StageKind {
        match self {
            StageError::Gzip(_) => StageKind::GzipDecode,
            StageError::Bom(_) => StageKind::BomStrip,
        }
    }
}

/// Which stages a pipeline may apply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineOptions {
    pub decode_gzip: bool,
    pub remove_bom: bool,
    pub limiter: Option<LimiterSettings>,
}

impl PipelineOptions {
    pub fn from_config(config: &ProxyConfig) -> Self {
        Self {
            decode_gzip: config.content.decode_gzip,
            remove_bom: config.content.remove_bom,
            limiter: LimiterSettings::from_config(&config.speed_limiter),
        }
    }
}

/// An ordered chain of stages over a body reader.
pub struct StreamPipeline {
    reader: BoxReader,
    stages: Vec<StageKind>,
    encoding_changed: bool,
    length_changed: bool,
}

impl StreamPipeline {
    /// Build the pipeline over `source`.
    ///
    /// Gzip and BOM stages read ahead from the source, so a body that cannot
    /// be decoded is reported here, before anything is sent to the client.
    /// On error the source has already been released.
    pub async fn build<R>(
        source: R,
        content_encoding: Option<&str>,
        options: &PipelineOptions,
    ) -> Result<Self, StageError>
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut reader: BoxReader = Box::new(Stage::new("upstream-body", source));
        let mut stages = Vec::new();
        let mut encoding_changed = false;
        let mut length_changed = false;

        if options.decode_gzip && content_encoding.is_some_and(gzip::is_gzip) {
            let decoder = gzip::decoder(reader).await.map_err(StageError::Gzip)?;
            reader = Box::new(Stage::new(StageKind::GzipDecode.as_str(), decoder));
            stages.push(StageKind::GzipDecode);
            encoding_changed = true;
            length_changed = true;
        }

        if options.remove_bom {
            let (stripped, found) = bom::strip(reader).await.map_err(StageError::Bom)?;
            if let Some(found) = found {
                tracing::debug!(encoding = found.encoding, "Byte-order mark removed");
                length_changed = true;
            }
            reader = Box::new(Stage::new(StageKind::BomStrip.as_str(), stripped));
            stages.push(StageKind::BomStrip);
        }

        if let Some(settings) = options.limiter {
            let limited = BandwidthLimiter::new(reader, settings);
            reader = Box::new(Stage::new(StageKind::RateLimit.as_str(), limited));
            stages.push(StageKind::RateLimit);
        }

        Ok(Self {
            reader,
            stages,
            encoding_changed,
            length_changed,
        })
    }

    /// Stages in the order they were applied.
    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// Whether the upstream `Content-Encoding` no longer describes the body.
    pub fn encoding_changed(&self) -> bool {
        self.encoding_changed
    }

    /// Whether the upstream `Content-Length` no longer describes the body.
    pub fn length_changed(&self) -> bool {
        self.length_changed
    }

    pub fn into_reader(self) -> BoxReader {
        self.reader
    }
}

/// Owns one layer of the chain and logs its release.
struct Stage<R> {
    label: &'static str,
    inner: R,
}

impl<R> Stage<R> {
    fn new(label: &'static str, inner: R) -> Self {
        Self { label, inner }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Stage<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<R> Drop for Stage<R> {
    fn drop(&mut self) {
        tracing::trace!(stage = self.label, "Stream stage released");
    }
}
