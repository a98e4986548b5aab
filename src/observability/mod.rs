//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!       (connection id, peer, method, target, elapsed_ms)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//! ```

pub mod logging;
