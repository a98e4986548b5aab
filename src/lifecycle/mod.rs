//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Start (server.rs):
//!     Bind listener → spawn accept loop → spawn error queue worker
//!
//! Stop (server.rs, shutdown.rs):
//!     Stop flag → stop accepting → drain connections (bounded) →
//!     close error queue → join workers
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → owner calls Stop
//! ```
//!
//! # Design Decisions
//! - Idle → Running → Stopping → Stopped, never backwards
//! - Shutdown has a timeout: remaining connections are closed after it

pub mod server;
pub mod shutdown;
pub mod signals;

pub use server::{LifecycleState, Server, ServerError};
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
