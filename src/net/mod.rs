//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (connection id, active count)
//!     → prebuffered.rs (request head read-ahead)
//!     → Hand off to the HTTP dispatcher
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - The proxy keeps ownership of every client socket until the request head
//!   has been inspected

pub mod connection;
pub mod listener;
pub mod prebuffered;
