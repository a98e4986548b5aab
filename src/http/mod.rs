//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → dispatcher.rs (access guard, request head sniffing)
//!     → tunnel.rs (CONNECT: dial, acknowledge, relay)
//!     → forward.rs (other methods: rewrite, upstream request, body pipeline)
//!     → Client
//! ```

pub mod dispatcher;
pub mod forward;
pub mod head;
pub mod response;
pub mod tunnel;

pub use dispatcher::Dispatcher;
pub use forward::Forwarder;
pub use tunnel::TunnelSettings;
