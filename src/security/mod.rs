//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted connection:
//!     → access_control.rs (peer address vs. work mode)
//!     → denied: reset at the transport level, nothing is read
//!     → allowed: hand to the dispatcher
//!
//! Startup:
//!     work_mode.rs (mode name + whitelist file → WorkMode)
//! ```
//!
//! # Design Decisions
//! - Fail closed: an unreadable client address in private mode is denied
//! - The whitelist never changes after startup, so no locking is needed

pub mod access_control;
pub mod work_mode;

pub use access_control::{AccessError, AccessGuard};
pub use work_mode::{Whitelist, WorkMode, WorkModeError};
