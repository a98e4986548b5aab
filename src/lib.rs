//! Forward HTTP/HTTPS proxy library.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod security;
pub mod stream;

pub use config::schema::ProxyConfig;
pub use lifecycle::{LifecycleState, Server};
pub use security::WorkMode;
