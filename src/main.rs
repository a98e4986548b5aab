//! Forward HTTP/HTTPS proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                FORWARD PROXY                  │
//!   Client connection     │  ┌─────────┐    ┌────────────┐               │
//!   ──────────────────────┼─▶│   net   │───▶│ dispatcher │──deny──▶ RST  │
//!                         │  │listener │    │ + access   │               │
//!                         │  └─────────┘    └─────┬──────┘               │
//!                         │            CONNECT    │     other methods    │
//!                         │          ┌────────────┴─────────┐            │
//!                         │          ▼                      ▼            │
//!                         │    ┌──────────┐          ┌────────────┐      │
//!                         │    │  tunnel  │          │  forward   │      │
//!                         │    │  relay   │          │ + stream   │      │
//!                         │    └────┬─────┘          │  pipeline  │      │
//!                         │         │                └─────┬──────┘      │
//!                         └─────────┼──────────────────────┼─────────────┘
//!                                   ▼                      ▼
//!                              Target host            Target host
//! ```

use std::process::ExitCode;

use clap::Parser;

use forward_proxy::config::{build_config, CliArgs};
use forward_proxy::lifecycle::{shutdown_signal, Server};
use forward_proxy::observability::logging::init_logging;
use forward_proxy::security::WorkMode;

/// Exit status for bad parameters.
const EXIT_BAD_PARAMETERS: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("forward-proxy: {e}");
            return ExitCode::from(EXIT_BAD_PARAMETERS);
        }
    };

    init_logging(&config.logging.level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "forward-proxy starting");

    let mode = match WorkMode::from_config(&config.work_mode) {
        Ok(mode) => mode,
        Err(e) => {
            tracing::error!(error = %e, "Invalid work mode");
            eprintln!("forward-proxy: {e}");
            return ExitCode::from(EXIT_BAD_PARAMETERS);
        }
    };

    tracing::info!(
        bind_address = %config.listener.bind_address(),
        max_connections = config.listener.max_connections,
        mode = mode.name(),
        decode_gzip = config.content.decode_gzip,
        remove_bom = config.content.remove_bom,
        speed_limiter = config.speed_limiter.enabled,
        target_connect_secs = config.timeouts.target_connect_secs,
        "Configuration loaded"
    );

    let mut server = Server::new(config, mode);
    if let Err(e) = server.start().await {
        tracing::error!(error = %e, "Failed to start");
        eprintln!("forward-proxy: {e}");
        return ExitCode::FAILURE;
    }

    let mut stop_requests = server.take_stop_requests();
    let listener_failed = async {
        match stop_requests.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    };

    let failure = tokio::select! {
        _ = shutdown_signal() => None,
        failure = listener_failed => failure,
    };

    if let Err(e) = server.stop().await {
        tracing::error!(error = %e, "Shutdown failed");
        return ExitCode::FAILURE;
    }

    match failure {
        Some(e) => {
            tracing::error!(error = %e, "Stopped after listener failure");
            ExitCode::FAILURE
        }
        None => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
    }
}
