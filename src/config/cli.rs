//! Command-line flags.
//!
//! Every flag is optional; a flag that is present overrides the matching
//! field of the configuration it is applied to.

use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::config::schema::ProxyConfig;

#[derive(Debug, Default, Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Forward HTTP/HTTPS proxy", long_about = None)]
pub struct CliArgs {
    /// Optional TOML configuration file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Listen host name
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port number
    #[arg(long)]
    pub port: Option<u16>,

    /// Log level: debug, info, warn, error, fatal, panic, none, disabled
    #[arg(long)]
    pub loglevel: Option<String>,

    /// Work mode: public or private
    #[arg(long)]
    pub mode: Option<String>,

    /// Path to a list of IP addresses for the selected work mode
    #[arg(long)]
    pub list: Option<String>,

    /// Decode GZip content
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub gzip: Option<bool>,

    /// Remove BOM from content
    #[arg(long, action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub bom: Option<bool>,

    /// Use speed limiter
    #[arg(long = "sl", alias = "speed", action = ArgAction::Set, num_args = 0..=1, default_missing_value = "true")]
    pub speed_limiter: Option<bool>,

    /// Speed limiter's normal limit (bytes/sec)
    #[arg(long)]
    pub slnl: Option<f64>,

    /// Speed limiter's burst limit (bytes/sec)
    #[arg(long)]
    pub slbl: Option<u64>,

    /// Speed limiter's maximal burst-to-normal ratio
    #[arg(long)]
    pub slbnr: Option<f64>,

    /// Target connection dial timeout (sec)
    #[arg(long = "tct", alias = "tcdt")]
    pub target_connect_secs: Option<u64>,

    /// Graceful shutdown bound (sec)
    #[arg(long)]
    pub shutdown_timeout: Option<u64>,
}

impl CliArgs {
    /// Overwrite the fields of `config` whose flags were given.
    pub fn apply(&self, config: &mut ProxyConfig) {
        if let Some(host) = &self.host {
            config.listener.host = host.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(level) = &self.loglevel {
            config.logging.level = level.clone();
        }
        if let Some(mode) = &self.mode {
            config.work_mode.mode = mode.clone();
        }
        if let Some(list) = &self.list {
            config.work_mode.list = Some(list.clone());
        }
        if let Some(gzip) = self.gzip {
            config.content.decode_gzip = gzip;
        }
        if let Some(bom) = self.bom {
            config.content.remove_bom = bom;
        }
        if let Some(enabled) = self.speed_limiter {
            config.speed_limiter.enabled = enabled;
        }
        if let Some(normal) = self.slnl {
            config.speed_limiter.normal_bytes_per_sec = normal;
        }
        if let Some(burst) = self.slbl {
            config.speed_limiter.burst_bytes_per_sec = burst;
        }
        if let Some(ratio) = self.slbnr {
            config.speed_limiter.max_burst_ratio = ratio;
        }
        if let Some(secs) = self.target_connect_secs {
            config.timeouts.target_connect_secs = secs;
        }
        if let Some(secs) = self.shutdown_timeout {
            config.timeouts.shutdown_secs = secs;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let args = CliArgs::try_parse_from([
            "forward-proxy",
            "--port",
            "3128",
            "--gzip",
            "--bom=false",
            "--speed",
            "false",
            "--tcdt",
            "5",
            "--mode",
            "private",
            "--list",
            "allowed.txt",
        ])
        .unwrap();

        let mut config = ProxyConfig::default();
        args.apply(&mut config);

        assert_eq!(config.listener.port, 3128);
        assert_eq!(config.listener.host, "0.0.0.0");
        assert!(config.content.decode_gzip);
        assert!(!config.content.remove_bom);
        assert!(!config.speed_limiter.enabled);
        assert_eq!(config.timeouts.target_connect_secs, 5);
        assert_eq!(config.work_mode.mode, "private");
        assert_eq!(config.work_mode.list.as_deref(), Some("allowed.txt"));
    }

    #[test]
    fn absent_flags_leave_config_untouched() {
        let args = CliArgs::try_parse_from(["forward-proxy"]).unwrap();
        let mut config = ProxyConfig::default();
        config.listener.port = 1;
        args.apply(&mut config);
        assert_eq!(config.listener.port, 1);
        assert!(config.speed_limiter.enabled);
    }

    #[test]
    fn limiter_tunables() {
        let args = CliArgs::try_parse_from([
            "forward-proxy",
            "--slnl",
            "1000.5",
            "--slbl",
            "4096",
            "--slbnr",
            "3",
        ])
        .unwrap();
        let mut config = ProxyConfig::default();
        args.apply(&mut config);
        assert_eq!(config.speed_limiter.normal_bytes_per_sec, 1000.5);
        assert_eq!(config.speed_limiter.burst_bytes_per_sec, 4096);
        assert_eq!(config.speed_limiter.max_burst_ratio, 3.0);
    }
}
