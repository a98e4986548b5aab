//! Work mode and client whitelist.
//!
//! The whitelist file holds one IPv4 address per line, each line terminated
//! by CRLF. Blank lines are ignored. A repeated address fails the load.

use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::config::schema::WorkModeConfig;

pub const MODE_PUBLIC: &str = "public";
pub const MODE_PRIVATE: &str = "private";

const LINE_TERMINATOR: &str = "\r\n";

/// Errors raised while building the work mode at startup.
#[derive(Debug, thiserror::Error)]
pub enum WorkModeError {
    #[error("unknown work mode name: {0}")]
    UnknownMode(String),

    #[error("private mode requires a whitelist file")]
    MissingList,

    #[error("failed to read whitelist {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid IP address in list at line {line}: {value:?}")]
    InvalidAddress { line: usize, value: String },

    #[error("duplicate IP address in list at line {line}: {address}")]
    DuplicateAddress { line: usize, address: Ipv4Addr },
}

/// Set of client addresses allowed in private mode.
///
/// Immutable once loaded.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    addresses: HashSet<Ipv4Addr>,
}

impl Whitelist {
    /// Load a whitelist file.
    pub fn from_file(path: &Path) -> Result<Self, WorkModeError> {
        let content = fs::read_to_string(path).map_err(|source| WorkModeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse whitelist text.
    pub fn parse(content: &str) -> Result<Self, WorkModeError> {
        let mut addresses = HashSet::new();

        for (index, raw) in content.split(LINE_TERMINATOR).enumerate() {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }

            let line = index + 1;
            let address: Ipv4Addr = value.parse().map_err(|_| WorkModeError::InvalidAddress {
                line,
                value: value.to_string(),
            })?;

            if !addresses.insert(address) {
                return Err(WorkModeError::DuplicateAddress { line, address });
            }
        }

        Ok(Self { addresses })
    }

    pub fn contains(&self, address: &Ipv4Addr) -> bool {
        self.addresses.contains(address)
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl FromIterator<Ipv4Addr> for Whitelist {
    fn from_iter<T: IntoIterator<Item = Ipv4Addr>>(iter: T) -> Self {
        Self {
            addresses: iter.into_iter().collect(),
        }
    }
}

/// Access-control posture, fixed at startup.
#[derive(Debug, Clone, Default)]
pub enum WorkMode {
    /// No filtering.
    #[default]
    Public,
    /// Only whitelisted IPv4 clients are served.
    Private(Whitelist),
}

impl WorkMode {
    /// Build the work mode from configuration, loading the whitelist if needed.
    pub fn from_config(config: &WorkModeConfig) -> Result<Self, WorkModeError> {
        match config.mode.to_ascii_lowercase().as_str() {
            MODE_PUBLIC => Ok(WorkMode::Public),
            MODE_PRIVATE => {
                let path = config
                    .list
                    .as_deref()
                    .filter(|p| !p.trim().is_empty())
                    .ok_or(WorkModeError::MissingList)?;
                let whitelist = Whitelist::from_file(Path::new(path))?;
                tracing::info!(path = %path, addresses = whitelist.len(), "Whitelist loaded");
                Ok(WorkMode::Private(whitelist))
            }
            _ => Err(WorkModeError::UnknownMode(config.mode.clone())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            WorkMode::Public => MODE_PUBLIC,
            WorkMode::Private(_) => MODE_PRIVATE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_distinct_addresses() {
        let list = Whitelist::parse("10.0.0.1\r\n10.0.0.2\r\n 192.168.1.7 \r\n").unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.contains(&Ipv4Addr::new(192, 168, 1, 7)));
        assert!(!list.contains(&Ipv4Addr::new(10, 0, 0, 3)));
    }

    #[test]
    fn duplicate_fails_load() {
        let err = Whitelist::parse("10.0.0.1\r\n10.0.0.2\r\n10.0.0.1\r\n").unwrap_err();
        match err {
            WorkModeError::DuplicateAddress { line, address } => {
                assert_eq!(line, 3);
                assert_eq!(address, Ipv4Addr::new(10, 0, 0, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_non_ipv4_entries() {
        assert!(matches!(
            Whitelist::parse("10.0.0.1\r\n::1\r\n"),
            Err(WorkModeError::InvalidAddress { line: 2, .. })
        ));
    }

    #[test]
    fn lf_only_lines_are_not_split() {
        assert!(matches!(
            Whitelist::parse("10.0.0.1\n10.0.0.2\n"),
            Err(WorkModeError::InvalidAddress { line: 1, .. })
        ));
    }

    #[test]
    fn private_mode_loads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "127.0.0.1\r\n10.1.2.3\r\n").unwrap();

        let mode = WorkMode::from_config(&WorkModeConfig {
            mode: "PRIVATE".into(),
            list: Some(file.path().display().to_string()),
        })
        .unwrap();

        match mode {
            WorkMode::Private(list) => assert_eq!(list.len(), 2),
            WorkMode::Public => panic!("expected private mode"),
        }
    }

    #[test]
    fn unknown_mode_name() {
        let err = WorkMode::from_config(&WorkModeConfig {
            mode: "secret".into(),
            list: None,
        })
        .unwrap_err();
        assert!(matches!(err, WorkModeError::UnknownMode(ref m) if m == "secret"));
    }

    #[test]
    fn unreadable_list() {
        let err = WorkMode::from_config(&WorkModeConfig {
            mode: "private".into(),
            list: Some("/nonexistent/whitelist.txt".into()),
        })
        .unwrap_err();
        assert!(matches!(err, WorkModeError::Io { .. }));
    }
}
