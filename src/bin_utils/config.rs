use std::{
    fs,
    net::{IpAddr, Ipv4Addr},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, ensure};
use clap::Parser;
use serde::Deserialize;

use crate::proxy::DEFAULT_MAX_IN_FLIGHT;

/// Port every bank listens on. Proxying only works when all banks agree on it.
pub const DEFAULT_PORT: u16 = 65525;

/// Settings of one bank node.
///
/// Values come from the defaults, then an optional TOML file, then
/// command-line flags, each layer overriding the previous one.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Bank code announced to clients and compared against `<account>/<bank>`.
    pub identity: String,
    pub bind: IpAddr,
    pub port: u16,
    /// CSV snapshot of the ledger.
    pub storage: PathBuf,
    pub proxy_timeout_ms: u64,
    /// Forwarded requests allowed in flight at once.
    pub proxy_max_in_flight: usize,
    /// Idle connections are closed after this many seconds.
    pub client_timeout_secs: u64,
    pub log_level: String,
    /// Logs are appended here instead of going to stderr.
    pub log_file: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            identity: "127.0.0.1".to_string(),
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            storage: PathBuf::from("accounts.csv"),
            proxy_timeout_ms: 5000,
            proxy_max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            client_timeout_secs: 300,
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

#[derive(Debug, Default, Parser)]
#[command(version, about = "Bank node speaking the line based bank protocol")]
pub struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// Bank code of this node, usually its IP address
    #[arg(long)]
    pub identity: Option<String>,
    #[arg(long)]
    pub bind: Option<IpAddr>,
    #[arg(short, long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub storage: Option<PathBuf>,
    #[arg(long)]
    pub proxy_timeout_ms: Option<u64>,
    #[arg(long)]
    pub proxy_max_in_flight: Option<usize>,
    #[arg(long)]
    pub client_timeout_secs: Option<u64>,
    #[arg(long)]
    pub log_level: Option<String>,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl NodeConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config `{}`", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config `{}`", path.display()))
    }

    pub fn load(cli: Cli) -> Result<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply(&mut self, cli: Cli) {
        let Cli {
            config: _,
            identity,
            bind,
            port,
            storage,
            proxy_timeout_ms,
            proxy_max_in_flight,
            client_timeout_secs,
            log_level,
            log_file,
        } = cli;
        if let Some(identity) = identity {
            self.identity = identity;
        }
        if let Some(bind) = bind {
            self.bind = bind;
        }
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(storage) = storage {
            self.storage = storage;
        }
        if let Some(timeout) = proxy_timeout_ms {
            self.proxy_timeout_ms = timeout;
        }
        if let Some(max) = proxy_max_in_flight {
            self.proxy_max_in_flight = max;
        }
        if let Some(timeout) = client_timeout_secs {
            self.client_timeout_secs = timeout;
        }
        if let Some(level) = log_level {
            self.log_level = level;
        }
        if log_file.is_some() {
            self.log_file = log_file;
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(!self.identity.is_empty(), "Bank identity must not be empty");
        ensure!(
            !self.identity.contains(char::is_whitespace) && !self.identity.contains('/'),
            "Bank identity `{}` must not contain whitespace or `/`",
            self.identity
        );
        ensure!(self.proxy_timeout_ms > 0, "Proxy timeout must be positive");
        ensure!(
            self.proxy_max_in_flight > 0,
            "At least one forwarded request must be allowed in flight"
        );
        ensure!(self.client_timeout_secs > 0, "Client timeout must be positive");
        Ok(())
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.client_timeout_secs)
    }
}
