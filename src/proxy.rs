use std::{
    io,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, lookup_host},
    sync::Semaphore,
    time::timeout,
};
use tracing::{debug, warn};

/// Forwarded requests allowed to be in flight at the same time.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 64;

#[derive(Debug, Error)]
enum ProxyError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bank {bank} resolves to no address")]
    NoAddress { bank: String },
    #[error("bank {bank} is served by this node")]
    OwnNode { bank: String },
}

/// Forwards single command lines to the bank that owns the account.
///
/// Every call opens its own connection, sends one line, reads one line back
/// and closes. Failures never escape as errors: they come back as `ER` lines
/// so the caller can hand them to its client unchanged.
///
/// A forwarded command is not transactional. When the remote bank applies a
/// mutation but its reply is lost (the peer closes early or the timeout
/// runs out), the caller still gets an `ER` line although the remote balance
/// has changed. Nothing is retried.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    port: u16,
    timeout: Duration,
    listener: Option<IpAddr>,
    in_flight: Arc<Semaphore>,
}

impl ProxyClient {
    /// `port` must be the port every bank listens on.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            listener: None,
            in_flight: Arc::new(Semaphore::new(DEFAULT_MAX_IN_FLIGHT)),
        }
    }

    /// Address this node itself listens on (together with `port`).
    /// Banks resolving to it are refused instead of forwarded back here.
    pub fn with_listener(mut self, bind: IpAddr) -> Self {
        self.listener = Some(bind);
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(max));
        self
    }

    pub async fn forward(&self, remote: &str, line: &str) -> String {
        let Ok(_permit) = self.in_flight.try_acquire() else {
            warn!(remote, "Too many forwarded requests in flight");
            return "ER Proxy error: too many forwarded requests in flight".to_string();
        };
        debug!(remote, port = self.port, line, "Forwarding command");
        match timeout(self.timeout, self.round_trip(remote, line)).await {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => {
                warn!(remote, "Peer closed the connection without a reply");
                format!("ER No response from {remote}")
            }
            Ok(Err(err)) => {
                warn!(remote, "Proxy request failed: {err}");
                format!("ER Proxy error: {err}")
            }
            Err(_) => {
                warn!(remote, "Proxy request timed out");
                format!(
                    "ER Proxy error: timed out after {} ms",
                    self.timeout.as_millis()
                )
            }
        }
    }

    fn is_own_address(&self, addr: &SocketAddr) -> bool {
        let Some(bind) = self.listener else {
            return false;
        };
        if addr.port() != self.port {
            return false;
        }
        let ip = addr.ip();
        if bind.is_unspecified() {
            ip.is_loopback() || ip.is_unspecified()
        } else {
            ip == bind || ip.is_unspecified()
        }
    }

    async fn round_trip(&self, remote: &str, line: &str) -> Result<Option<String>, ProxyError> {
        let addrs: Vec<SocketAddr> = lookup_host((remote, self.port)).await?.collect();
        if addrs.is_empty() {
            return Err(ProxyError::NoAddress {
                bank: remote.to_owned(),
            });
        }
        if addrs.iter().any(|addr| self.is_own_address(addr)) {
            return Err(ProxyError::OwnNode {
                bank: remote.to_owned(),
            });
        }

        let mut stream = TcpStream::connect(&addrs[..]).await?;
        let (reader, mut writer) = stream.split();
        writer.write_all(format!("{line}\n").as_bytes()).await?;
        writer.flush().await?;

        let mut reply = String::new();
        if BufReader::new(reader).read_line(&mut reply).await? == 0 {
            return Ok(None);
        }
        Ok(Some(reply.trim_end_matches(['\r', '\n']).to_owned()))
    }
}
