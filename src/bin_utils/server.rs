use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs},
    select,
    sync::watch,
    task::JoinSet,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};

use crate::dispatcher::Dispatcher;

/// Longest accepted command line, terminator included.
pub const MAX_LINE_LEN: usize = 1024;

/// Pause after a failed `accept`, e.g. when the process is out of descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts client connections and answers each command line with one reply line.
pub struct Server {
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    client_timeout: Duration,
}

impl Server {
    pub async fn bind(
        addr: impl ToSocketAddrs,
        dispatcher: Arc<Dispatcher>,
        client_timeout: Duration,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .context("Failed to bind the bank listener")?;
        Ok(Self {
            listener,
            dispatcher,
            client_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until `shutdown` flips to `true` (or its sender goes away),
    /// then waits for open connections to wind down.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            bank = self.dispatcher.identity(),
            addr = %self.local_addr()?,
            "Bank node listening"
        );
        let mut connections = JoinSet::new();
        while !*shutdown.borrow() {
            select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Client connected");
                        connections.spawn(handle_connection(
                            stream,
                            peer,
                            self.dispatcher.clone(),
                            self.client_timeout,
                            shutdown.clone(),
                        ));
                    }
                    Err(err) => {
                        warn!("Failed to accept a connection: {err}");
                        back_off(&mut shutdown).await;
                    }
                },
                Some(_) = connections.join_next() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!(open = connections.len(), "Stopped accepting connections");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

/// Sleeps for [`ACCEPT_BACKOFF`] unless shutdown is signalled first.
async fn back_off(shutdown: &mut watch::Receiver<bool>) {
    select! {
        _ = sleep(ACCEPT_BACKOFF) => {}
        _ = shutdown.changed() => {}
    }
}

#[derive(Debug, PartialEq, Eq)]
enum ReadLine {
    Complete,
    TooLong,
    Eof,
}

/// Reads one line into `buf`, never buffering more than [`MAX_LINE_LEN`]
/// bytes. The rest of an oversized line is read and dropped.
async fn read_line_capped<R>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let read = (&mut *reader)
        .take(MAX_LINE_LEN as u64)
        .read_until(b'\n', buf)
        .await?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.ends_with(b"\n") || read < MAX_LINE_LEN {
        return Ok(ReadLine::Complete);
    }
    loop {
        buf.clear();
        let read = (&mut *reader)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', buf)
            .await?;
        if read == 0 || buf.ends_with(b"\n") {
            buf.clear();
            return Ok(ReadLine::TooLong);
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    client_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    while !*shutdown.borrow() {
        let read = select! {
            read = timeout(client_timeout, read_line_capped(&mut reader, &mut buf)) => read,
            _ = shutdown.changed() => break,
        };
        match read {
            Err(_) => {
                info!(%peer, "Closing idle connection");
                break;
            }
            Ok(Err(err)) => {
                warn!(%peer, "Failed to read from client: {err}");
                break;
            }
            Ok(Ok(ReadLine::Eof)) => break,
            Ok(Ok(read)) => {
                let reply = if read == ReadLine::TooLong {
                    info!(%peer, "Command line too long");
                    "ER Command line is too long.".to_string()
                } else {
                    dispatcher
                        .process_command(&String::from_utf8_lossy(&buf))
                        .await
                };
                if let Err(err) = writer.write_all(format!("{reply}\n").as_bytes()).await {
                    warn!(%peer, "Failed to reply to client: {err}");
                    break;
                }
            }
        }
    }
    debug!(%peer, "Client disconnected");
}
