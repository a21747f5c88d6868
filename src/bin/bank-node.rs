use std::sync::Arc;

use anyhow::Result;
use bank_node::{
    bin_utils::{
        config::{Cli, NodeConfig},
        init_logging,
        server::Server,
    },
    dispatcher::Dispatcher,
    ledger::{Ledger, csv_store::CsvSnapshotStore},
    proxy::ProxyClient,
};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::load(Cli::parse())?;
    init_logging(&config)?;

    let ledger = Arc::new(Ledger::open(CsvSnapshotStore::new(&config.storage)));
    let proxy = ProxyClient::new(config.port, config.proxy_timeout())
        .with_listener(config.bind)
        .with_max_in_flight(config.proxy_max_in_flight);
    let dispatcher = Arc::new(Dispatcher::new(config.identity.clone(), ledger, proxy));
    let server = Server::bind(
        (config.bind, config.port),
        dispatcher,
        config.client_timeout(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(err) => {
                error!("Failed to listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await
}
