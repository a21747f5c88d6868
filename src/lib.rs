/// Account numbers, balances and the errors the ledger reports.
pub mod account;

/// Parsing of protocol lines into commands.
pub mod command;

/// The account store of this bank, guarded by one lock and persisted
/// after every change.
///
/// Persistence goes through [`ledger::SnapshotStore`], so the CSV file can
/// be swapped for something else without touching the ledger itself.
pub mod ledger;

/// Executes commands locally or forwards them to the owning bank.
pub mod dispatcher;

/// Client used to forward commands to other banks.
pub mod proxy;

/// Configuration, logging and the TCP server. Used by the binary and by
/// the integration tests.
pub mod bin_utils;
