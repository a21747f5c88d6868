use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    account::LedgerError,
    command::{Command, CommandError},
    ledger::Ledger,
    proxy::ProxyClient,
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Turns one command line into one reply line.
///
/// Commands addressed to an account of another bank are forwarded through
/// the [`ProxyClient`]; everything else runs against the local [`Ledger`].
pub struct Dispatcher {
    identity: String,
    ledger: Arc<Ledger>,
    proxy: ProxyClient,
}

impl Dispatcher {
    pub fn new(identity: impl Into<String>, ledger: Arc<Ledger>, proxy: ProxyClient) -> Self {
        Self {
            identity: identity.into(),
            ledger,
            proxy,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub async fn process_command(&self, line: &str) -> String {
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => return self.error_reply(err.into()),
        };

        match command.target() {
            Some(target) if target.bank != self.identity => {
                let line = command.to_line();
                debug!(bank = %target.bank, line = %line, "Routing command to remote bank");
                self.proxy.forward(&target.bank, &line).await
            }
            _ => {
                debug!(op = %command.op(), "Executing command locally");
                match self.execute(&command) {
                    Ok(reply) => reply,
                    Err(err) => self.error_reply(err),
                }
            }
        }
    }

    fn execute(&self, command: &Command) -> Result<String, DispatchError> {
        let op = command.op();
        let reply = match command {
            Command::BankCode => format!("{op} {}", self.identity),
            Command::AccountCreate => {
                let account = self.ledger.create_account()?;
                format!("{op} {account}/{}", self.identity)
            }
            Command::Deposit { target, amount } => {
                self.ledger.deposit(target.number, amount.value)?;
                op.to_string()
            }
            Command::Withdraw { target, amount } => {
                self.ledger.withdraw(target.number, amount.value)?;
                op.to_string()
            }
            Command::Balance { target } => {
                format!("{op} {}", self.ledger.balance(target.number)?)
            }
            Command::Remove { target } => {
                self.ledger.remove_account(target.number)?;
                op.to_string()
            }
            Command::BankAmount => format!("{op} {}", self.ledger.total_amount()),
            Command::BankNumber => format!("{op} {}", self.ledger.account_count()),
        };
        Ok(reply)
    }

    fn error_reply(&self, err: DispatchError) -> String {
        info!("Command rejected: {err}");
        format!("ER {err}")
    }
}
