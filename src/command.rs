use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::account::{AccountNumber, Balance};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    BankCode,
    AccountCreate,
    AccountDeposit,
    AccountWithdraw,
    AccountBalance,
    AccountRemove,
    BankAmount,
    BankNumber,
}

impl OpCode {
    pub const ALL: [OpCode; 8] = [
        OpCode::BankCode,
        OpCode::AccountCreate,
        OpCode::AccountDeposit,
        OpCode::AccountWithdraw,
        OpCode::AccountBalance,
        OpCode::AccountRemove,
        OpCode::BankAmount,
        OpCode::BankNumber,
    ];

    pub const fn tag(self) -> &'static str {
        match self {
            OpCode::BankCode => "BC",
            OpCode::AccountCreate => "AC",
            OpCode::AccountDeposit => "AD",
            OpCode::AccountWithdraw => "AW",
            OpCode::AccountBalance => "AB",
            OpCode::AccountRemove => "AR",
            OpCode::BankAmount => "BA",
            OpCode::BankNumber => "BN",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for OpCode {
    type Err = CommandError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.tag().eq_ignore_ascii_case(token))
            .ok_or(CommandError::UnknownCommand)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command")]
    UnknownCommand,
    #[error("Missing account number.")]
    MissingAccount,
    #[error("Missing amount.")]
    MissingAmount,
    #[error("Format of the account number is not correct.")]
    AccountFormat,
    #[error("Format of the account number or amount is not correct.")]
    AccountOrAmountFormat,
    #[error("Amount must not be negative.")]
    NegativeAmount,
}

/// `<number>/<bank>` as written by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRef {
    pub number: AccountNumber,
    pub bank: String,
    token: String,
}

impl AccountRef {
    pub fn token(&self) -> &str {
        &self.token
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    pub value: Balance,
    token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    BankCode,
    AccountCreate,
    Deposit { target: AccountRef, amount: Amount },
    Withdraw { target: AccountRef, amount: Amount },
    Balance { target: AccountRef },
    Remove { target: AccountRef },
    BankAmount,
    BankNumber,
}

impl Command {
    pub fn op(&self) -> OpCode {
        match self {
            Command::BankCode => OpCode::BankCode,
            Command::AccountCreate => OpCode::AccountCreate,
            Command::Deposit { .. } => OpCode::AccountDeposit,
            Command::Withdraw { .. } => OpCode::AccountWithdraw,
            Command::Balance { .. } => OpCode::AccountBalance,
            Command::Remove { .. } => OpCode::AccountRemove,
            Command::BankAmount => OpCode::BankAmount,
            Command::BankNumber => OpCode::BankNumber,
        }
    }

    /// Account the command is addressed to, if any.
    pub fn target(&self) -> Option<&AccountRef> {
        match self {
            Command::Deposit { target, .. }
            | Command::Withdraw { target, .. }
            | Command::Balance { target }
            | Command::Remove { target } => Some(target),
            _ => None,
        }
    }

    /// Re-serialises the command with the tokens the client sent.
    pub fn to_line(&self) -> String {
        let op = self.op();
        match self {
            Command::Deposit { target, amount } | Command::Withdraw { target, amount } => {
                format!("{op} {} {}", target.token, amount.token)
            }
            Command::Balance { target } | Command::Remove { target } => {
                format!("{op} {}", target.token)
            }
            _ => op.to_string(),
        }
    }

    fn parse_account_command(
        op: OpCode,
        account: Option<&str>,
        amount: Option<&str>,
    ) -> Result<Self, CommandError> {
        let account = account.ok_or(CommandError::MissingAccount)?;
        let (number, bank) = split_account(account)?;
        match op {
            OpCode::AccountDeposit | OpCode::AccountWithdraw => {
                let amount_token = amount.ok_or(CommandError::MissingAmount)?;
                let (Ok(number), Ok(value)) =
                    (number.parse::<AccountNumber>(), amount_token.parse::<i128>())
                else {
                    return Err(CommandError::AccountOrAmountFormat);
                };
                if value < 0 {
                    return Err(CommandError::NegativeAmount);
                }
                let value =
                    Balance::try_from(value).map_err(|_| CommandError::AccountOrAmountFormat)?;
                let target = AccountRef {
                    number,
                    bank: bank.to_owned(),
                    token: account.to_owned(),
                };
                let amount = Amount {
                    value,
                    token: amount_token.to_owned(),
                };
                Ok(if op == OpCode::AccountDeposit {
                    Command::Deposit { target, amount }
                } else {
                    Command::Withdraw { target, amount }
                })
            }
            _ => {
                let number = number
                    .parse::<AccountNumber>()
                    .map_err(|_| CommandError::AccountFormat)?;
                let target = AccountRef {
                    number,
                    bank: bank.to_owned(),
                    token: account.to_owned(),
                };
                Ok(if op == OpCode::AccountBalance {
                    Command::Balance { target }
                } else {
                    Command::Remove { target }
                })
            }
        }
    }
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (op, rest) = next_token(line).ok_or(CommandError::Empty)?;
        let op: OpCode = op.parse()?;
        let (account, rest) = match next_token(rest) {
            Some((account, rest)) => (Some(account), rest),
            None => (None, ""),
        };
        // the third token is everything that is left
        let amount = Some(rest.trim()).filter(|rest| !rest.is_empty());

        match op {
            OpCode::BankCode => Ok(Command::BankCode),
            OpCode::AccountCreate => Ok(Command::AccountCreate),
            OpCode::BankAmount => Ok(Command::BankAmount),
            OpCode::BankNumber => Ok(Command::BankNumber),
            OpCode::AccountDeposit
            | OpCode::AccountWithdraw
            | OpCode::AccountBalance
            | OpCode::AccountRemove => Self::parse_account_command(op, account, amount),
        }
    }
}

fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some(input.split_at(end))
}

fn split_account(token: &str) -> Result<(&str, &str), CommandError> {
    match token.split_once('/') {
        Some((number, bank)) if !number.is_empty() && !bank.is_empty() && !bank.contains('/') => {
            Ok((number, bank))
        }
        _ => Err(CommandError::AccountFormat),
    }
}
