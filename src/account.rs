use thiserror::Error;

pub type AccountNumber = u32;
pub type Balance = u64;

pub const MIN_ACCOUNT_NUMBER: AccountNumber = 10000;
pub const MAX_ACCOUNT_NUMBER: AccountNumber = 99999;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Account {account} does not exist.")]
    NotFound { account: AccountNumber },
    #[error(
        "Insufficient funds on account {account}: requested {requested}, available {available}."
    )]
    InsufficientFunds {
        account: AccountNumber,
        requested: Balance,
        available: Balance,
    },
    #[error("Account {account} cannot be removed, its balance is {balance}.")]
    NonZeroBalance {
        account: AccountNumber,
        balance: Balance,
    },
    #[error("No free account numbers are left in this bank.")]
    Exhausted,
    #[error("Deposit would overflow the balance of account {account}.")]
    BalanceOverflow { account: AccountNumber },
}

/// Returns `true` when `number` falls inside the range this bank hands out.
pub fn is_valid_account_number(number: AccountNumber) -> bool {
    (MIN_ACCOUNT_NUMBER..=MAX_ACCOUNT_NUMBER).contains(&number)
}
