use std::collections::BTreeMap;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::account::{AccountNumber, Balance, LedgerError, MAX_ACCOUNT_NUMBER, MIN_ACCOUNT_NUMBER};

pub mod csv_store;
pub mod in_memory_store;

/// Full account mapping, ordered by account number.
pub type Snapshot = BTreeMap<AccountNumber, Balance>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("Unexpected snapshot header `{found}`, expected `account,balance`")]
    Header { found: String },
    #[error("Account number {account} is outside of the allowed range")]
    InvalidAccount { account: AccountNumber },
    #[error("Account {account} is listed more than once")]
    DuplicateAccount { account: AccountNumber },
}

/// Durable home of the ledger snapshot.
///
/// The ledger only ever asks for the whole snapshot on startup and hands
/// over the whole snapshot after each mutation, so an implementation is free
/// to store it incrementally as long as `load` returns the last saved state.
pub trait SnapshotStore: Send + Sync {
    /// `Ok(None)` means nothing was stored yet.
    fn load(&self) -> Result<Option<Snapshot>, StoreError>;

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// Account balances of this bank.
///
/// Every operation, including the snapshot write that follows a mutation,
/// runs under one ledger-wide lock.
pub struct Ledger {
    accounts: Mutex<Snapshot>,
    store: Box<dyn SnapshotStore>,
}

impl Ledger {
    pub fn open(store: impl SnapshotStore + 'static) -> Self {
        let accounts = match store.load() {
            Ok(Some(snapshot)) => {
                info!(accounts = snapshot.len(), "Loaded ledger snapshot");
                snapshot
            }
            Ok(None) => {
                info!("No ledger snapshot found, starting with an empty ledger");
                Snapshot::new()
            }
            Err(err) => {
                error!("Failed to load ledger snapshot, starting with an empty ledger: {err}");
                Snapshot::new()
            }
        };
        Self {
            accounts: Mutex::new(accounts),
            store: Box::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::open(in_memory_store::InMemorySnapshotStore::default())
    }

    pub fn create_account(&self) -> Result<AccountNumber, LedgerError> {
        let mut accounts = self.accounts.lock();
        let account = (MIN_ACCOUNT_NUMBER..=MAX_ACCOUNT_NUMBER)
            .find(|number| !accounts.contains_key(number))
            .ok_or(LedgerError::Exhausted)?;
        accounts.insert(account, 0);
        self.persist(&accounts);
        debug!(account, "Account created");
        Ok(account)
    }

    pub fn deposit(&self, account: AccountNumber, amount: Balance) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.lock();
        let balance = accounts
            .get_mut(&account)
            .ok_or(LedgerError::NotFound { account })?;
        *balance = balance
            .checked_add(amount)
            .ok_or(LedgerError::BalanceOverflow { account })?;
        debug!(account, amount, balance = *balance, "Deposited");
        self.persist(&accounts);
        Ok(())
    }

    pub fn withdraw(&self, account: AccountNumber, amount: Balance) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.lock();
        let balance = accounts
            .get_mut(&account)
            .ok_or(LedgerError::NotFound { account })?;
        if *balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account,
                requested: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        debug!(account, amount, balance = *balance, "Withdrawn");
        self.persist(&accounts);
        Ok(())
    }

    pub fn balance(&self, account: AccountNumber) -> Result<Balance, LedgerError> {
        self.accounts
            .lock()
            .get(&account)
            .copied()
            .ok_or(LedgerError::NotFound { account })
    }

    pub fn remove_account(&self, account: AccountNumber) -> Result<(), LedgerError> {
        let mut accounts = self.accounts.lock();
        match accounts.get(&account) {
            None => return Err(LedgerError::NotFound { account }),
            Some(&balance) if balance != 0 => {
                return Err(LedgerError::NonZeroBalance { account, balance });
            }
            Some(_) => {}
        }
        accounts.remove(&account);
        debug!(account, "Account removed");
        self.persist(&accounts);
        Ok(())
    }

    /// Sum of all balances, widened so it cannot overflow.
    pub fn total_amount(&self) -> u128 {
        self.accounts
            .lock()
            .values()
            .map(|&balance| u128::from(balance))
            .sum()
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().len()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.accounts.lock().clone()
    }

    // Called with the lock held so snapshot writes are never interleaved.
    fn persist(&self, accounts: &Snapshot) {
        if let Err(err) = self.store.save(accounts) {
            error!("Failed to persist ledger snapshot: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::in_memory_store::InMemorySnapshotStore;
    use super::*;

    struct FailingStore;

    impl SnapshotStore for FailingStore {
        fn load(&self) -> Result<Option<Snapshot>, StoreError> {
            Err(StoreError::DuplicateAccount { account: 10000 })
        }

        fn save(&self, _snapshot: &Snapshot) -> Result<(), StoreError> {
            Err(std::io::Error::other("disk full").into())
        }
    }

    #[test]
    fn create_accounts_in_ascending_order() {
        let ledger = Ledger::in_memory();
        let created: Vec<_> = (0..5).map(|_| ledger.create_account().unwrap()).collect();
        assert_eq!(created, vec![10000, 10001, 10002, 10003, 10004]);
        assert_eq!(ledger.account_count(), 5);

        // the lowest free number is reused
        ledger.remove_account(10002).unwrap();
        assert_eq!(ledger.create_account().unwrap(), 10002);
        assert_eq!(ledger.create_account().unwrap(), 10005);
    }

    #[test]
    fn exhausted_range() {
        let full: Snapshot = (MIN_ACCOUNT_NUMBER..=MAX_ACCOUNT_NUMBER)
            .map(|number| (number, 0))
            .collect();
        assert_eq!(full.len(), 90000);
        let ledger = Ledger::open(InMemorySnapshotStore::with_snapshot(full));
        assert_eq!(ledger.create_account().unwrap_err(), LedgerError::Exhausted);

        ledger.remove_account(54321).unwrap();
        assert_eq!(ledger.create_account().unwrap(), 54321);
        assert_eq!(ledger.create_account().unwrap_err(), LedgerError::Exhausted);
    }

    #[test]
    fn deposit_and_withdraw() {
        let ledger = Ledger::in_memory();
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, 500).unwrap();
        ledger.deposit(acc, 0).unwrap();
        assert_eq!(ledger.balance(acc).unwrap(), 500);

        let err = ledger.withdraw(acc, 501).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account: acc,
                requested: 501,
                available: 500
            }
        );
        assert_eq!(ledger.balance(acc).unwrap(), 500);

        ledger.withdraw(acc, 200).unwrap();
        assert_eq!(ledger.balance(acc).unwrap(), 300);
        ledger.withdraw(acc, 300).unwrap();
        assert_eq!(ledger.balance(acc).unwrap(), 0);
    }

    #[test]
    fn deposit_overflow_is_rejected() {
        let ledger = Ledger::in_memory();
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, Balance::MAX).unwrap();
        assert_eq!(
            ledger.deposit(acc, 1).unwrap_err(),
            LedgerError::BalanceOverflow { account: acc }
        );
        assert_eq!(ledger.balance(acc).unwrap(), Balance::MAX);
    }

    #[test]
    fn missing_account() {
        let ledger = Ledger::in_memory();
        let not_found = LedgerError::NotFound { account: 12345 };
        assert_eq!(ledger.deposit(12345, 1).unwrap_err(), not_found);
        assert_eq!(ledger.withdraw(12345, 1).unwrap_err(), not_found);
        assert_eq!(ledger.balance(12345).unwrap_err(), not_found);
        assert_eq!(ledger.remove_account(12345).unwrap_err(), not_found);
    }

    #[test]
    fn remove_only_empty_accounts() {
        let ledger = Ledger::in_memory();
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, 10).unwrap();
        assert_eq!(
            ledger.remove_account(acc).unwrap_err(),
            LedgerError::NonZeroBalance {
                account: acc,
                balance: 10
            }
        );
        assert_eq!(ledger.account_count(), 1);

        ledger.withdraw(acc, 10).unwrap();
        ledger.remove_account(acc).unwrap();
        assert_eq!(ledger.account_count(), 0);
        assert_eq!(
            ledger.balance(acc).unwrap_err(),
            LedgerError::NotFound { account: acc }
        );
    }

    #[test]
    fn totals() {
        let ledger = Ledger::in_memory();
        assert_eq!(ledger.total_amount(), 0);
        assert_eq!(ledger.account_count(), 0);
        let a = ledger.create_account().unwrap();
        let b = ledger.create_account().unwrap();
        ledger.deposit(a, Balance::MAX).unwrap();
        ledger.deposit(b, 1).unwrap();
        assert_eq!(ledger.total_amount(), u128::from(Balance::MAX) + 1);
        assert_eq!(ledger.account_count(), 2);
    }

    #[test]
    fn every_mutation_is_persisted() {
        let store = InMemorySnapshotStore::default();
        let ledger = Ledger::open(store.clone());
        let acc = ledger.create_account().unwrap();
        assert_eq!(store.stored(), Some(Snapshot::from([(acc, 0)])));
        ledger.deposit(acc, 70).unwrap();
        assert_eq!(store.stored(), Some(Snapshot::from([(acc, 70)])));
        ledger.withdraw(acc, 70).unwrap();
        assert_eq!(store.stored(), Some(Snapshot::from([(acc, 0)])));
        ledger.remove_account(acc).unwrap();
        assert_eq!(store.stored(), Some(Snapshot::new()));
        assert_eq!(store.save_count(), 4);

        // failed operations and reads do not touch the store
        let _ = ledger.withdraw(acc, 1);
        let _ = ledger.balance(acc);
        assert_eq!(store.save_count(), 4);
    }

    #[test]
    fn store_failures_are_absorbed() {
        let ledger = Ledger::open(FailingStore);
        assert_eq!(ledger.account_count(), 0);
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, 5).unwrap();
        assert_eq!(ledger.balance(acc).unwrap(), 5);
    }

    #[test]
    fn concurrent_deposits_are_not_lost() {
        let ledger = Arc::new(Ledger::in_memory());
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, 1000).unwrap();

        let handles: Vec<_> = (1..=8u64)
            .map(|worker| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        ledger.deposit(acc, worker).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // 250 * (1 + 2 + ... + 8)
        assert_eq!(ledger.balance(acc).unwrap(), 1000 + 250 * 36);
    }

    #[test]
    fn concurrent_withdrawals_never_overdraw() {
        let ledger = Arc::new(Ledger::in_memory());
        let acc = ledger.create_account().unwrap();
        ledger.deposit(acc, 100).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    (0..50).filter(|_| ledger.withdraw(acc, 1).is_ok()).count()
                })
            })
            .collect();
        let succeeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(succeeded, 100);
        assert_eq!(ledger.balance(acc).unwrap(), 0);
    }
}
