use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, Trim, WriterBuilder};
use serde::{Deserialize, Serialize};

use crate::account::{AccountNumber, Balance, is_valid_account_number};

use super::{Snapshot, SnapshotStore, StoreError};

const HEADER: [&str; 2] = ["account", "balance"];

#[derive(Debug, Serialize, Deserialize)]
struct AccountRow {
    account: AccountNumber,
    balance: Balance,
}

/// Stores the snapshot as a CSV file with one `account,balance` row per account.
///
/// The whole file is rewritten on every save: rows go to a sibling `.tmp`
/// file which then replaces the target, so a crash leaves either the old or
/// the new snapshot on disk.
#[derive(Debug, Clone)]
pub struct CsvSnapshotStore {
    path: PathBuf,
}

impl CsvSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SnapshotStore for CsvSnapshotStore {
    fn load(&self) -> Result<Option<Snapshot>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let mut reader = ReaderBuilder::new().trim(Trim::All).from_reader(file);

        let headers = reader.headers()?;
        if headers.is_empty() {
            // an empty file is an empty ledger
            return Ok(Some(Snapshot::new()));
        }
        if headers.iter().ne(HEADER) {
            return Err(StoreError::Header {
                found: headers.iter().collect::<Vec<_>>().join(","),
            });
        }

        let mut snapshot = Snapshot::new();
        for row in reader.deserialize() {
            let AccountRow { account, balance } = row?;
            if !is_valid_account_number(account) {
                return Err(StoreError::InvalidAccount { account });
            }
            if snapshot.insert(account, balance).is_some() {
                return Err(StoreError::DuplicateAccount { account });
            }
        }
        Ok(Some(snapshot))
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.temp_path();
        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_path(&temp_path)?;
        writer.write_record(HEADER)?;
        for (&account, &balance) in snapshot {
            writer.serialize(AccountRow { account, balance })?;
        }
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_file_is_no_snapshot() {
        let dir = tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path().join("accounts.csv"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path().join("accounts.csv"));
        let snapshot = Snapshot::from([(10001, 5000), (10002, 12000)]);
        store.save(&snapshot).unwrap();

        assert_eq!(
            fs::read_to_string(store.path()).unwrap(),
            "account,balance\n10001,5000\n10002,12000\n"
        );
        assert_eq!(store.load().unwrap(), Some(snapshot));
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn save_replaces_previous_snapshot() {
        let dir = tempdir().unwrap();
        let store = CsvSnapshotStore::new(dir.path().join("nested/accounts.csv"));
        store.save(&Snapshot::from([(10000, 1), (10001, 2)])).unwrap();
        store.save(&Snapshot::new()).unwrap();
        assert_eq!(store.load().unwrap(), Some(Snapshot::new()));
    }

    #[test]
    fn tolerates_whitespace() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        fs::write(&path, "account, balance\n 10000 , 42\n").unwrap();
        let store = CsvSnapshotStore::new(path);
        assert_eq!(store.load().unwrap(), Some(Snapshot::from([(10000, 42)])));
    }

    #[test]
    fn empty_file_is_empty_ledger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        fs::write(&path, "").unwrap();
        assert_eq!(
            CsvSnapshotStore::new(path).load().unwrap(),
            Some(Snapshot::new())
        );
    }

    #[test]
    fn malformed_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        let store = CsvSnapshotStore::new(&path);

        fs::write(&path, "id;amount\n10000;5\n").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Header { .. })));

        fs::write(&path, "account,balance\n10000,-5\n").unwrap();
        assert!(matches!(store.load(), Err(StoreError::Csv(_))));

        fs::write(&path, "account,balance\n123,5\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::InvalidAccount { account: 123 })
        ));

        fs::write(&path, "account,balance\n10000,5\n10000,6\n").unwrap();
        assert!(matches!(
            store.load(),
            Err(StoreError::DuplicateAccount { account: 10000 })
        ));
    }

    #[test]
    fn ledger_falls_back_to_empty_on_malformed_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        fs::write(&path, "garbage\n").unwrap();
        let ledger = crate::ledger::Ledger::open(CsvSnapshotStore::new(&path));
        assert_eq!(ledger.account_count(), 0);

        // the next mutation overwrites the malformed file
        ledger.create_account().unwrap();
        assert_eq!(
            CsvSnapshotStore::new(&path).load().unwrap(),
            Some(Snapshot::from([(10000, 0)]))
        );
    }

    #[test]
    fn ledger_survives_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("accounts.csv");
        {
            let ledger = crate::ledger::Ledger::open(CsvSnapshotStore::new(&path));
            let a = ledger.create_account().unwrap();
            let b = ledger.create_account().unwrap();
            ledger.deposit(a, 5000).unwrap();
            ledger.deposit(b, 12000).unwrap();
        }
        let ledger = crate::ledger::Ledger::open(CsvSnapshotStore::new(&path));
        assert_eq!(
            ledger.snapshot(),
            Snapshot::from([(10000, 5000), (10001, 12000)])
        );
    }
}
