use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::db::{encode, read, Store};
use crate::error::Result;

pub(crate) const ADMIN: TableDefinition<&str, &[u8]> = TableDefinition::new("admin");
const ADMIN_KEY: &str = "admin";

/// The single administrator credential. `password_hash` is an argon2 PHC
/// string; plaintext never reaches the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminRecord {
    pub username: String,
    pub password_hash: String,
    pub updated_at: i64,
}

impl Store {
    pub fn admin(&self) -> Result<Option<AdminRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ADMIN)?;
        read(&table, ADMIN_KEY)
    }

    /// Store the admin credential unless one exists. Returns true if inserted.
    pub fn seed_admin(&self, username: &str, password_hash: &str) -> Result<bool> {
        let write_txn = self.db.begin_write()?;
        let inserted = {
            let mut table = write_txn.open_table(ADMIN)?;
            if table.get(ADMIN_KEY)?.is_some() {
                false
            } else {
                let record = AdminRecord {
                    username: username.to_owned(),
                    password_hash: password_hash.to_owned(),
                    updated_at: Self::now(),
                };
                table.insert(ADMIN_KEY, encode(&record)?.as_slice())?;
                true
            }
        };
        write_txn.commit()?;
        Ok(inserted)
    }

    /// Replace the stored password hash.
    pub fn set_admin_password(&self, password_hash: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ADMIN)?;
            let mut record: AdminRecord = read(&table, ADMIN_KEY)?
                .ok_or_else(|| anyhow::anyhow!("admin credential missing"))?;
            record.password_hash = password_hash.to_owned();
            record.updated_at = Self::now();
            table.insert(ADMIN_KEY, encode(&record)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
