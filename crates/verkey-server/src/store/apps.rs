use redb::{ReadableMultimapTable, ReadableTable};
use tracing::debug;

use super::db::{decode, encode, read, vkeys_of, Store, APPS, APP_VERSIONS, VERSIONS};
use super::model::{App, AppRecord, AppUpdate, Page, Stats, VersionRecord};
use crate::error::{Error, Result};
use crate::keys;

const RECENT_LIMIT: usize = 5;

impl Store {
    /// Create an app owned by `owner`, assigning a fresh AKey.
    pub fn create_app(
        &self,
        owner: &str,
        name: &str,
        description: &str,
        is_paid: bool,
    ) -> Result<App> {
        let akey = keys::new_akey();
        let record = AppRecord {
            owner: owner.to_owned(),
            name: name.trim().to_owned(),
            description: description.to_owned(),
            is_paid,
            is_banned: false,
            ban_reason: None,
            created_at: Self::now(),
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(APPS)?;
            if table.get(akey.as_str())?.is_some() {
                return Err(Error::conflict("generated app key already exists"));
            }
            table.insert(akey.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;

        debug!(akey = %akey, "stored app");
        Ok(record.into_app(akey, 0))
    }

    /// Fetch an app with its current version count.
    pub fn get_app(&self, akey: &str) -> Result<App> {
        let read_txn = self.db.begin_read()?;
        let apps = read_txn.open_table(APPS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        let record: AppRecord = read(&apps, akey)?.ok_or_else(app_not_found)?;
        let count = index.get(akey)?.count() as u64;
        Ok(record.into_app(akey.to_owned(), count))
    }

    /// List apps, newest first. `owner = None` lists every app.
    pub fn list_apps(&self, owner: Option<&str>, page: Page) -> Result<(Vec<App>, u64)> {
        let mut apps = self.scan_apps(owner)?;
        let total = apps.len() as u64;
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let apps = apps
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .collect();
        Ok((apps, total))
    }

    /// Apply name/description/paid changes. Empty strings are ignored.
    pub fn update_app(&self, akey: &str, update: AppUpdate) -> Result<App> {
        self.modify_app(akey, |record| {
            if let Some(name) = update.name.filter(|n| !n.trim().is_empty()) {
                record.name = name.trim().to_owned();
            }
            if let Some(desc) = update.description.filter(|d| !d.is_empty()) {
                record.description = desc;
            }
            if let Some(paid) = update.is_paid {
                record.is_paid = paid;
            }
        })
    }

    /// Ban or unban an app. Unbanning clears the reason.
    pub fn ban_app(&self, akey: &str, banned: bool, reason: Option<String>) -> Result<App> {
        self.modify_app(akey, |record| {
            record.is_banned = banned;
            record.ban_reason = if banned { reason } else { None };
        })
    }

    /// Delete an app and every version under it in one transaction.
    pub fn delete_app(&self, akey: &str) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut apps = write_txn.open_table(APPS)?;
            let mut versions = write_txn.open_table(VERSIONS)?;
            let mut index = write_txn.open_multimap_table(APP_VERSIONS)?;

            if apps.remove(akey)?.is_none() {
                return Err(app_not_found());
            }
            let vkeys = vkeys_of(&index, akey)?;
            for vkey in &vkeys {
                versions.remove(vkey.as_str())?;
            }
            index.remove_all(akey)?;
            vkeys.len()
        };
        write_txn.commit()?;

        debug!(akey = %akey, versions = removed, "deleted app");
        Ok(())
    }

    /// Totals plus the most recent apps and versions, scoped to `owner` if given.
    pub fn stats(&self, owner: Option<&str>) -> Result<Stats> {
        let mut apps = self.scan_apps(owner)?;
        apps.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;

        let mut all_versions: Vec<(String, VersionRecord)> = Vec::new();
        for item in versions.iter()? {
            let (k, v) = item?;
            let record: VersionRecord = decode(v.value())?;
            let visible = owner.is_none() || apps.iter().any(|a| a.akey == record.akey);
            if visible {
                all_versions.push((k.value().to_owned(), record));
            }
        }
        all_versions.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));

        Ok(Stats {
            total_apps: apps.len() as u64,
            total_versions: all_versions.len() as u64,
            recent_apps: apps.into_iter().take(RECENT_LIMIT).collect(),
            recent_versions: all_versions
                .into_iter()
                .take(RECENT_LIMIT)
                .map(|(vkey, r)| r.into_version(vkey))
                .collect(),
        })
    }

    fn scan_apps(&self, owner: Option<&str>) -> Result<Vec<App>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(APPS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        let mut apps = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            let record: AppRecord = decode(v.value())?;
            if owner.map_or(true, |o| record.owner == o) {
                let akey = k.value().to_owned();
                let count = index.get(akey.as_str())?.count() as u64;
                apps.push(record.into_app(akey, count));
            }
        }
        Ok(apps)
    }

    fn modify_app(&self, akey: &str, apply: impl FnOnce(&mut AppRecord)) -> Result<App> {
        let write_txn = self.db.begin_write()?;
        let app = {
            let mut apps = write_txn.open_table(APPS)?;
            let index = write_txn.open_multimap_table(APP_VERSIONS)?;

            let mut record: AppRecord = read(&apps, akey)?.ok_or_else(app_not_found)?;
            apply(&mut record);
            apps.insert(akey, encode(&record)?.as_slice())?;

            let count = index.get(akey)?.count() as u64;
            record.into_app(akey.to_owned(), count)
        };
        write_txn.commit()?;
        Ok(app)
    }
}

pub(crate) fn app_not_found() -> Error {
    Error::not_found("app not found")
}
