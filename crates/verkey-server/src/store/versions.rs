//! Version CRUD and the "one latest version per app" bookkeeping.
//!
//! Invariants kept by every operation here:
//! - an app with at least one version has exactly one version flagged latest,
//!   an app with none has zero;
//! - an app's first version is latest no matter what the caller asked for;
//! - removing or demoting the latest version hands the flag to the most
//!   recently created remaining version.
//!
//! Each public operation is one redb write transaction. Any error returns
//! before `commit`, dropping the transaction and discarding every change.

use redb::{ReadableMultimapTable, ReadableTable};
use tracing::debug;

use super::apps::app_not_found;
use super::db::{
    encode, next_version_seq, read, version_set, Store, APPS, APP_VERSIONS, COUNTERS, VERSIONS,
};
use super::model::{NewVersion, Page, Version, VersionRecord, VersionUpdate};
use crate::error::{Error, Result};
use crate::keys;

type VersionTable<'txn> = redb::Table<'txn, &'static str, &'static [u8]>;

impl Store {
    /// Create a version under `akey`.
    ///
    /// If `draft.is_latest` is set the flag moves to the new version. Otherwise
    /// the new version is latest only when it is the app's first.
    pub fn create_version(&self, akey: &str, draft: NewVersion) -> Result<Version> {
        let vkey = keys::new_vkey();
        let now = Self::now();

        let write_txn = self.db.begin_write()?;
        let created = {
            let apps = write_txn.open_table(APPS)?;
            let mut versions = write_txn.open_table(VERSIONS)?;
            let mut index = write_txn.open_multimap_table(APP_VERSIONS)?;
            let mut counters = write_txn.open_table(COUNTERS)?;

            if apps.get(akey)?.is_none() {
                return Err(app_not_found());
            }
            if versions.get(vkey.as_str())?.is_some() {
                return Err(Error::conflict("generated version key already exists"));
            }

            let siblings = version_set(&versions, &index, akey)?;
            let is_latest = if draft.is_latest {
                clear_latest(&mut versions, &siblings, None)?;
                true
            } else {
                siblings.is_empty()
            };

            let record = VersionRecord {
                akey: akey.to_owned(),
                version: draft.version.trim().to_owned(),
                description: draft.description,
                is_latest,
                is_forced_update: draft.is_forced_update,
                created_at: now,
                seq: next_version_seq(&mut counters)?,
            };
            versions.insert(vkey.as_str(), encode(&record)?.as_slice())?;
            index.insert(akey, vkey.as_str())?;
            record
        };
        write_txn.commit()?;

        debug!(akey = %akey, vkey = %vkey, is_latest = created.is_latest, "stored version");
        Ok(created.into_version(vkey))
    }

    pub fn get_version(&self, vkey: &str) -> Result<Version> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let record: VersionRecord = read(&versions, vkey)?.ok_or_else(version_not_found)?;
        Ok(record.into_version(vkey.to_owned()))
    }

    /// Versions of `akey`, newest first, with the total count.
    pub fn list_versions(&self, akey: &str, page: Page) -> Result<(Vec<Version>, u64)> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        let set = version_set(&versions, &index, akey)?;
        let total = set.len() as u64;
        let page = set
            .into_iter()
            .skip(page.offset())
            .take(page.size)
            .map(|(vkey, record)| record.into_version(vkey))
            .collect();
        Ok((page, total))
    }

    /// The version currently flagged latest for `akey`, if any.
    pub fn latest_version(&self, akey: &str) -> Result<Option<Version>> {
        let read_txn = self.db.begin_read()?;
        let versions = read_txn.open_table(VERSIONS)?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;

        Ok(version_set(&versions, &index, akey)?
            .into_iter()
            .find(|(_, r)| r.is_latest)
            .map(|(vkey, r)| r.into_version(vkey)))
    }

    pub fn count_versions(&self, akey: &str) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_multimap_table(APP_VERSIONS)?;
        Ok(index.get(akey)?.count())
    }

    /// Update a version in place.
    ///
    /// Empty `version`/`description` keep the stored value. `is_latest = true`
    /// moves the flag here. `is_latest = false` on the current latest version
    /// hands the flag to the most recent other version; an app's only version
    /// stays latest.
    pub fn update_version(&self, vkey: &str, update: VersionUpdate) -> Result<Version> {
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut versions = write_txn.open_table(VERSIONS)?;
            let index = write_txn.open_multimap_table(APP_VERSIONS)?;

            let mut target: VersionRecord =
                read(&versions, vkey)?.ok_or_else(version_not_found)?;
            let siblings = version_set(&versions, &index, &target.akey)?;

            let version = update.version.trim();
            if !version.is_empty() {
                target.version = version.to_owned();
            }
            if !update.description.is_empty() {
                target.description = update.description;
            }
            target.is_forced_update = update.is_forced_update;

            if update.is_latest {
                clear_latest(&mut versions, &siblings, Some(vkey))?;
                target.is_latest = true;
            } else if target.is_latest {
                let successor = siblings.into_iter().find(|(k, _)| k != vkey);
                if let Some((next_vkey, mut next)) = successor {
                    next.is_latest = true;
                    versions.insert(next_vkey.as_str(), encode(&next)?.as_slice())?;
                    target.is_latest = false;
                    debug!(from = %vkey, to = %next_vkey, "latest flag handed over");
                }
            }

            versions.insert(vkey, encode(&target)?.as_slice())?;
            target
        };
        write_txn.commit()?;

        Ok(updated.into_version(vkey.to_owned()))
    }

    /// Delete a version. If it was latest, the most recently created remaining
    /// version of the app becomes latest.
    pub fn delete_version(&self, vkey: &str) -> Result<Version> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut versions = write_txn.open_table(VERSIONS)?;
            let mut index = write_txn.open_multimap_table(APP_VERSIONS)?;

            let record: VersionRecord = read(&versions, vkey)?.ok_or_else(version_not_found)?;
            versions.remove(vkey)?;
            index.remove(record.akey.as_str(), vkey)?;

            if record.is_latest {
                let remaining = version_set(&versions, &index, &record.akey)?;
                if let Some((next_vkey, mut next)) = remaining.into_iter().next() {
                    next.is_latest = true;
                    versions.insert(next_vkey.as_str(), encode(&next)?.as_slice())?;
                    debug!(akey = %record.akey, vkey = %next_vkey, "re-elected latest version");
                }
            }
            record
        };
        write_txn.commit()?;

        Ok(removed.into_version(vkey.to_owned()))
    }
}

/// Clear `is_latest` on every version in `set` except `keep`.
fn clear_latest(
    versions: &mut VersionTable<'_>,
    set: &[(String, VersionRecord)],
    keep: Option<&str>,
) -> Result<()> {
    for (vkey, record) in set {
        if record.is_latest && Some(vkey.as_str()) != keep {
            let mut demoted = record.clone();
            demoted.is_latest = false;
            versions.insert(vkey.as_str(), encode(&demoted)?.as_slice())?;
        }
    }
    Ok(())
}

pub(crate) fn version_not_found() -> Error {
    Error::not_found("version not found")
}
