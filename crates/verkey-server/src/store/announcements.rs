use chrono::{DateTime, Utc};
use redb::{ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::db::{decode, encode, read, Store};
use super::model::timestamp;
use crate::error::{Error, Result};

pub(crate) const ANNOUNCEMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("announcements");

/// Stored in redb (keyed by id) as bincode-encoded bytes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnnouncementRecord {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub is_active: bool,
    /// Unix timestamp (milliseconds).
    pub publish_date: i64,
}

impl AnnouncementRecord {
    fn into_announcement(self, id: String) -> Announcement {
        Announcement {
            id,
            title: self.title,
            content: self.content,
            url: self.url,
            is_active: self.is_active,
            publish_date: timestamp(self.publish_date),
        }
    }
}

/// Dashboard announcement as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    pub is_active: bool,
    pub publish_date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewAnnouncement {
    pub title: String,
    pub content: String,
    pub url: Option<String>,
    /// Defaults to now.
    pub publish_date: Option<DateTime<Utc>>,
}

fn announcement_not_found() -> Error {
    Error::not_found("announcement not found")
}

impl Store {
    /// Store a new, active announcement.
    pub fn create_announcement(&self, draft: NewAnnouncement) -> Result<Announcement> {
        let id = Uuid::new_v4().simple().to_string();
        let record = AnnouncementRecord {
            title: draft.title.trim().to_owned(),
            content: draft.content,
            url: draft.url.filter(|u| !u.trim().is_empty()),
            is_active: true,
            publish_date: draft
                .publish_date
                .map_or_else(Self::now, |d| d.timestamp_millis()),
        };
        let bytes = encode(&record)?;

        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ANNOUNCEMENTS)?;
            table.insert(id.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(record.into_announcement(id))
    }

    /// Show or hide an announcement on the dashboard.
    pub fn set_announcement_active(&self, id: &str, active: bool) -> Result<Announcement> {
        let write_txn = self.db.begin_write()?;
        let record = {
            let mut table = write_txn.open_table(ANNOUNCEMENTS)?;
            let mut record: AnnouncementRecord =
                read(&table, id)?.ok_or_else(announcement_not_found)?;
            record.is_active = active;
            table.insert(id, encode(&record)?.as_slice())?;
            record
        };
        write_txn.commit()?;
        Ok(record.into_announcement(id.to_owned()))
    }

    /// Active announcements, newest publish date first.
    pub fn active_announcements(&self) -> Result<Vec<Announcement>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ANNOUNCEMENTS)?;

        let mut active = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            let record: AnnouncementRecord = decode(v.value())?;
            if record.is_active {
                active.push((k.value().to_owned(), record));
            }
        }
        active.sort_by(|a, b| b.1.publish_date.cmp(&a.1.publish_date));
        Ok(active
            .into_iter()
            .map(|(id, r)| r.into_announcement(id))
            .collect())
    }
}
