pub mod admin;
pub mod announcements;
pub mod api_keys;
pub mod apps;
pub mod check;
pub mod db;
pub mod model;
pub mod versions;

pub use admin::AdminRecord;
pub use announcements::{Announcement, NewAnnouncement};
pub use api_keys::ApiKeyRecord;
pub use check::{IllegalReason, Legality, UpdateCheck};
pub use db::Store;
pub use model::{App, AppUpdate, NewVersion, Page, Stats, Version, VersionUpdate};
