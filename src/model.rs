use chrono::{DateTime, offset::Utc};
use diesel::{AsChangeset, Identifiable, Queryable, Selectable};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::video;

/// Catalog entry for a single video.
///
/// Records are created elsewhere, the ingest handlers only ever replace the URL columns (and bump
/// `update_timestamp`). All other columns are written back unchanged.
#[derive(
    AsChangeset,
    Clone,
    Debug,
    Deserialize,
    Identifiable,
    PartialEq,
    Queryable,
    Selectable,
    Serialize,
)]
#[diesel(table_name = video)]
#[diesel(treat_none_as_null = true)]
pub struct VideoRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
    /// Either an absolute URL or a `bucket,key` pair that is signed on read.
    pub video_url: Option<String>,
    pub creation_timestamp: DateTime<Utc>,
    pub update_timestamp: DateTime<Utc>,
}

impl VideoRecord {
    pub fn is_owned_by(&self, owner_id: &Uuid) -> bool {
        self.owner_id == *owner_id
    }
}
