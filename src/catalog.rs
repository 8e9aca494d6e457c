use async_trait::async_trait;
use diesel::{OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::{
    AsyncPgConnection, RunQueryDsl,
    pooled_connection::{
        AsyncDieselConnectionManager,
        deadpool::{Object, Pool},
    },
};
use uuid::Uuid;

use crate::{error::Error, model::VideoRecord, schema::video};

/// Narrow gateway to the video catalog. The ingest pipeline reads one record and writes it back,
/// it never creates or deletes records.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, Error>;

    /// Replaces the stored record with the same id. Last writer wins.
    async fn put(&self, record: &VideoRecord) -> Result<(), Error>;
}

pub type DbConnection = Object<AsyncPgConnection>;

pub struct PgCatalog {
    pool: Pool<AsyncPgConnection>,
}

impl PgCatalog {
    pub fn new(database_url: &str, max_connections: usize) -> Result<Self, String> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
        let pool = Pool::builder(manager)
            .max_size(max_connections)
            .build()
            .map_err(|e| format!("Failed to initialise connection pool: {e}"))?;
        Ok(Self { pool })
    }

    async fn acquire_db_connection(&self) -> Result<DbConnection, Error> {
        self.pool.get().await.map_err(|e| {
            log::error!("Failed to acquire database connection: {e}");
            Error::DatabaseConnectionError
        })
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, Error> {
        let mut connection = self.acquire_db_connection().await?;
        video::table
            .find(id)
            .select(VideoRecord::as_select())
            .get_result::<VideoRecord>(&mut connection)
            .await
            .optional()
            .map_err(Error::from)
    }

    async fn put(&self, record: &VideoRecord) -> Result<(), Error> {
        let mut connection = self.acquire_db_connection().await?;
        let updated = diesel::update(video::table.find(record.id))
            .set(record)
            .execute(&mut connection)
            .await
            .map_err(|e| Error::CatalogWriteError(e.to_string()))?;

        if updated == 0 {
            return Err(Error::CatalogWriteError(format!(
                "no video record with id {} to update",
                record.id
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use uuid::Uuid;

    use super::Catalog;
    use crate::{error::Error, model::VideoRecord};

    /// Catalog kept in memory that counts writes and can be told to fail them.
    #[derive(Default)]
    pub struct MemoryCatalog {
        records: Mutex<HashMap<Uuid, VideoRecord>>,
        writes: Mutex<usize>,
        fail_writes: bool,
    }

    impl MemoryCatalog {
        pub fn with_record(record: VideoRecord) -> Self {
            let catalog = Self::default();
            catalog.records.lock().insert(record.id, record);
            catalog
        }

        pub fn failing_writes(mut self) -> Self {
            self.fail_writes = true;
            self
        }

        pub fn record(&self, id: &Uuid) -> Option<VideoRecord> {
            self.records.lock().get(id).cloned()
        }

        pub fn write_count(&self) -> usize {
            *self.writes.lock()
        }
    }

    #[async_trait]
    impl Catalog for MemoryCatalog {
        async fn get(&self, id: Uuid) -> Result<Option<VideoRecord>, Error> {
            Ok(self.records.lock().get(&id).cloned())
        }

        async fn put(&self, record: &VideoRecord) -> Result<(), Error> {
            if self.fail_writes {
                return Err(Error::CatalogWriteError(String::from("writes disabled")));
            }
            let mut records = self.records.lock();
            if !records.contains_key(&record.id) {
                return Err(Error::CatalogWriteError(format!(
                    "no video record with id {}",
                    record.id
                )));
            }
            records.insert(record.id, record.clone());
            *self.writes.lock() += 1;
            Ok(())
        }
    }

    pub fn video_record(id: Uuid, owner_id: Uuid) -> VideoRecord {
        let now = Utc::now();
        VideoRecord {
            id,
            owner_id,
            title: String::from("Boots on the ground"),
            description: Some(String::from("A short clip")),
            thumbnail_url: None,
            video_url: None,
            creation_timestamp: now,
            update_timestamp: now,
        }
    }

    #[tokio::test]
    async fn test_memory_catalog_replaces_existing_records_only() {
        let id = Uuid::new_v4();
        let catalog = MemoryCatalog::with_record(video_record(id, Uuid::new_v4()));

        let mut record = catalog.get(id).await.unwrap().unwrap();
        record.thumbnail_url = Some(String::from("http://localhost:8091/assets/x.png"));
        catalog.put(&record).await.unwrap();
        assert_eq!(catalog.record(&id), Some(record));
        assert_eq!(catalog.write_count(), 1);

        let missing = video_record(Uuid::new_v4(), Uuid::new_v4());
        assert!(matches!(
            catalog.put(&missing).await,
            Err(Error::CatalogWriteError(_))
        ));
        assert!(catalog.get(missing.id).await.unwrap().is_none());
    }
}
