use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PersistError, Result};

/// One collection of id-keyed records. Records keep their own string `id`;
/// the driver-assigned `_id` is ignored on read.
#[derive(Clone)]
pub struct RecordRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    kind: &'static str,
    collection: Collection<T>,
}

impl<T> RecordRepository<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + Unpin,
{
    pub fn new(client: &Client, db_name: &str, collection: &str, kind: &'static str) -> Self {
        Self {
            kind,
            collection: client.database(db_name).collection(collection),
        }
    }

    /// Unique index on `id` plus any secondary keys
    pub async fn ensure_indexes(&self, secondary: &[&str]) -> Result<()> {
        let unique = IndexModel::builder()
            .keys(doc! { "id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(unique).await?;

        for key in secondary {
            let mut keys = Document::new();
            keys.insert(*key, 1);
            keys.insert("id", 1);
            let model = IndexModel::builder().keys(keys).build();
            self.collection.create_index(model).await?;
        }
        Ok(())
    }

    pub async fn insert(&self, record: &T) -> Result<()> {
        self.collection.insert_one(record).await?;
        Ok(())
    }

    pub async fn find(&self, id: &str) -> Result<T> {
        self.collection
            .find_one(doc! { "id": id })
            .await?
            .ok_or_else(|| PersistError::not_found(self.kind, id))
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>> {
        Ok(self.collection.find_one(filter).await?)
    }

    /// Records matching `filter`, sorted by id. Ids are UUIDv7 so this is
    /// creation order.
    pub async fn find_many(
        &self,
        filter: Document,
        ascending: bool,
        limit: Option<i64>,
    ) -> Result<Vec<T>> {
        let mut find = self
            .collection
            .find(filter)
            .sort(doc! { "id": if ascending { 1 } else { -1 } });
        if let Some(limit) = limit {
            find = find.limit(limit);
        }
        Ok(find.await?.try_collect().await?)
    }

    /// Replace the record only if it still matches `guard`. Returns false when
    /// another writer got there first.
    pub async fn replace_if(&self, id: &str, guard: Document, record: &T) -> Result<bool> {
        let mut filter = doc! { "id": id };
        filter.extend(guard);
        let result = self.collection.replace_one(filter, record).await?;
        Ok(result.matched_count == 1)
    }

    pub async fn delete_where(&self, filter: Document) -> Result<u64> {
        Ok(self.collection.delete_many(filter).await?.deleted_count)
    }
}
