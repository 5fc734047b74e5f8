use std::sync::Arc;

use tracing::info;

use crate::error::{PersistError, Result};
use crate::memory::MemoryStore;
use crate::store::PersistenceStore;

/// Picks a backend: MongoDB when a URI is given, memory otherwise.
pub struct StoreBuilder {
    mongodb_uri: Option<String>,
    database: Option<String>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self {
            mongodb_uri: None,
            database: None,
        }
    }

    pub fn mongodb_uri(mut self, uri: impl Into<String>) -> Self {
        self.mongodb_uri = Some(uri.into());
        self
    }

    /// Ignores empty URIs so an unset env var falls back to memory
    pub fn maybe_mongodb_uri(mut self, uri: Option<String>) -> Self {
        self.mongodb_uri = uri.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn database(mut self, db: impl Into<String>) -> Self {
        self.database = Some(db.into());
        self
    }

    pub async fn build(self) -> Result<Arc<dyn PersistenceStore>> {
        match self.mongodb_uri {
            None => {
                info!("using in-memory store");
                Ok(Arc::new(MemoryStore::new()))
            }
            Some(uri) => {
                let database = self
                    .database
                    .ok_or_else(|| PersistError::Internal("database is required".to_string()))?;
                Self::connect_mongo(&uri, &database).await
            }
        }
    }

    #[cfg(feature = "mongodb")]
    async fn connect_mongo(uri: &str, database: &str) -> Result<Arc<dyn PersistenceStore>> {
        let store = crate::dbs::mongo::MongoStore::connect(uri, database).await?;
        Ok(Arc::new(store))
    }

    #[cfg(not(feature = "mongodb"))]
    async fn connect_mongo(_uri: &str, _database: &str) -> Result<Arc<dyn PersistenceStore>> {
        Err(PersistError::Connection(
            "a MongoDB URI was configured but stride-persist was built without the `mongodb` feature"
                .to_string(),
        ))
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}
