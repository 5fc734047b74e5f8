pub mod builder;
pub mod dbs;
pub mod error;
pub mod memory;
pub mod store;

pub use builder::StoreBuilder;
#[cfg(feature = "mongodb")]
pub use dbs::mongo::MongoStore;
pub use error::{PersistError, Result};
pub use memory::{MemoryStore, Record, Table};
pub use store::{MessageQuery, PersistenceStore, RunFilter, SortOrder};
