pub mod entity;
pub mod error;
pub mod memory;
pub mod redb;
pub mod traits;

pub use entity::{EntityRecord, EntityStore, KvEntityStore, SeriesQuery};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use self::redb::RedbStore;
pub use traits::KVStore;
