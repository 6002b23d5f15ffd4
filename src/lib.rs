//! Gap-free numbering of entities in date-partitioned series.
//!
//! An entity field holding a [`SeriesValue`] can ask for autofill. On save,
//! the [`AutofillGate`] resolves the field's suffix template into a series
//! key, reserves the next number in that series through the [`Allocator`]
//! and keeps the series locked until the record is written. Manually entered
//! numbers pass through untouched.

pub mod allocator;
pub mod config;
pub mod error;
pub mod gate;
pub mod key;
pub mod lock;
pub mod query;
pub mod service;
pub mod store;
pub mod template;
pub mod value;

pub use allocator::{AllocationRequest, Allocator, Reservation};
pub use config::SeriesConfig;
pub use error::SeriesError;
pub use gate::{AutofillGate, EntityRef};
pub use key::SeriesKey;
pub use lock::{SeriesGuard, SeriesLocks};
pub use query::{SequenceQuery, StoreSequenceQuery};
pub use service::SeriesService;
pub use store::{EntityRecord, EntityStore, KVStore, KvEntityStore, MemoryStore, RedbStore, SeriesQuery, StoreError};
pub use template::SeriesKeyResolver;
pub use value::{FieldSettings, SeriesValue, DEFAULT_SERIES_SUFFIX};
