use std::sync::Arc;

use tracing::warn;

use crate::error::SeriesError;
use crate::key::SeriesKey;
use crate::store::{EntityStore, SeriesQuery};

/// Reads the highest number already committed in a series.
///
/// The answer is a snapshot. It is only safe to build on while the series
/// lock is held.
pub trait SequenceQuery: Send + Sync {
    /// Highest value in `key`'s series, ignoring entity `exclude`. `None` when
    /// the series has no usable value yet.
    fn max_value(&self, key: &SeriesKey, exclude: Option<&str>)
    -> Result<Option<i64>, SeriesError>;
}

/// SequenceQuery over an EntityStore: find the top entity, then load it and
/// read its number.
pub struct StoreSequenceQuery {
    store: Arc<dyn EntityStore>,
}

impl StoreSequenceQuery {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }
}

impl SequenceQuery for StoreSequenceQuery {
    fn max_value(
        &self,
        key: &SeriesKey,
        exclude: Option<&str>,
    ) -> Result<Option<i64>, SeriesError> {
        let query = SeriesQuery::for_key(key).excluding(exclude).limit(1);
        let ids = self
            .store
            .query(&query)
            .map_err(|e| SeriesError::QueryFailure(e.to_string()))?;

        let Some(id) = ids.into_iter().next() else {
            return Ok(None);
        };

        let record = self
            .store
            .load(&key.entity_type, &id)
            .map_err(|e| SeriesError::QueryFailure(e.to_string()))?;

        // A vanished or corrupt top entry counts as an empty series.
        let value = record
            .as_ref()
            .and_then(|r| r.field(&key.field))
            .and_then(|v| v.value);
        if value.is_none() {
            warn!("StoreSequenceQuery: no usable value on {} in {}", id, key);
        }
        Ok(value)
    }
}
