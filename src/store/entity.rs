//! Entity layer: series-carrying records stored as JSON in a KVStore.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::key::SeriesKey;
use crate::lock::SeriesLocks;
use crate::store::error::StoreError;
use crate::store::traits::KVStore;
use crate::value::SeriesValue;

const RECORD_PREFIX: &str = "series:entity:";

/// An entity as the allocator sees it: identity plus its series fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub entity_type: String,
    pub bundle: String,
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, SeriesValue>,
}

impl EntityRecord {
    pub fn new(
        entity_type: impl Into<String>,
        bundle: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            bundle: bundle.into(),
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Builder-style field assignment.
    pub fn with_field(mut self, name: impl Into<String>, value: SeriesValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&SeriesValue> {
        self.fields.get(name)
    }
}

/// Structured lookup over series fields.
///
/// Matches records of one entity type and bundle whose `field` carries the
/// given resolved suffix, optionally skipping one id. Results are ordered by
/// the field's value, highest first, records without a value last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub entity_type: String,
    pub bundle: String,
    pub field: String,
    pub suffix: String,
    pub exclude_id: Option<String>,
    pub limit: Option<usize>,
}

impl SeriesQuery {
    pub fn for_key(key: &SeriesKey) -> Self {
        Self {
            entity_type: key.entity_type.clone(),
            bundle: key.bundle.clone(),
            field: key.field.clone(),
            suffix: key.suffix.clone(),
            exclude_id: None,
            limit: None,
        }
    }

    pub fn excluding(mut self, id: Option<&str>) -> Self {
        self.exclude_id = id.map(str::to_string);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &EntityRecord) -> Option<Option<i64>> {
        if record.bundle != self.bundle {
            return None;
        }
        if self.exclude_id.as_deref() == Some(record.id.as_str()) {
            return None;
        }
        let value = record.field(&self.field)?;
        if value.series_suffix.as_deref() != Some(self.suffix.as_str()) {
            return None;
        }
        Some(value.value)
    }
}

/// The store the allocator reads committed numbers from and the save path
/// writes them to.
pub trait EntityStore: Send + Sync {
    /// Ids of records matching the query, highest value first.
    fn query(&self, query: &SeriesQuery) -> Result<Vec<String>, StoreError>;

    /// Load a record by entity type and id.
    fn load(&self, entity_type: &str, id: &str) -> Result<Option<EntityRecord>, StoreError>;

    /// Insert or replace a record.
    fn save(&self, record: &EntityRecord) -> Result<(), StoreError>;

    /// Series locks guarding allocation into this store. Every allocator
    /// writing here must lock through this one registry.
    fn series_locks(&self) -> &Arc<SeriesLocks>;
}

/// EntityStore over any KVStore, one JSON document per record under
/// `series:entity:{entity_type}:{id}`.
///
/// Writers sharing a KVStore must share one KvEntityStore, since the series
/// locks live here.
pub struct KvEntityStore {
    kv: Arc<dyn KVStore>,
    locks: Arc<SeriesLocks>,
}

impl KvEntityStore {
    pub fn new(kv: Arc<dyn KVStore>) -> Self {
        Self {
            kv,
            locks: Arc::new(SeriesLocks::new()),
        }
    }

    fn type_prefix(entity_type: &str) -> String {
        format!("{}{}:", RECORD_PREFIX, entity_type)
    }

    fn make_key(entity_type: &str, id: &str) -> String {
        format!("{}{}", Self::type_prefix(entity_type), id)
    }

    fn decode(key: &str, bytes: &[u8]) -> Result<EntityRecord, StoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))
    }
}

impl EntityStore for KvEntityStore {
    fn query(&self, query: &SeriesQuery) -> Result<Vec<String>, StoreError> {
        let entries = self.kv.scan(&Self::type_prefix(&query.entity_type))?;

        let mut hits: Vec<(Option<i64>, String)> = Vec::new();
        for (key, bytes) in entries {
            let record = match Self::decode(&key, &bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!("KvEntityStore: skipping undecodable record: {}", e);
                    continue;
                }
            };
            if let Some(value) = query.matches(&record) {
                hits.push((value, record.id));
            }
        }

        // Option orders None below Some, so Reverse puts missing values last.
        hits.sort_by_key(|(value, _)| Reverse(*value));

        let limit = query.limit.unwrap_or(hits.len());
        Ok(hits.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    fn load(&self, entity_type: &str, id: &str) -> Result<Option<EntityRecord>, StoreError> {
        let key = Self::make_key(entity_type, id);
        match self.kv.get(&key)? {
            Some(bytes) => Self::decode(&key, &bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, record: &EntityRecord) -> Result<(), StoreError> {
        if record.id.is_empty() {
            return Err(StoreError::InvalidKey("empty entity id".to_string()));
        }
        if record.entity_type.is_empty() || record.entity_type.contains(':') {
            return Err(StoreError::InvalidKey(format!(
                "entity type '{}'",
                record.entity_type
            )));
        }

        let key = Self::make_key(&record.entity_type, &record.id);
        let bytes = serde_json::to_vec(record)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", key, e)))?;
        self.kv.set(&key, &bytes)
    }

    fn series_locks(&self) -> &Arc<SeriesLocks> {
        &self.locks
    }
}
