use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::allocator::{AllocationRequest, Allocator};
use crate::config::SeriesConfig;
use crate::error::SeriesError;
use crate::gate::{AutofillGate, EntityRef};
use crate::query::StoreSequenceQuery;
use crate::store::{EntityRecord, EntityStore, KVStore, KvEntityStore, MemoryStore, RedbStore};
use crate::value::{FieldSettings, SeriesValue};

/// Series numbering over an entity store: the save path, previews and loads.
pub struct SeriesService {
    store: Arc<dyn EntityStore>,
    allocator: Arc<Allocator>,
    gate: AutofillGate,
    config: SeriesConfig,
}

impl SeriesService {
    /// Open the store named by `config.db_path`, or an in-memory store when
    /// no path is configured.
    pub fn open(config: SeriesConfig) -> Result<Self, SeriesError> {
        let kv: Arc<dyn KVStore> = match &config.db_path {
            Some(path) => {
                info!("SeriesService: using redb at {:?}", path);
                Arc::new(RedbStore::open(path).map_err(|e| SeriesError::Storage(e.to_string()))?)
            }
            None => {
                info!("SeriesService: no db path configured, using in-memory store");
                Arc::new(MemoryStore::new())
            }
        };
        Ok(Self::with_store(Arc::new(KvEntityStore::new(kv)), config))
    }

    pub fn with_store(store: Arc<dyn EntityStore>, config: SeriesConfig) -> Self {
        let query = Arc::new(StoreSequenceQuery::new(store.clone()));
        // Lock through the store so services sharing it serialize together.
        let allocator = Arc::new(Allocator::with_locks(
            query,
            config.resolver(),
            store.series_locks().clone(),
            config.lock_timeout,
        ));
        Self {
            gate: AutofillGate::new(allocator.clone()),
            store,
            allocator,
            config,
        }
    }

    pub fn config(&self) -> &SeriesConfig {
        &self.config
    }

    pub fn allocator(&self) -> &Arc<Allocator> {
        &self.allocator
    }

    /// Settings for `name` with the configured default template.
    pub fn field(&self, name: impl Into<String>) -> FieldSettings {
        FieldSettings::new(name, self.config.default_series_suffix.clone())
    }

    /// Save `record`, allocating its `settings.name` field if it asks for
    /// autofill. An allocating save writes while the series is locked.
    ///
    /// A record without the field is stored with a fresh, empty value. The
    /// caller's record is left as it was; the saved one is returned.
    pub fn save(
        &self,
        record: &EntityRecord,
        settings: &FieldSettings,
        at: DateTime<Utc>,
    ) -> Result<EntityRecord, SeriesError> {
        let mut value = record
            .field(&settings.name)
            .cloned()
            .unwrap_or_else(|| SeriesValue::for_field(settings));
        let store = &self.store;

        self.gate.save(
            &EntityRef::from(record),
            settings,
            &mut value,
            at,
            |field| {
                let mut committed = record.clone();
                committed.fields.insert(settings.name.clone(), field.clone());
                store
                    .save(&committed)
                    .map_err(|e| SeriesError::Storage(e.to_string()))?;
                Ok(committed)
            },
        )
    }

    /// Save stamped with the current time.
    pub fn save_now(
        &self,
        record: &EntityRecord,
        settings: &FieldSettings,
    ) -> Result<EntityRecord, SeriesError> {
        self.save(record, settings, Utc::now())
    }

    /// The number and suffix an autofill save of `entity` would get at `at`.
    /// Nothing is reserved.
    pub fn preview(
        &self,
        entity: &EntityRef<'_>,
        settings: &FieldSettings,
        at: DateTime<Utc>,
    ) -> Result<(i64, String), SeriesError> {
        let request = AllocationRequest {
            entity_type: entity.entity_type,
            bundle: entity.bundle,
            template: &settings.series_suffix,
            field: &settings.name,
            exclude_id: entity.id,
        };
        self.allocator.peek(&request, at)
    }

    pub fn load(
        &self,
        entity_type: &str,
        id: &str,
    ) -> Result<Option<EntityRecord>, SeriesError> {
        self.store
            .load(entity_type, id)
            .map_err(|e| SeriesError::Storage(e.to_string()))
    }

    /// Load just the series field of an entity.
    pub fn load_value(
        &self,
        entity_type: &str,
        id: &str,
        field: &str,
    ) -> Result<Option<SeriesValue>, SeriesError> {
        Ok(self
            .load(entity_type, id)?
            .and_then(|mut record| record.fields.remove(field)))
    }
}
