//! Save hook deciding whether a series field gets a fresh number.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::allocator::{AllocationRequest, Allocator, Reservation};
use crate::error::SeriesError;
use crate::store::EntityRecord;
use crate::value::{FieldSettings, SeriesValue};

/// Identity of the entity being saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRef<'a> {
    pub entity_type: &'a str,
    pub bundle: &'a str,
    /// `None` for an entity that has never been stored.
    pub id: Option<&'a str>,
}

impl<'a> From<&'a EntityRecord> for EntityRef<'a> {
    fn from(record: &'a EntityRecord) -> Self {
        Self {
            entity_type: &record.entity_type,
            bundle: &record.bundle,
            id: Some(record.id.as_str()).filter(|id| !id.is_empty()),
        }
    }
}

pub struct AutofillGate {
    allocator: Arc<Allocator>,
}

impl AutofillGate {
    pub fn new(allocator: Arc<Allocator>) -> Self {
        Self { allocator }
    }

    /// Allocate into `value` if it asks for autofill.
    ///
    /// On allocation the number, the resolved suffix and the cleared flag are
    /// written together and the returned reservation must be kept alive until
    /// the entity is committed. Values without a pending autofill are left
    /// untouched and `None` is returned.
    #[must_use = "the reservation must outlive the commit of the entity"]
    pub fn before_save(
        &self,
        entity: &EntityRef<'_>,
        settings: &FieldSettings,
        value: &mut SeriesValue,
        at: DateTime<Utc>,
    ) -> Result<Option<Reservation>, SeriesError> {
        if !value.is_pending() {
            debug!(
                "AutofillGate: {}/{} keeps {:?} as entered",
                entity.entity_type, settings.name, value.value
            );
            return Ok(None);
        }

        let request = AllocationRequest {
            entity_type: entity.entity_type,
            bundle: entity.bundle,
            template: &settings.series_suffix,
            field: &settings.name,
            exclude_id: entity.id,
        };
        let reservation = self.allocator.next(&request, at)?;

        *value = SeriesValue {
            value: Some(reservation.value()),
            autofill: Some(false),
            series_suffix: Some(reservation.suffix().to_string()),
        };
        Ok(Some(reservation))
    }

    /// Run the save hook and `commit` as one step.
    ///
    /// `commit` receives the field value to persist and runs while the
    /// series is still locked. `value` is only updated once `commit`
    /// succeeds; on any error it is left as the caller passed it.
    pub fn save<T, F>(
        &self,
        entity: &EntityRef<'_>,
        settings: &FieldSettings,
        value: &mut SeriesValue,
        at: DateTime<Utc>,
        commit: F,
    ) -> Result<T, SeriesError>
    where
        F: FnOnce(&SeriesValue) -> Result<T, SeriesError>,
    {
        let mut working = value.clone();
        let reservation = self.before_save(entity, settings, &mut working, at)?;

        let committed = commit(&working)?;
        *value = working;

        if let Some(reservation) = reservation {
            debug!("AutofillGate: committed {} in {}", reservation.value(), reservation.key());
        }
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use chrono::TimeZone;

    use crate::key::SeriesKey;
    use crate::query::SequenceQuery;
    use crate::template::SeriesKeyResolver;

    struct MaxOf(Option<i64>);

    impl SequenceQuery for MaxOf {
        fn max_value(&self, _: &SeriesKey, _: Option<&str>) -> Result<Option<i64>, SeriesError> {
            Ok(self.0)
        }
    }

    fn gate(max: Option<i64>) -> AutofillGate {
        let allocator = Allocator::new(
            Arc::new(MaxOf(max)),
            SeriesKeyResolver::default(),
            Duration::from_millis(20),
        );
        AutofillGate::new(Arc::new(allocator))
    }

    fn march() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()
    }

    fn invoice() -> EntityRef<'static> {
        EntityRef {
            entity_type: "order",
            bundle: "invoice",
            id: Some("17"),
        }
    }

    fn settings() -> FieldSettings {
        FieldSettings::new("number", "-Y-m")
    }

    #[test]
    fn autofill_allocates_and_clears_flag() {
        let gate = gate(Some(7));
        let mut value = SeriesValue::autofill();

        let reservation = gate
            .before_save(&invoice(), &settings(), &mut value, march())
            .unwrap();
        assert!(reservation.is_some());
        assert_eq!(
            value,
            SeriesValue {
                value: Some(8),
                autofill: Some(false),
                series_suffix: Some("-2024-03".into()),
            }
        );
    }

    #[test]
    fn second_call_is_a_no_op() {
        let gate = gate(Some(7));
        let mut value = SeriesValue::autofill();
        drop(gate.before_save(&invoice(), &settings(), &mut value, march()).unwrap());
        let first = value.clone();

        let again = gate
            .before_save(&invoice(), &settings(), &mut value, march())
            .unwrap();
        assert!(again.is_none());
        assert_eq!(value, first);
    }

    #[test]
    fn manual_value_is_authoritative() {
        let gate = gate(Some(100));
        let mut value = SeriesValue::manual(42, Some("-legacy".into()));

        let reservation = gate
            .before_save(&invoice(), &settings(), &mut value, march())
            .unwrap();
        assert!(reservation.is_none());
        assert_eq!(value, SeriesValue::manual(42, Some("-legacy".into())));

        let mut untouched = SeriesValue::default();
        assert!(gate
            .before_save(&invoice(), &settings(), &mut untouched, march())
            .unwrap()
            .is_none());
        assert!(untouched.is_empty());
    }

    #[test]
    fn failed_commit_keeps_request_pending() {
        let gate = gate(None);
        let mut value = SeriesValue::autofill();

        let err = gate
            .save(&invoice(), &settings(), &mut value, march(), |_| -> Result<(), SeriesError> {
                Err(SeriesError::Storage("write refused".into()))
            })
            .unwrap_err();
        assert!(matches!(err, SeriesError::Storage(_)));
        assert_eq!(value, SeriesValue::autofill());
    }

    #[test]
    fn failed_allocation_keeps_request_pending() {
        let gate = gate(None);
        let mut value = SeriesValue::autofill();
        let bad = FieldSettings::new("number", r"-Y\");

        let err = gate
            .save(&invoice(), &bad, &mut value, march(), |_| Ok(()))
            .unwrap_err();
        assert!(matches!(err, SeriesError::InvalidTemplate { .. }));
        assert_eq!(value, SeriesValue::autofill());
    }

    #[test]
    fn commit_sees_allocated_value_under_lock() {
        let gate = gate(None);
        let mut value = SeriesValue::autofill();
        let key = SeriesKey::new("order", "invoice", "-2024-03", "number");

        let seen = gate
            .save(&invoice(), &settings(), &mut value, march(), |v| {
                assert!(gate.allocator.locks().is_held(&key));
                Ok(v.clone())
            })
            .unwrap();
        assert_eq!(seen.value, Some(1));
        assert_eq!(value, seen);
        assert!(!gate.allocator.locks().is_held(&key));
    }

    #[test]
    fn entity_ref_from_record() {
        let record = EntityRecord::new("order", "invoice", "5");
        assert_eq!(EntityRef::from(&record).id, Some("5"));

        let fresh = EntityRecord::new("order", "invoice", "");
        assert_eq!(EntityRef::from(&fresh).id, None);
    }
}
