//! The series allocator.
//!
//! `next` resolves the series, takes the series lock, reads the current
//! maximum and hands back a [`Reservation`]. The lock lives inside the
//! reservation: the caller writes the new number to the store and only then
//! drops it, so the next allocator in line always sees the committed value.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::SeriesError;
use crate::key::SeriesKey;
use crate::lock::{SeriesGuard, SeriesLocks};
use crate::query::SequenceQuery;
use crate::template::SeriesKeyResolver;

/// Everything needed to place one entity in a series.
#[derive(Debug, Clone, Copy)]
pub struct AllocationRequest<'a> {
    pub entity_type: &'a str,
    pub bundle: &'a str,
    /// Suffix template from the field settings.
    pub template: &'a str,
    pub field: &'a str,
    /// The entity being saved, left out of the max scan.
    pub exclude_id: Option<&'a str>,
}

/// A number reserved in a series. Holds the series lock until dropped.
#[derive(Debug)]
#[must_use = "dropping a reservation releases the series before the number is committed"]
pub struct Reservation {
    value: i64,
    key: SeriesKey,
    _guard: SeriesGuard,
}

impl Reservation {
    pub fn value(&self) -> i64 {
        self.value
    }

    /// The resolved suffix of the series.
    pub fn suffix(&self) -> &str {
        &self.key.suffix
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }
}

pub struct Allocator {
    query: Arc<dyn SequenceQuery>,
    resolver: SeriesKeyResolver,
    locks: Arc<SeriesLocks>,
    lock_timeout: Duration,
}

impl Allocator {
    /// An allocator with a lock registry of its own. Only safe while it is the
    /// sole writer of the series it allocates into.
    pub fn new(
        query: Arc<dyn SequenceQuery>,
        resolver: SeriesKeyResolver,
        lock_timeout: Duration,
    ) -> Self {
        Self::with_locks(query, resolver, Arc::new(SeriesLocks::new()), lock_timeout)
    }

    /// An allocator locking through `locks`, shared with every other
    /// allocator writing to the same store.
    pub fn with_locks(
        query: Arc<dyn SequenceQuery>,
        resolver: SeriesKeyResolver,
        locks: Arc<SeriesLocks>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            query,
            resolver,
            locks,
            lock_timeout,
        }
    }

    pub fn resolver(&self) -> &SeriesKeyResolver {
        &self.resolver
    }

    pub fn locks(&self) -> &Arc<SeriesLocks> {
        &self.locks
    }

    /// Series key the request falls into at time `at`.
    pub fn series_key(
        &self,
        request: &AllocationRequest<'_>,
        at: DateTime<Utc>,
    ) -> Result<SeriesKey, SeriesError> {
        let suffix = self.resolver.resolve(request.template, at)?;
        Ok(SeriesKey::new(
            request.entity_type,
            request.bundle,
            suffix,
            request.field,
        ))
    }

    /// Reserve the next number for `request`.
    pub fn next(
        &self,
        request: &AllocationRequest<'_>,
        at: DateTime<Utc>,
    ) -> Result<Reservation, SeriesError> {
        let key = self.series_key(request, at)?;
        let guard = self.locks.acquire(&key, self.lock_timeout)?;

        let max = self.query.max_value(&key, request.exclude_id)?;
        let value = successor(&key, max)?;

        debug!("Allocator: reserved {} in {} (previous max {:?})", value, key, max);
        Ok(Reservation {
            value,
            key,
            _guard: guard,
        })
    }

    /// The number `next` would hand out right now, without reserving it.
    ///
    /// Informational only: by the time it is shown, another save may have
    /// taken it.
    pub fn peek(
        &self,
        request: &AllocationRequest<'_>,
        at: DateTime<Utc>,
    ) -> Result<(i64, String), SeriesError> {
        let key = self.series_key(request, at)?;
        let max = self.query.max_value(&key, request.exclude_id)?;
        let value = successor(&key, max)?;
        Ok((value, key.suffix))
    }
}

fn successor(key: &SeriesKey, max: Option<i64>) -> Result<i64, SeriesError> {
    match max {
        None => Ok(1),
        Some(max) => max.checked_add(1).ok_or_else(|| {
            SeriesError::QueryFailure(format!("series {} is exhausted at {}", key, max))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::TimeZone;

    /// In-memory max table keyed by series, ignoring exclusions.
    #[derive(Default)]
    struct FixedMax {
        max: Mutex<HashMap<SeriesKey, i64>>,
    }

    impl FixedMax {
        fn set(&self, key: SeriesKey, value: i64) {
            self.max.lock().unwrap().insert(key, value);
        }
    }

    impl SequenceQuery for FixedMax {
        fn max_value(
            &self,
            key: &SeriesKey,
            _exclude: Option<&str>,
        ) -> Result<Option<i64>, SeriesError> {
            Ok(self.max.lock().unwrap().get(key).copied())
        }
    }

    fn march() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 9, 30, 0).unwrap()
    }

    fn request<'a>(bundle: &'a str, template: &'a str) -> AllocationRequest<'a> {
        AllocationRequest {
            entity_type: "order",
            bundle,
            template,
            field: "number",
            exclude_id: None,
        }
    }

    fn allocator(query: Arc<FixedMax>) -> Allocator {
        Allocator::new(query, SeriesKeyResolver::default(), Duration::from_millis(50))
    }

    #[test]
    fn empty_series_starts_at_one() {
        let alloc = allocator(Arc::new(FixedMax::default()));
        let r = alloc.next(&request("invoice", "-Y-m"), march()).unwrap();
        assert_eq!(r.value(), 1);
        assert_eq!(r.suffix(), "-2024-03");
        assert_eq!(r.key(), &SeriesKey::new("order", "invoice", "-2024-03", "number"));
    }

    #[test]
    fn continues_after_existing_max() {
        let query = Arc::new(FixedMax::default());
        query.set(SeriesKey::new("order", "invoice", "-2024-03", "number"), 7);
        query.set(SeriesKey::new("order", "quote", "-2024", "number"), 41);
        let alloc = allocator(query);

        assert_eq!(alloc.next(&request("invoice", "-Y-m"), march()).unwrap().value(), 8);
        assert_eq!(alloc.next(&request("quote", "-Y"), march()).unwrap().value(), 42);
        // Different suffix, different sequence.
        assert_eq!(alloc.next(&request("invoice", "-Y"), march()).unwrap().value(), 1);
    }

    #[test]
    fn reservation_holds_the_series() {
        let alloc = allocator(Arc::new(FixedMax::default()));
        let held = alloc.next(&request("invoice", "-Y-m"), march()).unwrap();

        let err = alloc.next(&request("invoice", "-Y-m"), march()).unwrap_err();
        assert!(matches!(err, SeriesError::SeriesLocked { .. }));

        // Another series is unaffected.
        drop(alloc.next(&request("quote", "-Y-m"), march()).unwrap());

        drop(held);
        drop(alloc.next(&request("invoice", "-Y-m"), march()).unwrap());
        assert_eq!(alloc.locks().held_count(), 0);
    }

    #[test]
    fn invalid_template_fails_before_locking() {
        let alloc = allocator(Arc::new(FixedMax::default()));
        let err = alloc.next(&request("invoice", r"-Y\"), march()).unwrap_err();
        assert!(matches!(err, SeriesError::InvalidTemplate { .. }));
        assert_eq!(alloc.locks().held_count(), 0);
    }

    #[test]
    fn exhausted_series_is_reported() {
        let query = Arc::new(FixedMax::default());
        query.set(SeriesKey::new("order", "invoice", "-2024-03", "number"), i64::MAX);
        let alloc = allocator(query);

        let err = alloc.next(&request("invoice", "-Y-m"), march()).unwrap_err();
        assert!(matches!(err, SeriesError::QueryFailure(_)));
        assert_eq!(alloc.locks().held_count(), 0);
    }

    #[test]
    fn allocators_sharing_locks_exclude_each_other() {
        let query = Arc::new(FixedMax::default());
        let locks = Arc::new(SeriesLocks::new());
        let timeout = Duration::from_millis(20);
        let resolver = SeriesKeyResolver::default();
        let first = Allocator::with_locks(query.clone(), resolver, locks.clone(), timeout);
        let second = Allocator::with_locks(query, resolver, locks.clone(), timeout);

        let held = first.next(&request("invoice", "-Y-m"), march()).unwrap();
        let err = second.next(&request("invoice", "-Y-m"), march()).unwrap_err();
        assert!(matches!(err, SeriesError::SeriesLocked { .. }));

        drop(held);
        let r = second.next(&request("invoice", "-Y-m"), march()).unwrap();
        assert!(locks.is_held(r.key()));
    }

    #[test]
    fn peek_does_not_reserve() {
        let query = Arc::new(FixedMax::default());
        query.set(SeriesKey::new("order", "invoice", "-2024-03", "number"), 3);
        let alloc = allocator(query);

        let held = alloc.next(&request("invoice", "-Y-m"), march()).unwrap();
        let (value, suffix) = alloc.peek(&request("invoice", "-Y-m"), march()).unwrap();
        assert_eq!((value, suffix.as_str()), (4, "-2024-03"));
        assert_eq!(held.value(), 4);
    }
}
