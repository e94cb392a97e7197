use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Default)]
struct StreamState {
    events: Vec<EventEnvelope>,
    keys: HashSet<String>,
}

impl StreamState {
    fn version(&self) -> Version {
        self.events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial())
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<AggregateId, StreamState>,
    /// Append order across all streams, as (aggregate, index into its stream).
    log: Vec<(AggregateId, usize)>,
}

/// Event store that keeps every stream in process memory.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events across all streams.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.streams.clear();
        inner.log.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut inner = self.inner.write().await;
        let stream = inner.streams.entry(aggregate_id).or_default();
        let current_version = stream.version();

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            tracing::debug!(%aggregate_id, %expected, actual = %current_version, "append rejected");
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        if let Some(key) = events
            .iter()
            .filter_map(|e| e.idempotency_key.as_ref())
            .find(|key| stream.keys.contains(*key))
        {
            return Err(EventStoreError::DuplicateIdempotencyKey {
                aggregate_id,
                key: key.clone(),
            });
        }

        let start = stream.events.len();
        let count = events.len();
        for event in events {
            if let Some(key) = &event.idempotency_key {
                stream.keys.insert(key.clone());
            }
            stream.events.push(event);
        }
        let new_version = stream.version();
        inner
            .log
            .extend((start..start + count).map(|index| (aggregate_id, index)));

        metrics::counter!("events_appended_total").increment(count as u64);
        Ok(new_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .map(|s| s.events.clone())
            .unwrap_or_default())
    }

    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .filter_map(|(id, index)| inner.streams.get(id)?.events.get(*index))
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .filter(|s| !s.events.is_empty())
            .map(StreamState::version))
    }

    async fn has_idempotency_key(&self, aggregate_id: AggregateId, key: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .is_some_and(|s| s.keys.contains(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(aggregate_id: AggregateId, version: i64, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .event_type(event_type)
            .aggregate_id(aggregate_id)
            .aggregate_type("Payment")
            .version(Version::new(version))
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap()
    }

    fn keyed(aggregate_id: AggregateId, version: i64, key: &str) -> EventEnvelope {
        let mut e = event(aggregate_id, version, "PaymentCaptured");
        e.idempotency_key = Some(key.to_string());
        e
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let version = store
            .append(
                vec![event(id, 1, "PaymentCreated"), event(id, 2, "PaymentAuthorized")],
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        assert_eq!(version, Version::new(2));
        let events = store.get_events_for_aggregate(id).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "PaymentAuthorized");
        assert_eq!(
            store.get_aggregate_version(id).await.unwrap(),
            Some(Version::new(2))
        );
    }

    #[tokio::test]
    async fn stale_writer_gets_conflict() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "PaymentCreated")], AppendOptions::expect_new())
            .await
            .unwrap();

        let result = store
            .append(vec![event(id, 1, "PaymentCreated")], AppendOptions::expect_new())
            .await;

        match result {
            Err(EventStoreError::ConcurrencyConflict {
                expected, actual, ..
            }) => {
                assert_eq!(expected, Version::initial());
                assert_eq!(actual, Version::first());
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store
            .append(vec![event(id, 1, "PaymentCreated")], AppendOptions::expect_new())
            .await
            .unwrap();
        store
            .append(
                vec![keyed(id, 2, "pay:capture:1")],
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        assert!(store.has_idempotency_key(id, "pay:capture:1").await.unwrap());

        let result = store
            .append(
                vec![keyed(id, 3, "pay:capture:1")],
                AppendOptions::expect_version(Version::new(2)),
            )
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::DuplicateIdempotencyKey { .. })
        ));
        assert_eq!(store.get_events_for_aggregate(id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn events_by_type_follow_append_order() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let b = AggregateId::new();
        store
            .append(vec![event(a, 1, "PaymentCreated")], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![event(b, 1, "PaymentCreated")], AppendOptions::new())
            .await
            .unwrap();
        store
            .append(vec![event(a, 2, "PaymentVoided")], AppendOptions::new())
            .await
            .unwrap();

        let created = store.get_events_by_type("PaymentCreated").await.unwrap();
        assert_eq!(created.len(), 2);
        assert_eq!(created[0].aggregate_id, a);
        assert_eq!(created[1].aggregate_id, b);
        assert_eq!(store.event_count().await, 3);
    }

    #[tokio::test]
    async fn unknown_stream_has_no_version() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        assert_eq!(store.get_aggregate_version(id).await.unwrap(), None);
        assert!(store.get_events_for_aggregate(id).await.unwrap().is_empty());
        assert!(!store.has_idempotency_key(id, "x").await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_writers_one_wins() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append(vec![event(id, 1, "PaymentCreated")], AppendOptions::expect_new())
                    .await
                    .is_ok()
            }));
        }

        let mut wins = 0;
        for handle in handles {
            if handle.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
