use async_trait::async_trait;

use crate::{AggregateId, EventEnvelope, EventStoreError, Result, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Version the writer observed when it loaded the stream.
    /// If None, no version check is performed.
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Expects the stream to have no events yet.
    pub fn expect_new() -> Self {
        Self::expect_version(Version::initial())
    }
}

/// Storage for order and payment event streams.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a batch of events atomically.
    ///
    /// Fails with `ConcurrencyConflict` when `options.expected_version` is set
    /// and the stream has moved, and with `DuplicateIdempotencyKey` when any
    /// event carries a key the stream has already recorded. Nothing from the
    /// batch is stored on failure.
    ///
    /// Returns the version of the stream after the append.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// All events of one stream, oldest first.
    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>>;

    /// Events of one type across every stream, in append order.
    async fn get_events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Current version of a stream, or None if it has no events.
    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>>;

    /// Whether the stream already recorded an event with this idempotency key.
    async fn has_idempotency_key(&self, aggregate_id: AggregateId, key: &str) -> Result<bool>;
}

/// Checks that a batch targets one stream with consecutive versions and
/// carries no repeated idempotency key.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    let Some(first) = events.first() else {
        return Err(EventStoreError::InvalidAppend(
            "cannot append an empty batch".to_string(),
        ));
    };

    let mut expected_version = first.version;
    let mut keys = Vec::new();
    for (index, event) in events.iter().enumerate() {
        if event.aggregate_id != first.aggregate_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same aggregate".to_string(),
            ));
        }
        if event.aggregate_type != first.aggregate_type {
            return Err(EventStoreError::InvalidAppend(
                "all events must have the same aggregate type".to_string(),
            ));
        }
        if index > 0 {
            expected_version = expected_version.next();
            if event.version != expected_version {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event versions must be sequential: expected {}, got {}",
                    expected_version, event.version
                )));
            }
        }
        if let Some(key) = &event.idempotency_key {
            if keys.contains(&key) {
                return Err(EventStoreError::DuplicateIdempotencyKey {
                    aggregate_id: event.aggregate_id,
                    key: key.clone(),
                });
            }
            keys.push(key);
        }
    }

    Ok(())
}
