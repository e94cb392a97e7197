//! Core aggregate and domain event traits.

use common::AggregateId;
use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// A fact recorded on an aggregate's stream.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Event name stored alongside the payload.
    fn event_type(&self) -> &'static str;

    /// Key that may be recorded at most once per stream.
    ///
    /// Gateway outcomes return the request's idempotency key here so the
    /// event store refuses a second copy of the same outcome.
    fn idempotency_key(&self) -> Option<&str> {
        None
    }
}

/// An event-sourced entity.
///
/// Aggregates are rebuilt by replaying their events through [`Aggregate::apply`],
/// which must be deterministic and infallible. Decisions are made by command
/// methods that inspect the current state and return new events.
pub trait Aggregate: Default + Send + Sync + Sized {
    type Event: DomainEvent;

    type Error: std::error::Error + Send + Sync;

    /// Stream kind used for event store organization.
    fn aggregate_type() -> &'static str;

    /// Returns None for a new, uninitialized aggregate.
    fn id(&self) -> Option<AggregateId>;

    fn version(&self) -> Version;

    fn set_version(&mut self, version: Version);

    fn apply(&mut self, event: Self::Event);

    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Opened { id: AggregateId },
        Settled { key: String, value: i32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Opened { .. } => "TestOpened",
                TestEvent::Settled { .. } => "TestSettled",
            }
        }

        fn idempotency_key(&self) -> Option<&str> {
            match self {
                TestEvent::Settled { key, .. } => Some(key.as_str()),
                _ => None,
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct TestAggregate {
        id: Option<AggregateId>,
        value: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("test error")]
    struct TestError;

    impl Aggregate for TestAggregate {
        type Event = TestEvent;
        type Error = TestError;

        fn aggregate_type() -> &'static str {
            "TestAggregate"
        }

        fn id(&self) -> Option<AggregateId> {
            self.id
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TestEvent::Opened { id } => self.id = Some(id),
                TestEvent::Settled { value, .. } => self.value = value,
            }
        }
    }

    #[test]
    fn apply_events_in_order() {
        let id = AggregateId::new();
        let mut aggregate = TestAggregate::default();
        aggregate.apply_events(vec![
            TestEvent::Opened { id },
            TestEvent::Settled {
                key: "a".to_string(),
                value: 1,
            },
            TestEvent::Settled {
                key: "b".to_string(),
                value: 42,
            },
        ]);

        assert_eq!(aggregate.id(), Some(id));
        assert_eq!(aggregate.value, 42);
    }

    #[test]
    fn idempotency_key_defaults_to_none() {
        let opened = TestEvent::Opened {
            id: AggregateId::new(),
        };
        assert_eq!(opened.idempotency_key(), None);

        let settled = TestEvent::Settled {
            key: "pay:capture:1".to_string(),
            value: 1,
        };
        assert_eq!(settled.idempotency_key(), Some("pay:capture:1"));
        assert_eq!(settled.event_type(), "TestSettled");
    }
}
