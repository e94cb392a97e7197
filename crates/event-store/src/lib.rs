//! Append-only event log.
//!
//! Every order and payment is stored as a stream of events keyed by its
//! [`AggregateId`]. Appends carry the version the writer last observed, so two
//! writers racing on the same record cannot both succeed; the loser receives
//! [`EventStoreError::ConcurrencyConflict`] and must re-read.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore};
