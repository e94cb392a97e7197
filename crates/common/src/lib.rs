//! Shared identifiers and the reference clock used across the order
//! processing crates.

pub mod clock;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use types::{AggregateId, ParseIdError};
