//! Card validation and the stored credit card payment source.

mod credit_card;
mod validator;

pub use credit_card::{CardDetails, CardId, CreditCard};
pub use validator::{CardBrand, Expiry, classify, last_digits, normalize_brand, validate_expiry};

use thiserror::Error;

/// Errors raised while validating card input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("Invalid expiry month: {month}")]
    InvalidMonth { month: u32 },

    #[error("Card expired: {month:02}/{year}")]
    Expired { month: u32, year: i32 },

    #[error("Could not parse expiry: {raw}")]
    InvalidExpiry { raw: String },

    /// Fields that are mandatory when the card is not tokenized.
    #[error("Missing required card fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },
}
