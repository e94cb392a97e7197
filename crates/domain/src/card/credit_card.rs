//! Stored credit card.

use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CardBrand, CardError, Expiry, last_digits, normalize_brand, validate_expiry};

/// Identifier of a stored card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(Uuid);

impl CardId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for CardId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CardId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Card input as submitted by a shopper or a tokenizing client.
///
/// The raw number and verification value live only here; they are consumed
/// by [`CreditCard::create`] and never copied onto the stored card.
#[derive(Clone, Default, Deserialize)]
pub struct CardDetails {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub verification_value: Option<String>,
    #[serde(default)]
    pub month: Option<u32>,
    #[serde(default)]
    pub year: Option<i32>,
    /// Combined expiry such as `04/28`; takes precedence over month/year.
    #[serde(default)]
    pub expiry: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Brand reported by the client, e.g. `mastercard` or `amex`.
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub gateway_customer_profile_id: Option<String>,
    #[serde(default)]
    pub gateway_payment_profile_id: Option<String>,
    /// Set when the card data was already encrypted by an upstream vault.
    #[serde(default)]
    pub encrypted_data: Option<String>,
}

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails")
            .field("number", &self.number.as_ref().map(|_| "[REDACTED]"))
            .field(
                "verification_value",
                &self.verification_value.as_ref().map(|_| "[REDACTED]"),
            )
            .field("month", &self.month)
            .field("year", &self.year)
            .field("name", &self.name)
            .field("brand", &self.brand)
            .field(
                "gateway_customer_profile_id",
                &self.gateway_customer_profile_id,
            )
            .field("gateway_payment_profile_id", &self.gateway_payment_profile_id)
            .field("encrypted", &self.encrypted_data.is_some())
            .finish()
    }
}

fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

impl CardDetails {
    pub fn has_payment_profile(&self) -> bool {
        present(&self.gateway_customer_profile_id) || present(&self.gateway_payment_profile_id)
    }

    /// Full card data is required unless the card is tokenized or encrypted.
    pub fn require_card_numbers(&self) -> bool {
        !present(&self.encrypted_data) && !self.has_payment_profile()
    }
}

/// A card as it is persisted: masked, with no raw number or CVV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditCard {
    pub id: CardId,
    pub month: Option<u32>,
    pub year: Option<i32>,
    pub name: Option<String>,
    pub cc_type: CardBrand,
    pub last_digits: String,
    pub gateway_customer_profile_id: Option<String>,
    pub gateway_payment_profile_id: Option<String>,
}

impl CreditCard {
    /// Validates card input and builds the stored card.
    ///
    /// `last_digits` and `cc_type` are derived here once; the raw number is
    /// dropped with `details`.
    pub fn create<Tz: TimeZone>(details: CardDetails, now: &DateTime<Tz>) -> Result<Self, CardError> {
        let (month, year) = match details.expiry.as_deref().filter(|e| !e.trim().is_empty()) {
            Some(raw) => {
                let expiry = Expiry::parse(raw)?;
                (Some(expiry.month), Some(expiry.year))
            }
            None => (details.month, details.year),
        };

        if details.require_card_numbers() {
            let mut missing = Vec::new();
            if month.is_none() {
                missing.push("month");
            }
            if year.is_none() {
                missing.push("year");
            }
            if !present(&details.number) {
                missing.push("number");
            }
            if !present(&details.name) {
                missing.push("name");
            }
            if !present(&details.verification_value) {
                missing.push("verification_value");
            }
            if !missing.is_empty() {
                return Err(CardError::MissingFields { fields: missing });
            }
        }

        if let (Some(month), Some(year)) = (month, year) {
            validate_expiry(month, year, now)?;
        }

        let number: Option<String> = details
            .number
            .as_deref()
            .map(|n| n.chars().filter(|c| c.is_ascii_digit()).collect());
        let cc_type = normalize_brand(details.brand.as_deref().unwrap_or(""), number.as_deref());

        Ok(Self {
            id: CardId::new(),
            month,
            year,
            name: details.name.filter(|n| !n.trim().is_empty()),
            cc_type,
            last_digits: number.as_deref().map(last_digits).unwrap_or_default(),
            gateway_customer_profile_id: details.gateway_customer_profile_id,
            gateway_payment_profile_id: details.gateway_payment_profile_id,
        })
    }

    pub fn has_payment_profile(&self) -> bool {
        present(&self.gateway_customer_profile_id) || present(&self.gateway_payment_profile_id)
    }

    /// Whether `other` was stored under the same pair of gateway tokens.
    pub fn shares_profile_with(&self, other: &CreditCard) -> bool {
        self.gateway_customer_profile_id == other.gateway_customer_profile_id
            && self.gateway_payment_profile_id == other.gateway_payment_profile_id
    }

    /// Copies the displayable card attributes from a card stored under the
    /// same gateway profile.
    pub fn inherit_profile(&mut self, existing: &CreditCard) {
        self.cc_type = existing.cc_type.clone();
        self.last_digits = existing.last_digits.clone();
        self.month = existing.month;
        self.name = existing.name.clone();
        self.year = existing.year;
    }

    /// Re-runs the expiry check against the stored month and year, if any.
    pub fn validate_expiry<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<(), CardError> {
        match (self.month, self.year) {
            (Some(month), Some(year)) => validate_expiry(month, year, now),
            _ => Ok(()),
        }
    }

    pub fn display_number(&self) -> String {
        format!("XXXX-XXXX-XXXX-{}", self.last_digits)
    }

    pub fn first_name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .and_then(|name| name.split_whitespace().next())
    }

    pub fn last_name(&self) -> Option<&str> {
        let name = self.name.as_deref()?.trim_start();
        let (_, rest) = name.split_once(char::is_whitespace)?;
        Some(rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 9, 0, 0).unwrap()
    }

    fn full_details() -> CardDetails {
        CardDetails {
            number: Some("4111 1111 1111 1111".to_string()),
            verification_value: Some("123".to_string()),
            month: Some(9),
            year: Some(2029),
            name: Some("Ada Lovelace".to_string()),
            brand: Some(String::new()),
            ..Default::default()
        }
    }

    #[test]
    fn create_derives_brand_and_last_digits() {
        let card = CreditCard::create(full_details(), &now()).unwrap();
        assert_eq!(card.cc_type, CardBrand::Visa);
        assert_eq!(card.last_digits, "1111");
        assert_eq!(card.display_number(), "XXXX-XXXX-XXXX-1111");
    }

    #[test]
    fn stored_card_never_serializes_the_number() {
        let card = CreditCard::create(full_details(), &now()).unwrap();
        let json = serde_json::to_string(&card).unwrap();
        assert!(!json.contains("4111 1111"));
        assert!(!json.contains("4111111111111111"));
        assert!(!json.contains("verification_value"));
    }

    #[test]
    fn debug_output_redacts_number_and_cvv() {
        let rendered = format!("{:?}", full_details());
        assert!(!rendered.contains("4111"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn missing_fields_are_named() {
        let details = CardDetails {
            number: Some("4111111111111111".to_string()),
            ..Default::default()
        };
        match CreditCard::create(details, &now()) {
            Err(CardError::MissingFields { fields }) => {
                assert_eq!(fields, vec!["month", "year", "name", "verification_value"]);
            }
            other => panic!("expected MissingFields, got {other:?}"),
        }
    }

    #[test]
    fn tokenized_card_needs_no_number() {
        let details = CardDetails {
            gateway_customer_profile_id: Some("cus_1".to_string()),
            gateway_payment_profile_id: Some("card_1".to_string()),
            ..Default::default()
        };
        assert!(!details.require_card_numbers());
        let card = CreditCard::create(details, &now()).unwrap();
        assert!(card.has_payment_profile());
        assert_eq!(card.last_digits, "");
    }

    #[test]
    fn encrypted_card_needs_no_number() {
        let details = CardDetails {
            encrypted_data: Some("blob".to_string()),
            ..Default::default()
        };
        assert!(!details.require_card_numbers());
        assert!(CreditCard::create(details, &now()).is_ok());
    }

    #[test]
    fn tokenized_card_still_checks_expiry() {
        let details = CardDetails {
            gateway_customer_profile_id: Some("cus_1".to_string()),
            month: Some(1),
            year: Some(2020),
            ..Default::default()
        };
        assert!(matches!(
            CreditCard::create(details, &now()),
            Err(CardError::Expired { .. })
        ));
    }

    #[test]
    fn expiry_string_sets_month_and_year() {
        let details = CardDetails {
            month: None,
            year: None,
            expiry: Some("11 / 2030".to_string()),
            ..full_details()
        };
        let card = CreditCard::create(details, &now()).unwrap();
        assert_eq!(card.month, Some(11));
        assert_eq!(card.year, Some(2030));
    }

    #[test]
    fn explicit_brand_is_normalized() {
        let details = CardDetails {
            number: Some("5555555555554444".to_string()),
            brand: Some("mastercard".to_string()),
            ..full_details()
        };
        let card = CreditCard::create(details, &now()).unwrap();
        assert_eq!(card.cc_type, CardBrand::Master);
    }

    #[test]
    fn inherit_profile_copies_display_fields() {
        let mut existing = CreditCard::create(full_details(), &now()).unwrap();
        existing.gateway_customer_profile_id = Some("cus_1".to_string());
        existing.gateway_payment_profile_id = Some("card_1".to_string());

        let mut reused = CreditCard::create(
            CardDetails {
                gateway_customer_profile_id: Some("cus_1".to_string()),
                gateway_payment_profile_id: Some("card_1".to_string()),
                ..Default::default()
            },
            &now(),
        )
        .unwrap();

        assert!(reused.shares_profile_with(&existing));
        reused.inherit_profile(&existing);

        assert_eq!(reused.cc_type, CardBrand::Visa);
        assert_eq!(reused.last_digits, "1111");
        assert_eq!(reused.month, Some(9));
        assert_eq!(reused.year, Some(2029));
        assert_eq!(reused.name.as_deref(), Some("Ada Lovelace"));
        assert_ne!(reused.id, existing.id);
    }

    #[test]
    fn name_splits_on_first_whitespace() {
        let mut card = CreditCard::create(full_details(), &now()).unwrap();
        assert_eq!(card.first_name(), Some("Ada"));
        assert_eq!(card.last_name(), Some("Lovelace"));

        card.name = Some("Jean Luc Picard".to_string());
        assert_eq!(card.first_name(), Some("Jean"));
        assert_eq!(card.last_name(), Some("Luc Picard"));

        card.name = Some("Cher".to_string());
        assert_eq!(card.first_name(), Some("Cher"));
        assert_eq!(card.last_name(), None);
    }
}
