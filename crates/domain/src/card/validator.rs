//! Pure card checks: brand classification, expiry, masked digits.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::CardError;

/// Card network.
///
/// Brands reported by client-side tooling that are not one of the known
/// networks are kept verbatim in [`CardBrand::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CardBrand {
    Visa,
    Master,
    DinersClub,
    AmericanExpress,
    Discover,
    Jcb,
    Unknown,
    Other(String),
}

impl CardBrand {
    pub fn as_str(&self) -> &str {
        match self {
            CardBrand::Visa => "visa",
            CardBrand::Master => "master",
            CardBrand::DinersClub => "diners_club",
            CardBrand::AmericanExpress => "american_express",
            CardBrand::Discover => "discover",
            CardBrand::Jcb => "jcb",
            CardBrand::Unknown => "",
            CardBrand::Other(raw) => raw,
        }
    }
}

impl From<String> for CardBrand {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "visa" => CardBrand::Visa,
            "master" => CardBrand::Master,
            "diners_club" => CardBrand::DinersClub,
            "american_express" => CardBrand::AmericanExpress,
            "discover" => CardBrand::Discover,
            "jcb" => CardBrand::Jcb,
            "" => CardBrand::Unknown,
            _ => CardBrand::Other(raw),
        }
    }
}

impl From<CardBrand> for String {
    fn from(brand: CardBrand) -> Self {
        brand.as_str().to_string()
    }
}

impl std::fmt::Display for CardBrand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in this order; the first match wins.
static BRAND_PATTERNS: LazyLock<Vec<(CardBrand, Regex)>> = LazyLock::new(|| {
    [
        (CardBrand::Visa, r"^4[0-9]{12}(?:[0-9]{3})?$"),
        (
            CardBrand::Master,
            r"(^5[1-5][0-9]{14}$)|(^6759[0-9]{2}([0-9]{10})$)|(^6759[0-9]{2}([0-9]{12})$)|(^6759[0-9]{2}([0-9]{13})$)",
        ),
        (CardBrand::DinersClub, r"^3(?:0[0-5]|[68][0-9])[0-9]{11}$"),
        (CardBrand::AmericanExpress, r"^3[47][0-9]{13}$"),
        (CardBrand::Discover, r"^6(?:011|5[0-9]{2})[0-9]{12}$"),
        (CardBrand::Jcb, r"^(?:2131|1800|35\d{3})\d{11}$"),
    ]
    .into_iter()
    .filter_map(|(brand, pattern)| Regex::new(pattern).ok().map(|re| (brand, re)))
    .collect()
});

static SLASHED_EXPIRY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d\s?/\s?\d").ok());
static COMPACT_EXPIRY: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\d{2})(\d{2,4})").ok());

/// Determines the card network from the number. Spaces are ignored.
pub fn classify(number: &str) -> CardBrand {
    let number: String = number.chars().filter(|c| *c != ' ').collect();
    BRAND_PATTERNS
        .iter()
        .find(|(_, pattern)| pattern.is_match(&number))
        .map(|(brand, _)| brand.clone())
        .unwrap_or(CardBrand::Unknown)
}

/// Maps the brand names produced by browser card widgets onto the stored
/// brand names. An empty brand falls back to classifying the number.
pub fn normalize_brand(raw: &str, number: Option<&str>) -> CardBrand {
    match raw {
        "mastercard" | "maestro" => CardBrand::Master,
        "amex" => CardBrand::AmericanExpress,
        "dinersclub" => CardBrand::DinersClub,
        "" => number.map(classify).unwrap_or(CardBrand::Unknown),
        other => CardBrand::from(other.to_string()),
    }
}

/// Rejects a month outside 1..=12 and an expiry before the first day of
/// `now`'s month, evaluated in `now`'s time zone.
pub fn validate_expiry<Tz: TimeZone>(
    month: u32,
    year: i32,
    now: &DateTime<Tz>,
) -> Result<(), CardError> {
    if !(1..=12).contains(&month) {
        return Err(CardError::InvalidMonth { month });
    }

    let expires = NaiveDate::from_ymd_opt(year, month, 1).ok_or(CardError::InvalidMonth { month })?;
    let current = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .ok_or(CardError::InvalidMonth { month: now.month() })?;

    if expires < current {
        return Err(CardError::Expired { month, year });
    }
    Ok(())
}

/// Last four digits of a card number after dropping every non-digit.
/// Shorter inputs come back cleaned but unpadded.
pub fn last_digits(number: &str) -> String {
    let digits: String = number.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        digits
    } else {
        digits[digits.len() - 4..].to_string()
    }
}

/// Card expiry as month and four-digit year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expiry {
    pub month: u32,
    pub year: i32,
}

impl Expiry {
    /// Parses `mm/yy`, `mm / yyyy`, `mmyy` and `mmyyyy`. Two-digit years are
    /// taken as 20xx.
    pub fn parse(raw: &str) -> Result<Self, CardError> {
        let invalid = || CardError::InvalidExpiry {
            raw: raw.to_string(),
        };

        let (month, year) = if SLASHED_EXPIRY
            .as_ref()
            .is_some_and(|re| re.is_match(raw))
        {
            let compact: String = raw.chars().filter(|c| *c != ' ').collect();
            let mut parts = compact.splitn(2, '/');
            let month = parts.next().unwrap_or_default().to_string();
            let year = parts.next().unwrap_or_default().to_string();
            (month, year)
        } else if let Some(captures) = COMPACT_EXPIRY.as_ref().and_then(|re| re.captures(raw)) {
            (captures[1].to_string(), captures[2].to_string())
        } else {
            return Err(invalid());
        };

        let year = if year.len() == 2 {
            format!("20{year}")
        } else {
            year
        };

        Ok(Self {
            month: month.parse().map_err(|_| invalid())?,
            year: year.parse().map_err(|_| invalid())?,
        })
    }
}
