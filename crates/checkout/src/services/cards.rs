//! Stored credit cards.

use std::collections::HashMap;
use std::sync::Arc;

use common::{Clock, SystemClock};
use domain::card::{CardDetails, CardError, CardId, CreditCard};
use tokio::sync::RwLock;

/// Persistence boundary for credit cards.
///
/// Receives raw card input once, keeps only the stored form. A card
/// registered under gateway profile tokens that an earlier card already uses
/// takes its brand, last digits, expiry and name from that card.
#[derive(Clone)]
pub struct CreditCardRegistry {
    cards: Arc<RwLock<HashMap<CardId, CreditCard>>>,
    clock: Arc<dyn Clock>,
}

impl Default for CreditCardRegistry {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl CreditCardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            cards: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    #[tracing::instrument(skip(self, details))]
    pub async fn register(&self, details: CardDetails) -> Result<CreditCard, CardError> {
        let now = self.clock.now();
        let mut card = CreditCard::create(details, &now)?;

        let mut cards = self.cards.write().await;
        if card.has_payment_profile() {
            if let Some(existing) = cards.values().find(|c| card.shares_profile_with(c)) {
                card.inherit_profile(existing);
                card.validate_expiry(&now)?;
                tracing::debug!(card_id = %card.id, "reused stored gateway profile");
            }
        }

        cards.insert(card.id, card.clone());
        Ok(card)
    }

    pub async fn get(&self, card_id: CardId) -> Option<CreditCard> {
        self.cards.read().await.get(&card_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.cards.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cards.read().await.is_empty()
    }
}
