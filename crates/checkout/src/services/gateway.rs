//! Payment gateway boundary and the bogus in-memory gateway.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::payment::SourceCapabilities;
use domain::{GatewayOperation, GatewayOutcome, Money, PaymentSource};
use tokio::sync::Mutex;

/// Trait for payment gateway calls.
///
/// Every call carries the idempotency key recorded on the payment before the
/// call was made. Declines are reported as unsuccessful outcomes, not errors.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(
        &self,
        source: &PaymentSource,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome;

    async fn capture(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome;

    async fn void(&self, transaction_ref: &str, idempotency_key: &str) -> GatewayOutcome;

    async fn credit(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome;
}

#[async_trait]
impl<G: PaymentGateway + ?Sized> PaymentGateway for Arc<G> {
    async fn authorize(
        &self,
        source: &PaymentSource,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        (**self).authorize(source, amount, idempotency_key).await
    }

    async fn capture(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        (**self).capture(transaction_ref, amount, idempotency_key).await
    }

    async fn void(&self, transaction_ref: &str, idempotency_key: &str) -> GatewayOutcome {
        (**self).void(transaction_ref, idempotency_key).await
    }

    async fn credit(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        (**self).credit(transaction_ref, amount, idempotency_key).await
    }
}

#[derive(Debug, Default)]
struct BogusGatewayState {
    declines: HashSet<GatewayOperation>,
    latency: Duration,
    calls: HashMap<GatewayOperation, u32>,
    answered: HashMap<String, GatewayOutcome>,
    next_ref: u32,
}

/// Gateway that approves everything unless told otherwise.
///
/// Answers are remembered per idempotency key, so a retried call with the
/// same key gets the original answer.
#[derive(Debug, Clone, Default)]
pub struct BogusGateway {
    state: Arc<Mutex<BogusGatewayState>>,
}

impl BogusGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call of `operation` fail.
    pub async fn decline(&self, operation: GatewayOperation) {
        self.state.lock().await.declines.insert(operation);
    }

    pub async fn approve(&self, operation: GatewayOperation) {
        self.state.lock().await.declines.remove(&operation);
    }

    /// Delay applied before every answer.
    pub async fn set_latency(&self, latency: Duration) {
        self.state.lock().await.latency = latency;
    }

    /// Number of calls received for `operation`, repeats included.
    pub async fn calls(&self, operation: GatewayOperation) -> u32 {
        self.state
            .lock()
            .await
            .calls
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    pub async fn total_calls(&self) -> u32 {
        self.state.lock().await.calls.values().sum()
    }

    async fn respond(
        &self,
        operation: GatewayOperation,
        idempotency_key: &str,
        detail: String,
    ) -> GatewayOutcome {
        let latency = {
            let mut state = self.state.lock().await;
            *state.calls.entry(operation).or_insert(0) += 1;
            state.latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.state.lock().await;
        if let Some(previous) = state.answered.get(idempotency_key) {
            return previous.clone();
        }

        let outcome = if state.declines.contains(&operation) {
            GatewayOutcome::failure("Bogus Gateway: Forced failure")
        } else {
            state.next_ref += 1;
            GatewayOutcome {
                success: true,
                transaction_ref: Some(format!("BGS-{:06}", state.next_ref)),
                message: Some(format!("Bogus Gateway: {operation} {detail}")),
            }
        };
        state
            .answered
            .insert(idempotency_key.to_string(), outcome.clone());
        outcome
    }
}

#[async_trait]
impl PaymentGateway for BogusGateway {
    async fn authorize(
        &self,
        source: &PaymentSource,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        let detail = format!("{amount} on {}", source.display());
        self.respond(GatewayOperation::Authorize, idempotency_key, detail)
            .await
    }

    async fn capture(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        let detail = format!("{amount} against {transaction_ref}");
        self.respond(GatewayOperation::Capture, idempotency_key, detail)
            .await
    }

    async fn void(&self, transaction_ref: &str, idempotency_key: &str) -> GatewayOutcome {
        self.respond(
            GatewayOperation::Void,
            idempotency_key,
            transaction_ref.to_string(),
        )
        .await
    }

    async fn credit(
        &self,
        transaction_ref: &str,
        amount: Money,
        idempotency_key: &str,
    ) -> GatewayOutcome {
        let detail = format!("{amount} against {transaction_ref}");
        self.respond(GatewayOperation::Credit, idempotency_key, detail)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::payment::Check;

    fn check() -> PaymentSource {
        PaymentSource::Check(Check {
            payer: "Grace Hopper".to_string(),
            check_number: None,
        })
    }

    #[tokio::test]
    async fn test_approves_by_default() {
        let gateway = BogusGateway::new();
        let outcome = gateway
            .authorize(&check(), Money::from_dollars(10), "p:authorize:1")
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.transaction_ref.as_deref(), Some("BGS-000001"));
        assert_eq!(gateway.calls(GatewayOperation::Authorize).await, 1);
    }

    #[tokio::test]
    async fn test_forced_decline() {
        let gateway = BogusGateway::new();
        gateway.decline(GatewayOperation::Capture).await;

        let outcome = gateway
            .capture("BGS-000001", Money::from_dollars(10), "p:capture:2")
            .await;
        assert!(!outcome.success);
        assert_eq!(
            outcome.message.as_deref(),
            Some("Bogus Gateway: Forced failure")
        );
    }

    #[tokio::test]
    async fn test_same_key_gets_same_answer() {
        let gateway = BogusGateway::new();
        let first = gateway.void("BGS-000001", "p:void:3").await;
        gateway.decline(GatewayOperation::Void).await;
        let second = gateway.void("BGS-000001", "p:void:3").await;

        assert_eq!(first, second);
        assert_eq!(gateway.calls(GatewayOperation::Void).await, 2);
        assert_eq!(gateway.total_calls().await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_delays_answer() {
        let gateway = BogusGateway::new();
        gateway.set_latency(Duration::from_secs(3)).await;

        let started = tokio::time::Instant::now();
        gateway
            .credit("BGS-000001", Money::from_dollars(1), "p:credit:4")
            .await;
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
