//! Payment commands.

use common::AggregateId;

use crate::command::Command;
use crate::order::Money;

use super::{GatewayOutcome, Payment, PaymentSource};

/// Command to register a payment against an order.
#[derive(Debug, Clone)]
pub struct CreatePayment {
    pub payment_id: AggregateId,
    pub order_id: AggregateId,
    pub source: PaymentSource,
    pub amount: Money,
}

impl CreatePayment {
    pub fn new(order_id: AggregateId, source: PaymentSource, amount: Money) -> Self {
        Self {
            payment_id: AggregateId::new(),
            order_id,
            source,
            amount,
        }
    }
}

/// Command to store what the gateway answered for a recorded request.
#[derive(Debug, Clone)]
pub struct RecordGatewayOutcome {
    pub payment_id: AggregateId,
    pub idempotency_key: String,
    pub outcome: GatewayOutcome,
}

/// Command to resolve a `processing` payment.
#[derive(Debug, Clone)]
pub struct ReconcilePayment {
    pub payment_id: AggregateId,
    pub outcome: GatewayOutcome,
}

macro_rules! payment_commands {
    ($($command:ty),* $(,)?) => {
        $(
            impl Command for $command {
                type Aggregate = Payment;

                fn aggregate_id(&self) -> AggregateId {
                    self.payment_id
                }
            }
        )*
    };
}

payment_commands!(CreatePayment, RecordGatewayOutcome, ReconcilePayment);
