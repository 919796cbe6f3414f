//! Payment Intake Service
//!
//! Accepts a "payment accepted" envelope and records a `payment_initiated`
//! event keyed by payment id. A repeated payment id is a silent no-op so
//! retries look exactly like the first call.

use crate::{
    error::{EscrowError, StoreError},
    escrow_service::{non_empty, parse_amount},
    models::{event_types, NewPaymentEvent},
    store::SharedStore,
    EscrowResult,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

/// Literal status returned for every accepted payment
pub const ACCEPTED: &str = "accepted";

/// Payment intake request, as received
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentIntakeRequest {
    #[serde(default)]
    pub payment_id: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub buyer_id: Option<String>,
    #[serde(default)]
    pub seller_id: Option<String>,
}

/// Echo returned with HTTP 202
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentAccepted {
    pub status: String,
    pub payment_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub buyer_id: String,
    pub seller_id: Option<String>,
}

pub struct PaymentIntakeService {
    store: SharedStore,
    default_currency: String,
}

impl PaymentIntakeService {
    pub fn new(store: SharedStore, default_currency: impl Into<String>) -> Self {
        Self {
            store,
            default_currency: default_currency.into(),
        }
    }

    /// Record the payment; idempotent on `payment_id`
    pub async fn accept(&self, request: PaymentIntakeRequest) -> EscrowResult<PaymentAccepted> {
        let payment_id = non_empty(request.payment_id);
        let buyer_id = non_empty(request.buyer_id);
        let (payment_id, buyer_id) = match (payment_id, buyer_id, request.amount.is_some()) {
            (Some(p), Some(b), true) => (p, b),
            _ => {
                return Err(EscrowError::validation(
                    "payment_id, amount and buyer_id are required",
                ))
            }
        };
        let amount = parse_amount(request.amount.as_ref())?;
        let currency = non_empty(request.currency)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.default_currency.clone());
        let seller_id = non_empty(request.seller_id);

        let event = NewPaymentEvent::new(
            event_types::PAYMENT_INITIATED,
            json!({
                "amount": amount,
                "currency": currency,
                "buyer_id": buyer_id,
                "seller_id": seller_id,
            }),
        )
        .for_payment(payment_id.clone());

        match self.store.append_event(event).await {
            Ok(_) => info!("Accepted payment {}", payment_id),
            Err(StoreError::Duplicate(_)) => info!("Payment {} already recorded", payment_id),
            Err(e) => {
                error!("Recording payment {} failed: {}", payment_id, e);
                return Err(e.into());
            }
        }

        Ok(PaymentAccepted {
            status: ACCEPTED.to_string(),
            payment_id,
            amount,
            currency,
            buyer_id,
            seller_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEscrowStore;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn request() -> PaymentIntakeRequest {
        PaymentIntakeRequest {
            payment_id: Some("pay_1".to_string()),
            amount: Some(json!(42.5)),
            currency: None,
            buyer_id: Some("buyer".to_string()),
            seller_id: None,
        }
    }

    #[tokio::test]
    async fn test_accept_is_idempotent() {
        let store = Arc::new(InMemoryEscrowStore::new());
        let intake = PaymentIntakeService::new(store.clone(), "USD");

        let first = intake.accept(request()).await.unwrap();
        let second = intake.accept(request()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.status, ACCEPTED);
        assert_eq!(first.amount, dec!(42.5));
        assert_eq!(first.currency, "USD");
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_fields_rejected() {
        let intake = PaymentIntakeService::new(Arc::new(InMemoryEscrowStore::new()), "USD");

        let mut missing_buyer = request();
        missing_buyer.buyer_id = None;
        assert!(matches!(
            intake.accept(missing_buyer).await,
            Err(EscrowError::Validation(_))
        ));

        let mut missing_amount = request();
        missing_amount.amount = None;
        assert!(matches!(
            intake.accept(missing_amount).await,
            Err(EscrowError::Validation(_))
        ));
    }
}
