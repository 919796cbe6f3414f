//! Payment-Required Gateway
//!
//! Answers with an x402-style "payment required" descriptor when the request
//! lacks a product or amount; otherwise forwards to the payment intake
//! endpoint, either in-process or over HTTP.

use crate::{
    error::EscrowError,
    escrow_service::{id_from_value, non_empty},
    payment_intake::{PaymentAccepted, PaymentIntakeRequest, PaymentIntakeService},
    EscrowResult,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Payment method tags advertised in the descriptor
pub const ACCEPTED_METHODS: [&str; 3] = ["x402", "crypto", "traditional"];

/// Configuration for the payment gateway
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaymentGatewayConfig {
    /// Where clients send the completed payment
    pub callback_url: String,
    /// Remote intake endpoint; in-process intake when unset
    pub intake_url: Option<String>,
    /// Timeout for the forwarded call in seconds
    pub forward_timeout_secs: u64,
    /// Currency used when the request names none
    pub default_currency: String,
}

impl Default for PaymentGatewayConfig {
    fn default() -> Self {
        Self {
            callback_url: "/process-x402-payment".to_string(),
            intake_url: None,
            forward_timeout_secs: 10,
            default_currency: "USD".to_string(),
        }
    }
}

/// Gateway request; every field may be absent
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayRequest {
    /// String or number
    #[serde(default, alias = "productId")]
    pub product_id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub buyer_id: Option<String>,
    #[serde(default)]
    pub seller_id: Option<String>,
}

/// Informational 402 body; creates no store row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentRequired {
    #[serde(rename = "x402Version")]
    pub x402_version: u32,
    pub error: String,
    pub payment_id: String,
    pub amount: Option<Value>,
    pub currency: String,
    pub product_id: Option<String>,
    pub accepted_methods: Vec<String>,
    pub callback_url: String,
}

/// Intake result plus the gateway-assigned payment id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForwardedPayment {
    pub x402_payment_id: String,
    #[serde(flatten)]
    pub intake: PaymentAccepted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    PaymentRequired(PaymentRequired),
    Forwarded(ForwardedPayment),
}

/// Delivers a payment to the intake endpoint
#[async_trait]
pub trait IntakeForwarder: Send + Sync {
    async fn forward(&self, request: PaymentIntakeRequest) -> EscrowResult<PaymentAccepted>;
}

/// Calls the intake service in-process
pub struct LocalIntake {
    intake: Arc<PaymentIntakeService>,
}

impl LocalIntake {
    pub fn new(intake: Arc<PaymentIntakeService>) -> Self {
        Self { intake }
    }
}

#[async_trait]
impl IntakeForwarder for LocalIntake {
    async fn forward(&self, request: PaymentIntakeRequest) -> EscrowResult<PaymentAccepted> {
        self.intake.accept(request).await.map_err(|e| {
            EscrowError::upstream(
                Some(e.http_status()),
                format!("Payment processing failed: {}", e),
            )
        })
    }
}

/// POSTs to a remote intake endpoint
pub struct HttpIntake {
    client: reqwest::Client,
    url: String,
}

impl HttpIntake {
    pub fn new(url: impl Into<String>, timeout: Duration) -> EscrowResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EscrowError::config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl IntakeForwarder for HttpIntake {
    async fn forward(&self, request: PaymentIntakeRequest) -> EscrowResult<PaymentAccepted> {
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EscrowError::upstream(None, format!("Payment processing failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string());
            return Err(EscrowError::upstream(
                Some(status.as_u16()),
                format!("Payment processing failed: {}", reason),
            ));
        }

        response.json::<PaymentAccepted>().await.map_err(|e| {
            EscrowError::upstream(Some(502), format!("Payment processing failed: {}", e))
        })
    }
}

pub struct PaymentGateway {
    config: PaymentGatewayConfig,
    forwarder: Arc<dyn IntakeForwarder>,
}

impl PaymentGateway {
    pub fn new(config: PaymentGatewayConfig, forwarder: Arc<dyn IntakeForwarder>) -> Self {
        Self { config, forwarder }
    }

    /// Descriptor when product or amount is missing, forwarded intake otherwise
    pub async fn check_and_gate(&self, request: GatewayRequest) -> EscrowResult<GateOutcome> {
        let product_id = id_from_value(request.product_id.as_ref());
        let currency = non_empty(request.currency)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.config.default_currency.clone());

        let amount = request.amount.filter(|a| !a.is_null());

        let (product_id, amount) = match (product_id, amount) {
            (Some(product_id), Some(amount)) => (product_id, amount),
            (product_id, amount) => {
                let payment_id = format!("x402_{}", Uuid::new_v4());
                info!("Payment required, issued descriptor {}", payment_id);
                return Ok(GateOutcome::PaymentRequired(PaymentRequired {
                    x402_version: 1,
                    error: "payment_required".to_string(),
                    payment_id,
                    amount,
                    currency,
                    product_id,
                    accepted_methods: ACCEPTED_METHODS.iter().map(|m| m.to_string()).collect(),
                    callback_url: self.config.callback_url.clone(),
                }));
            }
        };

        let payment_id = format!("pay_{}", Uuid::new_v4());
        info!("Forwarding payment {} for product {} to intake", payment_id, product_id);

        let intake = self
            .forwarder
            .forward(PaymentIntakeRequest {
                payment_id: Some(payment_id.clone()),
                amount: Some(amount),
                currency: Some(currency),
                buyer_id: request.buyer_id,
                seller_id: request.seller_id,
            })
            .await
            .map_err(|e| {
                match &e {
                    EscrowError::Upstream { status: Some(s), .. } if *s < 500 => {
                        warn!("Intake rejected payment {}: {}", payment_id, e)
                    }
                    _ => error!("Intake failed for payment {}: {}", payment_id, e),
                }
                e
            })?;

        Ok(GateOutcome::Forwarded(ForwardedPayment {
            x402_payment_id: payment_id,
            intake,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEscrowStore;
    use serde_json::json;

    fn gateway() -> (PaymentGateway, Arc<InMemoryEscrowStore>) {
        let store = Arc::new(InMemoryEscrowStore::new());
        let intake = Arc::new(PaymentIntakeService::new(store.clone(), "USD"));
        let gateway = PaymentGateway::new(
            PaymentGatewayConfig::default(),
            Arc::new(LocalIntake::new(intake)),
        );
        (gateway, store)
    }

    #[tokio::test]
    async fn test_missing_fields_yield_descriptor() {
        let (gateway, store) = gateway();

        let outcome = gateway
            .check_and_gate(GatewayRequest {
                product_id: Some(json!("1")),
                ..Default::default()
            })
            .await
            .unwrap();

        match outcome {
            GateOutcome::PaymentRequired(descriptor) => {
                assert!(descriptor.payment_id.starts_with("x402_"));
                assert_eq!(descriptor.accepted_methods, vec!["x402", "crypto", "traditional"]);
                assert_eq!(descriptor.currency, "USD");
                assert_eq!(descriptor.product_id.as_deref(), Some("1"));
            }
            other => panic!("Expected descriptor, got {:?}", other),
        }
        assert_eq!(store.event_count().await, 0);
    }

    #[tokio::test]
    async fn test_complete_request_is_forwarded() {
        let (gateway, store) = gateway();

        let outcome = gateway
            .check_and_gate(GatewayRequest {
                product_id: Some(json!("1")),
                amount: Some(json!(25)),
                currency: Some("eur".to_string()),
                buyer_id: Some("buyer".to_string()),
                seller_id: None,
            })
            .await
            .unwrap();

        match outcome {
            GateOutcome::Forwarded(forwarded) => {
                assert!(forwarded.x402_payment_id.starts_with("pay_"));
                assert_eq!(forwarded.intake.payment_id, forwarded.x402_payment_id);
                assert_eq!(forwarded.intake.currency, "EUR");
                assert_eq!(forwarded.intake.status, "accepted");
            }
            other => panic!("Expected forwarded payment, got {:?}", other),
        }
        assert_eq!(store.event_count().await, 1);
    }

    #[tokio::test]
    async fn test_intake_failure_is_upstream_error() {
        let (gateway, _) = gateway();

        let err = gateway
            .check_and_gate(GatewayRequest {
                product_id: Some(json!("1")),
                amount: Some(json!(25)),
                ..Default::default()
            })
            .await
            .unwrap_err();

        match err {
            EscrowError::Upstream { status, message } => {
                assert_eq!(status, Some(400));
                assert!(message.contains("buyer_id"));
            }
            other => panic!("Expected upstream error, got {:?}", other),
        }
    }
}
