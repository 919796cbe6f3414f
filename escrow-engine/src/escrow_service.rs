//! Escrow Service - Initiate, GetStatus and Release
//!
//! Each operation performs one validated read/write against the escrow store,
//! appends an audit event and applies the trust reward. The only
//! concurrency-sensitive path is Initiate: two requests carrying the same
//! external payment id must leave exactly one row behind.

use crate::{
    error::{EscrowError, StoreError},
    models::{
        event_types, EscrowNotification, EscrowStatus, EscrowTransaction, NewEscrow,
        NewPaymentEvent, PaymentEvent,
    },
    reputation_indexer::ReputationIndexer,
    store::SharedStore,
    EscrowResult,
};
use chrono::Utc;
use rust_decimal::{prelude::FromPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{str::FromStr, sync::Arc};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Message shared by "does not exist" and "not yours"
pub const NOT_FOUND_MESSAGE: &str = "Escrow transaction not found or access denied";

/// Configuration for the escrow service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscrowServiceConfig {
    /// Currency used when the request names none
    pub default_currency: String,
    /// Optional upper bound on a single escrow amount
    pub max_amount: Option<Decimal>,
    /// Buffer size of the lifecycle notification channel
    pub notification_capacity: usize,
}

impl Default for EscrowServiceConfig {
    fn default() -> Self {
        Self {
            default_currency: "USD".to_string(),
            max_amount: None,
            notification_capacity: 256,
        }
    }
}

/// Escrow initiation request
#[derive(Debug, Clone, Default)]
pub struct InitiateEscrowRequest {
    pub product_id: Option<String>,
    /// Raw amount as received: JSON number or numeric string
    pub amount: Option<Value>,
    pub currency: Option<String>,
    pub buyer_id: Option<String>,
    pub seller_id: Option<String>,
    pub external_payment_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Escrow release request
#[derive(Debug, Clone)]
pub struct ReleaseEscrowRequest {
    pub transaction_id: Uuid,
    pub caller_id: String,
    pub confirmation_code: Option<String>,
    pub delivery_proof: Option<Value>,
}

/// Transaction with its audit trail
#[derive(Debug, Clone, Serialize)]
pub struct EscrowStatusView {
    pub transaction: EscrowTransaction,
    pub events: Vec<PaymentEvent>,
}

/// Result of a successful release
#[derive(Debug, Clone, Serialize)]
pub struct ReleaseReceipt {
    pub transaction_id: Uuid,
    pub transaction: EscrowTransaction,
}

/// Decimal places the store keeps for an amount
pub const MAX_AMOUNT_SCALE: u32 = 2;

/// Parse a request amount into a positive decimal
pub fn parse_amount(value: Option<&Value>) -> EscrowResult<Decimal> {
    let amount = match value {
        None | Some(Value::Null) => return Err(EscrowError::validation("amount is required")),
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                n.as_f64().and_then(Decimal::from_f64)
            }
        }
        Some(Value::String(s)) => Decimal::from_str(s.trim()).ok(),
        Some(_) => None,
    };

    match amount.map(|a| a.normalize()) {
        Some(amount) if amount.scale() > MAX_AMOUNT_SCALE => Err(EscrowError::validation(format!(
            "amount must have at most {} decimal places",
            MAX_AMOUNT_SCALE
        ))),
        Some(amount) if amount > Decimal::ZERO => Ok(amount),
        Some(_) => Err(EscrowError::validation("amount must be greater than 0")),
        None => Err(EscrowError::validation("amount must be a number")),
    }
}

/// Treat empty strings as absent
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Identifier sent either as a JSON string or a JSON number
pub fn id_from_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_empty(Some(s.clone())),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Stateless escrow request handlers over the shared store
pub struct EscrowService {
    config: EscrowServiceConfig,
    store: SharedStore,
    reputation: Arc<ReputationIndexer>,
    notifications: broadcast::Sender<EscrowNotification>,
}

impl EscrowService {
    /// Create a new escrow service
    pub fn new(
        config: EscrowServiceConfig,
        store: SharedStore,
        reputation: Arc<ReputationIndexer>,
    ) -> Self {
        let (notifications, _) = broadcast::channel(config.notification_capacity.max(1));
        Self {
            config,
            store,
            reputation,
            notifications,
        }
    }

    /// Subscribe to lifecycle notifications
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowNotification> {
        self.notifications.subscribe()
    }

    /// Create an escrow, or return the existing one for the same payment id
    pub async fn initiate(&self, request: InitiateEscrowRequest) -> EscrowResult<EscrowTransaction> {
        let new = self.validate_initiate_request(request)?;
        info!(
            "Initiating escrow for product {} (payment: {})",
            new.product_id, new.x402_payment_id
        );

        let created = match self.store.create_escrow_locked(&new).await {
            Ok(created) => created,
            Err(StoreError::ProcedureUnavailable(reason)) => {
                debug!("Lock procedure unavailable ({}), using constrained insert", reason);
                self.store.insert_escrow_if_absent(&new).await.map_err(|e| {
                    error!("Escrow insert failed for payment {}: {}", new.x402_payment_id, e);
                    EscrowError::from(e)
                })?
            }
            // A unique-key race surfacing as an error is still "already initiated"
            Err(StoreError::Duplicate(_)) => None,
            Err(e) => {
                error!("Escrow lock procedure failed for payment {}: {}", new.x402_payment_id, e);
                return Err(e.into());
            }
        };

        let transaction = match created {
            Some(transaction) => transaction,
            None => {
                info!("Escrow already initiated for payment {}", new.x402_payment_id);
                let existing = self
                    .store
                    .find_escrow_by_payment_id(&new.x402_payment_id)
                    .await?
                    .ok_or_else(|| {
                        EscrowError::store(format!(
                            "escrow for payment {} conflicted but could not be read back",
                            new.x402_payment_id
                        ))
                    })?;
                // Another buyer's row reads the same as a missing one
                if existing.buyer_id != new.buyer_id {
                    warn!(
                        "Payment {} already belongs to another buyer",
                        new.x402_payment_id
                    );
                    return Err(EscrowError::not_found(NOT_FOUND_MESSAGE));
                }
                return Ok(existing);
            }
        };

        self.store
            .append_event(
                NewPaymentEvent::new(
                    event_types::ESCROW_INITIATED,
                    json!({
                        "amount": transaction.amount,
                        "currency": transaction.currency,
                        "product_id": transaction.product_id,
                        "x402_payment_id": transaction.x402_payment_id,
                        "idempotency_key": transaction.idempotency_key,
                    }),
                )
                .for_transaction(transaction.id)
                .for_payment(transaction.x402_payment_id.clone()),
            )
            .await?;

        if let Err(e) = self.reputation.reward_initiation(&transaction.buyer_id).await {
            warn!("Trust reward failed for {}: {}", transaction.buyer_id, e);
        }

        self.publish(event_types::ESCROW_INITIATED, &transaction);
        info!("Created escrow: {}", transaction.id);

        Ok(transaction)
    }

    /// Transaction plus its events, if visible to the caller
    pub async fn get_status(&self, transaction_id: Uuid, caller_id: &str) -> EscrowResult<EscrowStatusView> {
        let transaction = self.find_visible(transaction_id, caller_id, |tx, caller| tx.is_party(caller)).await?;
        let events = self.store.list_events(transaction.id).await?;

        Ok(EscrowStatusView { transaction, events })
    }

    /// Release held funds; only the buyer may release
    pub async fn release(&self, request: ReleaseEscrowRequest) -> EscrowResult<ReleaseReceipt> {
        info!("Releasing escrow: {}", request.transaction_id);

        let transaction = self
            .find_visible(request.transaction_id, &request.caller_id, |tx, caller| {
                tx.buyer_id == caller
            })
            .await?;

        if !transaction.status.can_release() {
            warn!(
                "Release rejected for {}: status is {}",
                transaction.id, transaction.status
            );
            return Err(EscrowError::invalid_state(transaction.status.as_str()));
        }

        let released = match self
            .store
            .update_escrow_status(transaction.id, EscrowStatus::Escrowed, EscrowStatus::Released)
            .await?
        {
            Some(released) => released,
            None => {
                // Lost a race with another release
                let current = self
                    .store
                    .find_escrow(transaction.id)
                    .await?
                    .map(|tx| tx.status)
                    .unwrap_or(transaction.status);
                return Err(EscrowError::invalid_state(current.as_str()));
            }
        };

        self.store
            .append_event(
                NewPaymentEvent::new(
                    event_types::ESCROW_RELEASED,
                    json!({
                        "confirmation_code": request.confirmation_code,
                        "delivery_proof": request.delivery_proof,
                        "released_by": request.caller_id,
                        "released_at": Utc::now(),
                    }),
                )
                .for_transaction(released.id)
                .for_payment(released.x402_payment_id.clone()),
            )
            .await?;

        if let Err(e) = self.reputation.reward_release(&request.caller_id).await {
            warn!("Trust reward failed for {}: {}", request.caller_id, e);
        }

        self.publish(event_types::ESCROW_RELEASED, &released);
        info!("Released escrow: {}", released.id);

        Ok(ReleaseReceipt {
            transaction_id: released.id,
            transaction: released,
        })
    }

    async fn find_visible<F>(
        &self,
        transaction_id: Uuid,
        caller_id: &str,
        visible: F,
    ) -> EscrowResult<EscrowTransaction>
    where
        F: Fn(&EscrowTransaction, &str) -> bool,
    {
        match self.store.find_escrow(transaction_id).await? {
            Some(tx) if !caller_id.is_empty() && visible(&tx, caller_id) => Ok(tx),
            _ => {
                debug!("Escrow {} not visible to caller", transaction_id);
                Err(EscrowError::not_found(NOT_FOUND_MESSAGE))
            }
        }
    }

    fn publish(&self, kind: &str, transaction: &EscrowTransaction) {
        // No receivers is fine
        let _ = self
            .notifications
            .send(EscrowNotification::from_transaction(kind, transaction));
    }

    fn validate_initiate_request(&self, request: InitiateEscrowRequest) -> EscrowResult<NewEscrow> {
        let product_id = non_empty(request.product_id)
            .ok_or_else(|| EscrowError::validation("productId and amount are required"))?;
        if request.amount.is_none() {
            return Err(EscrowError::validation("productId and amount are required"));
        }
        let amount = parse_amount(request.amount.as_ref())?;

        if let Some(max) = self.config.max_amount {
            if amount > max {
                return Err(EscrowError::validation(format!(
                    "amount {} exceeds maximum {}",
                    amount, max
                )));
            }
        }

        let buyer_id = non_empty(request.buyer_id)
            .ok_or_else(|| EscrowError::validation("buyer_id is required"))?;
        let currency = non_empty(request.currency)
            .map(|c| c.to_uppercase())
            .unwrap_or_else(|| self.config.default_currency.clone());
        let payment_id = non_empty(request.external_payment_id)
            .unwrap_or_else(|| format!("escrow_{}", Uuid::new_v4()));

        Ok(NewEscrow::new(
            buyer_id,
            non_empty(request.seller_id),
            product_id,
            amount,
            currency,
            payment_id,
            non_empty(request.idempotency_key),
            Utc::now(),
        ))
    }
}
