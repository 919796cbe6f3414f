//! Core data models for the escrow system
//!
//! Escrow transactions, the append-only payment event trail, trust profiles
//! and the notifications pushed to connected clients.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Days an escrow stays open before it expires
pub const ESCROW_EXPIRY_DAYS: i64 = 7;

/// Escrow status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    /// Funds held awaiting release
    Escrowed,
    /// Funds released to the seller
    Released,
    /// Under dispute
    Disputed,
    /// Expiry passed without release
    Expired,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Escrowed => "escrowed",
            Self::Released => "released",
            Self::Disputed => "disputed",
            Self::Expired => "expired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "escrowed" => Some(Self::Escrowed),
            "released" => Some(Self::Released),
            "disputed" => Some(Self::Disputed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }

    /// Check if this status allows release
    pub fn can_release(&self) -> bool {
        matches!(self, Self::Escrowed)
    }
}

impl std::fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conditions under which held funds may be released
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConditions {
    pub requires_delivery_confirmation: bool,
    pub auto_release_after_days: u32,
    pub dispute_window_hours: u32,
}

impl Default for ReleaseConditions {
    fn default() -> Self {
        Self {
            requires_delivery_confirmation: true,
            auto_release_after_days: 7,
            dispute_window_hours: 48,
        }
    }
}

/// Escrow transaction row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowTransaction {
    pub id: Uuid,

    // Parties
    pub buyer_id: String,
    pub seller_id: Option<String>,

    // Subject
    pub product_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub currency: String,
    pub status: EscrowStatus,

    // Payment correlation
    pub x402_payment_id: String,
    pub idempotency_key: Option<String>,

    pub release_conditions: ReleaseConditions,

    // Timestamps
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EscrowTransaction {
    /// Whether `user_id` is a party to this escrow
    pub fn is_party(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id.as_deref() == Some(user_id)
    }
}

/// Insert request for a new escrow row; the store assigns the id
#[derive(Debug, Clone)]
pub struct NewEscrow {
    pub buyer_id: String,
    pub seller_id: Option<String>,
    pub product_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub x402_payment_id: String,
    pub idempotency_key: Option<String>,
    pub release_conditions: ReleaseConditions,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl NewEscrow {
    /// Build an escrow that expires [`ESCROW_EXPIRY_DAYS`] after `now`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buyer_id: String,
        seller_id: Option<String>,
        product_id: String,
        amount: Decimal,
        currency: String,
        x402_payment_id: String,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            buyer_id,
            seller_id,
            product_id,
            amount,
            currency,
            x402_payment_id,
            idempotency_key,
            release_conditions: ReleaseConditions::default(),
            created_at: now,
            expires_at: now + Duration::days(ESCROW_EXPIRY_DAYS),
        }
    }

    /// Materialize the row a store would write
    pub fn into_transaction(self, id: Uuid) -> EscrowTransaction {
        EscrowTransaction {
            id,
            buyer_id: self.buyer_id,
            seller_id: self.seller_id,
            product_id: self.product_id,
            amount: self.amount,
            currency: self.currency,
            status: EscrowStatus::Escrowed,
            x402_payment_id: self.x402_payment_id,
            idempotency_key: self.idempotency_key,
            release_conditions: self.release_conditions,
            created_at: self.created_at,
            expires_at: self.expires_at,
            updated_at: self.created_at,
        }
    }
}

/// Event type tags written to the audit trail
pub mod event_types {
    pub const PAYMENT_INITIATED: &str = "payment_initiated";
    pub const ESCROW_INITIATED: &str = "escrow_initiated";
    pub const ESCROW_RELEASED: &str = "escrow_released";
}

/// Payment event for audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: i64,
    pub transaction_id: Option<Uuid>,
    pub payment_id: Option<String>,
    pub event_type: String,
    pub event_data: serde_json::Value,

    // Timestamp (immutable)
    pub created_at: DateTime<Utc>,
}

/// Append request for the audit trail
#[derive(Debug, Clone)]
pub struct NewPaymentEvent {
    pub transaction_id: Option<Uuid>,
    pub payment_id: Option<String>,
    pub event_type: String,
    pub event_data: serde_json::Value,
}

impl NewPaymentEvent {
    pub fn new(event_type: &str, event_data: serde_json::Value) -> Self {
        Self {
            transaction_id: None,
            payment_id: None,
            event_type: event_type.to_string(),
            event_data,
        }
    }

    pub fn for_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn for_payment(mut self, payment_id: impl Into<String>) -> Self {
        self.payment_id = Some(payment_id.into());
        self
    }
}

/// Trust score bounds
pub const MIN_TRUST_SCORE: i32 = 0;
pub const MAX_TRUST_SCORE: i32 = 100;
/// Starting score for a profile seen for the first time
pub const INITIAL_TRUST_SCORE: i32 = 50;

/// Reputation counters on a user profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustProfile {
    pub user_id: String,
    pub trust_score: i32,
    pub trust_points: i64,
    pub updated_at: DateTime<Utc>,
}

impl TrustProfile {
    /// Create new profile entry
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            trust_score: INITIAL_TRUST_SCORE,
            trust_points: 0,
            updated_at: Utc::now(),
        }
    }

    /// Apply a reward; the score never leaves `[MIN_TRUST_SCORE, score_cap]`
    pub fn apply(&mut self, score_delta: i32, score_cap: i32, points_delta: i64) {
        let cap = score_cap.min(MAX_TRUST_SCORE);
        self.trust_score = (self.trust_score + score_delta).min(cap).max(MIN_TRUST_SCORE);
        self.trust_points += points_delta;
        self.updated_at = Utc::now();
    }
}

/// Lifecycle change pushed to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowNotification {
    pub kind: String,
    pub transaction_id: Uuid,
    pub buyer_id: String,
    pub seller_id: Option<String>,
    pub status: EscrowStatus,
    pub at: DateTime<Utc>,
}

impl EscrowNotification {
    pub fn from_transaction(kind: &str, tx: &EscrowTransaction) -> Self {
        Self {
            kind: kind.to_string(),
            transaction_id: tx.id,
            buyer_id: tx.buyer_id.clone(),
            seller_id: tx.seller_id.clone(),
            status: tx.status,
            at: Utc::now(),
        }
    }

    /// Whether `user_id` should receive this notification
    pub fn concerns(&self, user_id: &str) -> bool {
        self.buyer_id == user_id || self.seller_id.as_deref() == Some(user_id)
    }
}
