//! Escrow Store port
//!
//! The relational store is an external collaborator: it owns atomicity,
//! durability and the uniqueness constraint on the external payment id.
//! Services only ever talk to it through [`EscrowStore`].

use crate::{
    error::StoreError,
    models::{EscrowStatus, EscrowTransaction, NewEscrow, NewPaymentEvent, PaymentEvent, TrustProfile},
};
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryEscrowStore;
#[cfg(feature = "postgres")]
pub use postgres::PgEscrowStore;

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait EscrowStore: Send + Sync {
    /// Insert through the store's exclusive-lock procedure.
    ///
    /// Returns `Ok(None)` when a row with the same payment id already exists
    /// and `Err(StoreError::ProcedureUnavailable)` when the procedure is not
    /// installed.
    async fn create_escrow_locked(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>>;

    /// Constrained insert that ignores a payment-id conflict (`Ok(None)`).
    async fn insert_escrow_if_absent(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>>;

    async fn find_escrow(&self, id: Uuid) -> StoreResult<Option<EscrowTransaction>>;

    async fn find_escrow_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<EscrowTransaction>>;

    /// Compare-and-set status transition. `Ok(None)` when the row is missing
    /// or not currently in `expected`.
    async fn update_escrow_status(
        &self,
        id: Uuid,
        expected: EscrowStatus,
        next: EscrowStatus,
    ) -> StoreResult<Option<EscrowTransaction>>;

    /// Append to the audit trail. A second event with the same
    /// `(payment_id, event_type)` fails with `StoreError::Duplicate`.
    async fn append_event(&self, event: NewPaymentEvent) -> StoreResult<PaymentEvent>;

    /// Events for a transaction, oldest first
    async fn list_events(&self, transaction_id: Uuid) -> StoreResult<Vec<PaymentEvent>>;

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<TrustProfile>>;

    /// Atomically adjust trust counters, creating the profile if needed
    async fn adjust_trust(
        &self,
        user_id: &str,
        score_delta: i32,
        score_cap: i32,
        points_delta: i64,
    ) -> StoreResult<TrustProfile>;

    /// Liveness probe
    async fn ping(&self) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn EscrowStore>;
