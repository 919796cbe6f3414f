//! In-memory escrow store
//!
//! Keeps every table behind one `RwLock` so the payment-id uniqueness check
//! and the insert happen under the same write guard.

use super::{EscrowStore, StoreResult};
use crate::{
    error::StoreError,
    models::{EscrowStatus, EscrowTransaction, NewEscrow, NewPaymentEvent, PaymentEvent, TrustProfile},
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    escrows: HashMap<Uuid, EscrowTransaction>,
    // x402_payment_id -> escrow id
    payment_index: HashMap<String, Uuid>,
    events: Vec<PaymentEvent>,
    // (payment_id, event_type)
    event_keys: HashSet<(String, String)>,
    profiles: HashMap<String, TrustProfile>,
    next_event_id: i64,
}

pub struct InMemoryEscrowStore {
    tables: RwLock<Tables>,
    lock_procedure: bool,
}

impl InMemoryEscrowStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            lock_procedure: true,
        }
    }

    /// A store without the exclusive-lock procedure installed
    pub fn without_lock_procedure() -> Self {
        Self {
            lock_procedure: false,
            ..Self::new()
        }
    }

    pub async fn escrow_count(&self) -> usize {
        self.tables.read().await.escrows.len()
    }

    pub async fn event_count(&self) -> usize {
        self.tables.read().await.events.len()
    }

    async fn insert_unique(&self, new: &NewEscrow) -> Option<EscrowTransaction> {
        let mut tables = self.tables.write().await;
        if tables.payment_index.contains_key(&new.x402_payment_id) {
            return None;
        }

        let tx = new.clone().into_transaction(Uuid::new_v4());
        tables.payment_index.insert(tx.x402_payment_id.clone(), tx.id);
        tables.escrows.insert(tx.id, tx.clone());
        Some(tx)
    }
}

impl Default for InMemoryEscrowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EscrowStore for InMemoryEscrowStore {
    async fn create_escrow_locked(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>> {
        if !self.lock_procedure {
            return Err(StoreError::ProcedureUnavailable(
                "create_escrow_with_lock".to_string(),
            ));
        }
        Ok(self.insert_unique(new).await)
    }

    async fn insert_escrow_if_absent(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>> {
        Ok(self.insert_unique(new).await)
    }

    async fn find_escrow(&self, id: Uuid) -> StoreResult<Option<EscrowTransaction>> {
        Ok(self.tables.read().await.escrows.get(&id).cloned())
    }

    async fn find_escrow_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<EscrowTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .payment_index
            .get(payment_id)
            .and_then(|id| tables.escrows.get(id))
            .cloned())
    }

    async fn update_escrow_status(
        &self,
        id: Uuid,
        expected: EscrowStatus,
        next: EscrowStatus,
    ) -> StoreResult<Option<EscrowTransaction>> {
        let mut tables = self.tables.write().await;
        match tables.escrows.get_mut(&id) {
            Some(tx) if tx.status == expected => {
                tx.status = next;
                tx.updated_at = Utc::now();
                Ok(Some(tx.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn append_event(&self, event: NewPaymentEvent) -> StoreResult<PaymentEvent> {
        let mut tables = self.tables.write().await;

        if let Some(payment_id) = &event.payment_id {
            let key = (payment_id.clone(), event.event_type.clone());
            if tables.event_keys.contains(&key) {
                return Err(StoreError::Duplicate(format!(
                    "{} for payment {}",
                    event.event_type, payment_id
                )));
            }
            tables.event_keys.insert(key);
        }

        tables.next_event_id += 1;
        let stored = PaymentEvent {
            id: tables.next_event_id,
            transaction_id: event.transaction_id,
            payment_id: event.payment_id,
            event_type: event.event_type,
            event_data: event.event_data,
            created_at: Utc::now(),
        };
        tables.events.push(stored.clone());
        Ok(stored)
    }

    async fn list_events(&self, transaction_id: Uuid) -> StoreResult<Vec<PaymentEvent>> {
        let tables = self.tables.read().await;
        // Vec is append-only, so insertion order is oldest first
        Ok(tables
            .events
            .iter()
            .filter(|e| e.transaction_id == Some(transaction_id))
            .cloned()
            .collect())
    }

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<TrustProfile>> {
        Ok(self.tables.read().await.profiles.get(user_id).cloned())
    }

    async fn adjust_trust(
        &self,
        user_id: &str,
        score_delta: i32,
        score_cap: i32,
        points_delta: i64,
    ) -> StoreResult<TrustProfile> {
        let mut tables = self.tables.write().await;
        let profile = tables
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| TrustProfile::new(user_id.to_string()));
        profile.apply(score_delta, score_cap, points_delta);
        Ok(profile.clone())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event_types;
    use rust_decimal_macros::dec;

    fn new_escrow(payment_id: &str) -> NewEscrow {
        NewEscrow::new(
            "buyer".to_string(),
            None,
            "1".to_string(),
            dec!(10),
            "USD".to_string(),
            payment_id.to_string(),
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_payment_id_is_unique() {
        let store = InMemoryEscrowStore::new();

        assert!(store.create_escrow_locked(&new_escrow("p1")).await.unwrap().is_some());
        assert!(store.create_escrow_locked(&new_escrow("p1")).await.unwrap().is_none());
        assert!(store.insert_escrow_if_absent(&new_escrow("p1")).await.unwrap().is_none());
        assert_eq!(store.escrow_count().await, 1);
    }

    #[tokio::test]
    async fn test_lock_procedure_can_be_absent() {
        let store = InMemoryEscrowStore::without_lock_procedure();
        let result = store.create_escrow_locked(&new_escrow("p1")).await;

        assert!(matches!(result, Err(StoreError::ProcedureUnavailable(_))));
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let store = InMemoryEscrowStore::new();
        let tx = store.insert_escrow_if_absent(&new_escrow("p1")).await.unwrap().unwrap();

        let released = store
            .update_escrow_status(tx.id, EscrowStatus::Escrowed, EscrowStatus::Released)
            .await
            .unwrap();
        assert_eq!(released.unwrap().status, EscrowStatus::Released);

        let again = store
            .update_escrow_status(tx.id, EscrowStatus::Escrowed, EscrowStatus::Released)
            .await
            .unwrap();
        assert!(again.is_none());
    }

    #[tokio::test]
    async fn test_event_key_uniqueness() {
        let store = InMemoryEscrowStore::new();
        let event = || {
            NewPaymentEvent::new(event_types::PAYMENT_INITIATED, serde_json::json!({}))
                .for_payment("p1")
        };

        store.append_event(event()).await.unwrap();
        let second = store.append_event(event()).await;

        assert!(matches!(second, Err(StoreError::Duplicate(_))));
        assert_eq!(store.event_count().await, 1);
    }
}
