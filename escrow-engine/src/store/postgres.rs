//! PostgreSQL escrow store (feature `postgres`)
//!
//! Schema and the `create_escrow_with_lock` procedure live in
//! `migrations/0001_escrow.sql`.

use super::{EscrowStore, StoreResult};
use crate::{
    error::StoreError,
    models::{
        EscrowStatus, EscrowTransaction, NewEscrow, NewPaymentEvent, PaymentEvent,
        ReleaseConditions, TrustProfile, INITIAL_TRUST_SCORE, MIN_TRUST_SCORE,
    },
};
use async_trait::async_trait;
use sqlx::{
    postgres::{PgPool, PgPoolOptions, PgRow},
    types::Json,
    Row,
};
use tracing::{debug, info};
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";
const UNDEFINED_FUNCTION: &str = "42883";

const ESCROW_COLUMNS: &str = "id, buyer_id, seller_id, product_id, amount, currency, status, \
     x402_payment_id, idempotency_key, release_conditions, created_at, expires_at, updated_at";

pub struct PgEscrowStore {
    pool: PgPool,
}

impl PgEscrowStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        info!("Connecting escrow store (max_connections={})", max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(classify)?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn classify(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if let Some(classified) = classify_code(db.code().as_deref(), db.message()) {
            return classified;
        }
    }
    StoreError::backend(err.to_string())
}

/// Only a missing lock function counts as "procedure unavailable"
fn classify_code(code: Option<&str>, message: &str) -> Option<StoreError> {
    match code? {
        UNIQUE_VIOLATION => Some(StoreError::Duplicate(message.to_string())),
        UNDEFINED_FUNCTION => Some(StoreError::ProcedureUnavailable(message.to_string())),
        _ => None,
    }
}

fn escrow_from_row(row: &PgRow) -> Result<EscrowTransaction, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = EscrowStatus::parse(&status).ok_or_else(|| sqlx::Error::ColumnDecode {
        index: "status".to_string(),
        source: format!("unknown escrow status '{}'", status).into(),
    })?;
    let Json(release_conditions): Json<ReleaseConditions> = row.try_get("release_conditions")?;

    Ok(EscrowTransaction {
        id: row.try_get("id")?,
        buyer_id: row.try_get("buyer_id")?,
        seller_id: row.try_get("seller_id")?,
        product_id: row.try_get("product_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        status,
        x402_payment_id: row.try_get("x402_payment_id")?,
        idempotency_key: row.try_get("idempotency_key")?,
        release_conditions,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<PaymentEvent, sqlx::Error> {
    Ok(PaymentEvent {
        id: row.try_get("id")?,
        transaction_id: row.try_get("transaction_id")?,
        payment_id: row.try_get("payment_id")?,
        event_type: row.try_get("event_type")?,
        event_data: row.try_get("event_data")?,
        created_at: row.try_get("created_at")?,
    })
}

fn profile_from_row(row: &PgRow) -> Result<TrustProfile, sqlx::Error> {
    Ok(TrustProfile {
        user_id: row.try_get("user_id")?,
        trust_score: row.try_get("trust_score")?,
        trust_points: row.try_get("trust_points")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn map_optional_escrow(row: Option<PgRow>) -> StoreResult<Option<EscrowTransaction>> {
    row.as_ref()
        .map(escrow_from_row)
        .transpose()
        .map_err(|e| StoreError::backend(e.to_string()))
}

#[async_trait]
impl EscrowStore for PgEscrowStore {
    async fn create_escrow_locked(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>> {
        let sql = format!(
            "SELECT {} FROM create_escrow_with_lock($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            ESCROW_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&new.buyer_id)
            .bind(&new.seller_id)
            .bind(&new.product_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.x402_payment_id)
            .bind(&new.idempotency_key)
            .bind(Json(new.release_conditions.clone()))
            .bind(new.created_at)
            .bind(new.expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        map_optional_escrow(row)
    }

    async fn insert_escrow_if_absent(&self, new: &NewEscrow) -> StoreResult<Option<EscrowTransaction>> {
        let sql = format!(
            "INSERT INTO escrow_transactions \
             (buyer_id, seller_id, product_id, amount, currency, status, x402_payment_id, \
              idempotency_key, release_conditions, created_at, expires_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, 'escrowed', $6, $7, $8, $9, $10, $9) \
             ON CONFLICT (x402_payment_id) DO NOTHING \
             RETURNING {}",
            ESCROW_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(&new.buyer_id)
            .bind(&new.seller_id)
            .bind(&new.product_id)
            .bind(new.amount)
            .bind(&new.currency)
            .bind(&new.x402_payment_id)
            .bind(&new.idempotency_key)
            .bind(Json(new.release_conditions.clone()))
            .bind(new.created_at)
            .bind(new.expires_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        map_optional_escrow(row)
    }

    async fn find_escrow(&self, id: Uuid) -> StoreResult<Option<EscrowTransaction>> {
        let sql = format!("SELECT {} FROM escrow_transactions WHERE id = $1", ESCROW_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        map_optional_escrow(row)
    }

    async fn find_escrow_by_payment_id(&self, payment_id: &str) -> StoreResult<Option<EscrowTransaction>> {
        let sql = format!(
            "SELECT {} FROM escrow_transactions WHERE x402_payment_id = $1",
            ESCROW_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        map_optional_escrow(row)
    }

    async fn update_escrow_status(
        &self,
        id: Uuid,
        expected: EscrowStatus,
        next: EscrowStatus,
    ) -> StoreResult<Option<EscrowTransaction>> {
        let sql = format!(
            "UPDATE escrow_transactions SET status = $3, updated_at = now() \
             WHERE id = $1 AND status = $2 RETURNING {}",
            ESCROW_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)?;
        map_optional_escrow(row)
    }

    async fn append_event(&self, event: NewPaymentEvent) -> StoreResult<PaymentEvent> {
        debug!("Appending {} event", event.event_type);
        let row = sqlx::query(
            "INSERT INTO payment_events (transaction_id, payment_id, event_type, event_data) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, transaction_id, payment_id, event_type, event_data, created_at",
        )
        .bind(event.transaction_id)
        .bind(&event.payment_id)
        .bind(&event.event_type)
        .bind(&event.event_data)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        event_from_row(&row).map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn list_events(&self, transaction_id: Uuid) -> StoreResult<Vec<PaymentEvent>> {
        let rows = sqlx::query(
            "SELECT id, transaction_id, payment_id, event_type, event_data, created_at \
             FROM payment_events WHERE transaction_id = $1 ORDER BY created_at ASC, id ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;
        rows.iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn get_profile(&self, user_id: &str) -> StoreResult<Option<TrustProfile>> {
        let row = sqlx::query(
            "SELECT user_id, trust_score, trust_points, updated_at FROM profiles WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;
        row.as_ref()
            .map(profile_from_row)
            .transpose()
            .map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn adjust_trust(
        &self,
        user_id: &str,
        score_delta: i32,
        score_cap: i32,
        points_delta: i64,
    ) -> StoreResult<TrustProfile> {
        let row = sqlx::query(
            "INSERT INTO profiles (user_id, trust_score, trust_points, updated_at) \
             VALUES ($1, GREATEST($6, LEAST($3, $5 + $2)), $4, now()) \
             ON CONFLICT (user_id) DO UPDATE SET \
               trust_score = GREATEST($6, LEAST($3, profiles.trust_score + $2)), \
               trust_points = profiles.trust_points + $4, \
               updated_at = now() \
             RETURNING user_id, trust_score, trust_points, updated_at",
        )
        .bind(user_id)
        .bind(score_delta)
        .bind(score_cap)
        .bind(points_delta)
        .bind(INITIAL_TRUST_SCORE)
        .bind(MIN_TRUST_SCORE)
        .fetch_one(&self.pool)
        .await
        .map_err(classify)?;
        profile_from_row(&row).map_err(|e| StoreError::backend(e.to_string()))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(classify)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_code() {
        assert_eq!(
            classify_code(Some("42883"), "function create_escrow_with_lock does not exist"),
            Some(StoreError::ProcedureUnavailable(
                "function create_escrow_with_lock does not exist".to_string()
            ))
        );
        assert!(matches!(
            classify_code(Some("23505"), "dup"),
            Some(StoreError::Duplicate(_))
        ));
        // A missing table is a schema problem, not a reason to fall back
        assert_eq!(classify_code(Some("42P01"), "relation does not exist"), None);
        assert_eq!(classify_code(Some("23514"), "check violation"), None);
        assert_eq!(classify_code(None, "io"), None);
    }
}
