//! Escrow lifecycle endpoints

use super::{header_value, IDEMPOTENCY_KEY_HEADER, USER_ID_HEADER};
use crate::{
    error::{ApiError, ApiResult},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::HeaderMap,
    Json,
};
use escrow_engine::{
    error::EscrowError,
    escrow_service::{id_from_value, InitiateEscrowRequest, ReleaseEscrowRequest, NOT_FOUND_MESSAGE},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct InitiateEscrowBody {
    #[serde(default, rename = "productId", alias = "product_id")]
    pub product_id: Option<Value>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default, rename = "x402PaymentId", alias = "payment_id")]
    pub payment_id: Option<String>,
    #[serde(default, alias = "buyerId")]
    pub buyer_id: Option<String>,
    #[serde(default, alias = "sellerId")]
    pub seller_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReleaseEscrowBody {
    #[serde(default, rename = "transactionId", alias = "transaction_id")]
    pub transaction_id: Option<String>,
    #[serde(default, rename = "confirmationCode", alias = "confirmation_code")]
    pub confirmation_code: Option<String>,
    #[serde(default, rename = "deliveryProof", alias = "delivery_proof")]
    pub delivery_proof: Option<Value>,
}

/// Ids that are not UUIDs cannot exist, and read the same as unknown ones
fn parse_transaction_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| EscrowError::not_found(NOT_FOUND_MESSAGE).into())
}

/// The buyer is the `x-user-id` caller, falling back to `buyer_id` in the body.
/// A body with neither is rejected, so a bare `{productId, amount, x402PaymentId}`
/// request needs the header.
pub async fn initiate_escrow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<InitiateEscrowBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let transaction = state
        .node
        .escrow_service()
        .initiate(InitiateEscrowRequest {
            product_id: id_from_value(body.product_id.as_ref()),
            amount: body.amount,
            currency: body.currency,
            buyer_id: header_value(&headers, USER_ID_HEADER).or(body.buyer_id),
            seller_id: body.seller_id,
            external_payment_id: body.payment_id,
            idempotency_key: header_value(&headers, IDEMPOTENCY_KEY_HEADER),
        })
        .await?;

    Ok(Json(json!({ "success": true, "transaction": transaction })))
}

pub async fn escrow_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let transaction_id = parse_transaction_id(&id)?;
    let caller = header_value(&headers, USER_ID_HEADER).unwrap_or_default();

    let view = state
        .node
        .escrow_service()
        .get_status(transaction_id, &caller)
        .await?;

    Ok(Json(json!({
        "success": true,
        "escrow": view.transaction,
        "events": view.events,
    })))
}

pub async fn release_escrow(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ReleaseEscrowBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let raw_id = body
        .transaction_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("transactionId is required"))?;
    let transaction_id = parse_transaction_id(&raw_id)?;

    let receipt = state
        .node
        .escrow_service()
        .release(ReleaseEscrowRequest {
            transaction_id,
            caller_id: header_value(&headers, USER_ID_HEADER).unwrap_or_default(),
            confirmation_code: body.confirmation_code,
            delivery_proof: body.delivery_proof,
        })
        .await?;

    info!("Escrow {} released over HTTP", receipt.transaction_id);

    Ok(Json(json!({
        "success": true,
        "message": "Escrow released successfully",
        "transaction_id": receipt.transaction_id,
    })))
}
