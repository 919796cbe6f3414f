//! Payment intake and the x402 gate

use crate::{
    error::{ApiError, ApiResult},
    AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use escrow_engine::{
    payment_gateway::{GateOutcome, GatewayRequest},
    payment_intake::PaymentIntakeRequest,
};

pub async fn accept_payment(
    State(state): State<AppState>,
    body: Result<Json<PaymentIntakeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let accepted = state.node.payment_intake().accept(request).await?;

    Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
}

pub async fn process_x402_payment(
    State(state): State<AppState>,
    body: Result<Json<GatewayRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let response = match state.node.payment_gateway().check_and_gate(request).await? {
        GateOutcome::PaymentRequired(descriptor) => {
            (StatusCode::PAYMENT_REQUIRED, Json(descriptor)).into_response()
        }
        GateOutcome::Forwarded(forwarded) => (StatusCode::ACCEPTED, Json(forwarded)).into_response(),
    };

    Ok(response)
}
