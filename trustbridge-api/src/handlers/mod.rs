pub mod escrow;
pub mod payments;
pub mod rpc;

use axum::http::HeaderMap;

/// Header carrying the authenticated caller
pub const USER_ID_HEADER: &str = "x-user-id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
