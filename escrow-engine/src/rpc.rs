//! JSON-RPC agent bridge
//!
//! Maps `{jsonrpc, method, params, id}` envelopes onto the business handlers.
//! [`METHODS`] is the only registry: dispatch looks methods up in it and the
//! discovery call lists it, so the two cannot drift apart.

use crate::{
    catalog::{ProductCatalog, ProductQuery},
    error::EscrowError,
    escrow_service::{id_from_value, EscrowService, InitiateEscrowRequest},
    itinerary::parse_itinerary,
    logistics::{LogisticsMatcher, ShipmentRequest},
};
use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

/// JSON-RPC 2.0 Request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
    #[serde(default)]
    pub id: Value,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn failure(id: Value, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn parse_error() -> Self {
        Self {
            code: PARSE_ERROR,
            message: "Parse error".to_string(),
            data: None,
        }
    }

    pub fn invalid_request(reason: &str) -> Self {
        Self {
            code: INVALID_REQUEST,
            message: "Invalid Request".to_string(),
            data: Some(Value::String(reason.to_string())),
        }
    }

    pub fn method_not_found() -> Self {
        Self {
            code: METHOD_NOT_FOUND,
            message: "Method not found".to_string(),
            data: None,
        }
    }

    pub fn invalid_params(reason: String) -> Self {
        Self {
            code: INVALID_PARAMS,
            message: "Invalid params".to_string(),
            data: Some(Value::String(reason)),
        }
    }

    pub fn internal_error(reason: String) -> Self {
        Self {
            code: INTERNAL_ERROR,
            message: "Internal error".to_string(),
            data: Some(Value::String(reason)),
        }
    }
}

/// Identity reported by `ping` and the health endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentIdentity {
    pub id: String,
    pub name: String,
    pub version: String,
}

impl Default for AgentIdentity {
    fn default() -> Self {
        Self {
            id: "trustbridge-agent".to_string(),
            name: "TrustBridge Commerce Agent".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handler {
    Ping,
    Discover,
    SearchProducts,
    GetProduct,
    CreateEscrow,
    GetEscrowStatus,
    MatchTravelers,
    ParseItinerary,
}

/// Registered method
#[derive(Debug, Clone, Copy)]
pub struct MethodSpec {
    pub name: &'static str,
    pub description: &'static str,
    handler: Handler,
}

const fn method(name: &'static str, description: &'static str, handler: Handler) -> MethodSpec {
    MethodSpec {
        name,
        description,
        handler,
    }
}

/// Static method registry
pub const METHODS: &[MethodSpec] = &[
    method("ping", "Liveness check returning the agent identity", Handler::Ping),
    method("rpc.discover", "List registered methods", Handler::Discover),
    method(
        "commerce.search_products",
        "Search listings by text, category and max price",
        Handler::SearchProducts,
    ),
    method("commerce.get_product", "Look up one listing by id", Handler::GetProduct),
    method(
        "trust_escrow.create_escrow",
        "Hold funds in escrow for a product",
        Handler::CreateEscrow,
    ),
    method(
        "trust_escrow.get_status",
        "Escrow transaction with its event history",
        Handler::GetEscrowStatus,
    ),
    method(
        "logistics.match_travelers",
        "Rank travelers able to carry a shipment",
        Handler::MatchTravelers,
    ),
    method(
        "itinerary.parse",
        "Extract flight segments from itinerary text",
        Handler::ParseItinerary,
    ),
];

/// Names of every registered method, in registry order
pub fn method_names() -> Vec<&'static str> {
    METHODS.iter().map(|m| m.name).collect()
}

/// Registry dump served by discovery
pub fn registry_dump() -> Value {
    json!({
        "methods": method_names(),
        "details": METHODS
            .iter()
            .map(|m| json!({ "name": m.name, "description": m.description }))
            .collect::<Vec<_>>(),
        "count": METHODS.len(),
    })
}

fn lookup(name: &str) -> Option<&'static MethodSpec> {
    METHODS.iter().find(|m| m.name == name)
}

enum Failure {
    InvalidParams(String),
    Handler(EscrowError),
}

impl From<EscrowError> for Failure {
    fn from(err: EscrowError) -> Self {
        Failure::Handler(err)
    }
}

type HandlerResult = Result<Value, Failure>;

fn params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, Failure> {
    let params = match params {
        None | Some(Value::Null) => json!({}),
        Some(p) => p,
    };
    serde_json::from_value(params).map_err(|e| Failure::InvalidParams(e.to_string()))
}

#[derive(Debug, Deserialize)]
struct CreateEscrowParams {
    #[serde(default, alias = "product_id")]
    #[serde(rename = "productId")]
    product_id: Option<Value>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default, alias = "buyerId")]
    buyer_id: Option<String>,
    #[serde(default, alias = "sellerId")]
    seller_id: Option<String>,
    #[serde(default, rename = "x402PaymentId", alias = "payment_id")]
    payment_id: Option<String>,
    #[serde(default, rename = "idempotencyKey", alias = "idempotency_key")]
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EscrowStatusParams {
    #[serde(rename = "transactionId", alias = "transaction_id")]
    transaction_id: Uuid,
    #[serde(default, alias = "callerId")]
    caller_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProductParams {
    #[serde(rename = "productId", alias = "product_id", alias = "id")]
    product_id: Value,
}

#[derive(Debug, Deserialize)]
struct ItineraryParams {
    text: String,
}

/// Dispatches envelopes to business handlers
pub struct RpcDispatcher {
    agent: AgentIdentity,
    escrow: Arc<EscrowService>,
    catalog: Arc<ProductCatalog>,
    logistics: Arc<LogisticsMatcher>,
}

impl RpcDispatcher {
    pub fn new(
        agent: AgentIdentity,
        escrow: Arc<EscrowService>,
        catalog: Arc<ProductCatalog>,
        logistics: Arc<LogisticsMatcher>,
    ) -> Self {
        Self {
            agent,
            escrow,
            catalog,
            logistics,
        }
    }

    pub fn agent(&self) -> &AgentIdentity {
        &self.agent
    }

    /// Dispatch a raw JSON body that has not been shape-checked yet
    pub async fn dispatch_value(&self, body: Value) -> JsonRpcResponse {
        let id = body.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(body) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => {
                warn!("Rejected malformed RPC envelope: {}", e);
                JsonRpcResponse::failure(id, JsonRpcError::invalid_request(&e.to_string()))
            }
        }
    }

    pub async fn dispatch(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id;

        if request.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            warn!("RPC envelope with bad protocol tag {:?}", request.jsonrpc);
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_request("jsonrpc must be \"2.0\""));
        }
        let Some(name) = request.method else {
            return JsonRpcResponse::failure(id, JsonRpcError::invalid_request("method is required"));
        };
        let Some(spec) = lookup(&name) else {
            info!("RPC method not found: {}", name);
            return JsonRpcResponse::failure(id, JsonRpcError::method_not_found());
        };

        debug!("RPC {} (id={})", spec.name, id);
        match self.invoke(spec.handler, request.params).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(Failure::InvalidParams(reason)) => {
                info!("RPC {} invalid params: {}", spec.name, reason);
                JsonRpcResponse::failure(id, JsonRpcError::invalid_params(reason))
            }
            Err(Failure::Handler(e)) => {
                warn!("RPC {} failed: {}", spec.name, e);
                JsonRpcResponse::failure(id, JsonRpcError::internal_error(e.to_string()))
            }
        }
    }

    async fn invoke(&self, handler: Handler, raw: Option<Value>) -> HandlerResult {
        match handler {
            Handler::Ping => Ok(json!({
                "status": "ok",
                "agent": self.agent,
                "timestamp": Utc::now(),
            })),
            Handler::Discover => Ok(registry_dump()),
            Handler::SearchProducts => {
                let query: ProductQuery = params(raw)?;
                let products = self.catalog.search(&query);
                Ok(json!({ "products": products, "count": products.len() }))
            }
            Handler::GetProduct => {
                let p: ProductParams = params(raw)?;
                let id = id_from_value(Some(&p.product_id))
                    .ok_or_else(|| Failure::InvalidParams("productId must be a string or number".to_string()))?;
                let product = self.catalog.get(&id)?;
                Ok(json!({ "product": product }))
            }
            Handler::CreateEscrow => {
                let p: CreateEscrowParams = params(raw)?;
                let transaction = self
                    .escrow
                    .initiate(InitiateEscrowRequest {
                        product_id: id_from_value(p.product_id.as_ref()),
                        amount: p.amount,
                        currency: p.currency,
                        buyer_id: Some(p.buyer_id.unwrap_or_else(|| self.agent.id.clone())),
                        seller_id: p.seller_id,
                        external_payment_id: p.payment_id,
                        idempotency_key: p.idempotency_key,
                    })
                    .await?;
                Ok(json!({ "success": true, "transaction": transaction }))
            }
            Handler::GetEscrowStatus => {
                let p: EscrowStatusParams = params(raw)?;
                let caller = p.caller_id.unwrap_or_else(|| self.agent.id.clone());
                let view = self.escrow.get_status(p.transaction_id, &caller).await?;
                Ok(json!({ "success": true, "escrow": view.transaction, "events": view.events }))
            }
            Handler::MatchTravelers => {
                let shipment: ShipmentRequest = params(raw)?;
                let matches = self.logistics.match_travelers(&shipment).await?;
                Ok(json!({ "matches": matches, "count": matches.len() }))
            }
            Handler::ParseItinerary => {
                let p: ItineraryParams = params(raw)?;
                let itinerary = parse_itinerary(&p.text)?;
                serde_json::to_value(itinerary).map_err(|e| Failure::Handler(e.into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        escrow_service::EscrowServiceConfig,
        logistics::TravelerRoute,
        reputation_indexer::{ReputationIndexer, ReputationIndexerConfig},
        store::InMemoryEscrowStore,
    };
    use chrono::NaiveDate;
    use std::collections::HashSet;

    async fn dispatcher() -> RpcDispatcher {
        let store = Arc::new(InMemoryEscrowStore::new());
        let reputation = Arc::new(ReputationIndexer::new(
            ReputationIndexerConfig::default(),
            store.clone(),
        ));
        let escrow = Arc::new(EscrowService::new(
            EscrowServiceConfig::default(),
            store,
            reputation,
        ));
        let logistics = Arc::new(LogisticsMatcher::default());
        logistics
            .register(TravelerRoute {
                traveler_id: "t1".to_string(),
                origin: "LIM".to_string(),
                destination: "JFK".to_string(),
                departure: NaiveDate::from_ymd_opt(2026, 3, 14).unwrap(),
                capacity_kg: 8.0,
            })
            .await
            .unwrap();
        RpcDispatcher::new(
            AgentIdentity::default(),
            escrow,
            Arc::new(ProductCatalog::seeded()),
            logistics,
        )
    }

    async fn call(d: &RpcDispatcher, body: Value) -> Value {
        serde_json::to_value(d.dispatch_value(body).await).unwrap()
    }

    #[test]
    fn test_registry_names_are_unique_and_namespaced() {
        let names = method_names();
        let unique: HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| *n == "ping" || n.contains('.')));
    }

    #[tokio::test]
    async fn test_every_registered_method_dispatches() {
        let d = dispatcher().await;
        for name in method_names() {
            let response = call(&d, json!({ "jsonrpc": "2.0", "method": name, "id": 1 })).await;
            let code = response["error"]["code"].as_i64();
            assert_ne!(code, Some(METHOD_NOT_FOUND as i64), "{} not dispatched", name);
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let d = dispatcher().await;
        let response = call(&d, json!({ "jsonrpc": "2.0", "method": "ping", "id": "p" })).await;

        assert_eq!(response["id"], "p");
        assert_eq!(response["result"]["status"], "ok");
        assert_eq!(response["result"]["agent"]["id"], "trustbridge-agent");
        assert!(response.get("error").is_none());
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let d = dispatcher().await;
        let response = call(&d, json!({ "jsonrpc": "2.0", "method": "bogus.method", "id": 5 })).await;

        assert_eq!(
            response,
            json!({
                "jsonrpc": "2.0",
                "id": 5,
                "error": { "code": -32601, "message": "Method not found" }
            })
        );
    }

    #[tokio::test]
    async fn test_missing_id_echoes_null() {
        let d = dispatcher().await;
        let response = call(&d, json!({ "jsonrpc": "2.0", "method": "ping" })).await;

        assert!(response.get("id").is_some());
        assert_eq!(response["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_bad_protocol_tag() {
        let d = dispatcher().await;
        let response = call(&d, json!({ "jsonrpc": "1.0", "method": "ping", "id": 2 })).await;

        assert_eq!(response["error"]["code"], INVALID_REQUEST);
        assert_eq!(response["id"], 2);
    }

    #[tokio::test]
    async fn test_create_escrow() {
        let d = dispatcher().await;
        let response = call(
            &d,
            json!({
                "jsonrpc": "2.0",
                "method": "trust_escrow.create_escrow",
                "params": { "productId": "1", "amount": 100 },
                "id": "t1"
            }),
        )
        .await;

        assert_eq!(response["id"], "t1");
        assert_eq!(response["result"]["success"], true);
        assert_eq!(response["result"]["transaction"]["status"], "escrowed");
        assert_eq!(response["result"]["transaction"]["amount"].as_f64(), Some(100.0));
        assert_eq!(response["result"]["transaction"]["buyer_id"], "trustbridge-agent");

        let tx_id = response["result"]["transaction"]["id"].clone();
        let status = call(
            &d,
            json!({
                "jsonrpc": "2.0",
                "method": "trust_escrow.get_status",
                "params": { "transactionId": tx_id },
                "id": 7
            }),
        )
        .await;
        assert_eq!(status["result"]["events"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_is_internal_error() {
        let d = dispatcher().await;
        let response = call(
            &d,
            json!({
                "jsonrpc": "2.0",
                "method": "trust_escrow.create_escrow",
                "params": { "productId": "1", "amount": "not a number" },
                "id": 9
            }),
        )
        .await;

        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["data"], "amount must be a number");
        assert!(response.get("result").is_none());
    }

    #[tokio::test]
    async fn test_itinerary_without_segments_is_handler_failure() {
        let d = dispatcher().await;
        let response = call(
            &d,
            json!({ "jsonrpc": "2.0", "method": "itinerary.parse",
                    "params": { "text": "hotel check-in 2026-03-14" }, "id": 11 }),
        )
        .await;

        assert_eq!(response["error"]["code"], INTERNAL_ERROR);
        assert_eq!(response["error"]["data"], "no flight segments found in itinerary");
        assert_eq!(response["id"], 11);
    }

    #[tokio::test]
    async fn test_business_handlers() {
        let d = dispatcher().await;

        let products = call(
            &d,
            json!({ "jsonrpc": "2.0", "method": "commerce.search_products",
                    "params": { "query": "camera" }, "id": 1 }),
        )
        .await;
        assert_eq!(products["result"]["count"], 1);

        let matches = call(
            &d,
            json!({ "jsonrpc": "2.0", "method": "logistics.match_travelers",
                    "params": { "origin": "lim", "destination": "jfk", "weight_kg": 2.5 }, "id": 2 }),
        )
        .await;
        assert_eq!(matches["result"]["matches"][0]["traveler_id"], "t1");

        let itinerary = call(
            &d,
            json!({ "jsonrpc": "2.0", "method": "itinerary.parse",
                    "params": { "text": "LA2464 LIM-JFK 2026-03-14" }, "id": 3 }),
        )
        .await;
        assert_eq!(itinerary["result"]["segments"][0]["destination"], "JFK");

        let bad_params = call(
            &d,
            json!({ "jsonrpc": "2.0", "method": "itinerary.parse", "params": {}, "id": 4 }),
        )
        .await;
        assert_eq!(bad_params["error"]["code"], INVALID_PARAMS);
    }
}
