//! Escrow Node - wires every component around one shared store
//!
//! The HTTP layer holds a single [`EscrowNode`] and reaches the services
//! through its accessors.

use crate::{
    catalog::ProductCatalog,
    escrow_service::{EscrowService, EscrowServiceConfig},
    logistics::{LogisticsMatcher, TravelerRoute},
    payment_gateway::{HttpIntake, IntakeForwarder, LocalIntake, PaymentGateway, PaymentGatewayConfig},
    payment_intake::PaymentIntakeService,
    reputation_indexer::{ReputationIndexer, ReputationIndexerConfig},
    rpc::{AgentIdentity, RpcDispatcher},
    store::{InMemoryEscrowStore, SharedStore},
    EscrowResult,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

/// Which escrow store backend to run against
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    10
}

/// Configuration for the escrow node
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EscrowNodeConfig {
    pub store: StoreConfig,
    pub escrow: EscrowServiceConfig,
    pub reputation: ReputationIndexerConfig,
    pub gateway: PaymentGatewayConfig,
    pub agent: AgentIdentity,
    /// Traveler routes registered at startup
    pub routes: Vec<TravelerRoute>,
}

/// Main escrow node that owns all components
pub struct EscrowNode {
    store: SharedStore,
    escrow_service: Arc<EscrowService>,
    payment_intake: Arc<PaymentIntakeService>,
    payment_gateway: Arc<PaymentGateway>,
    rpc: Arc<RpcDispatcher>,
}

impl EscrowNode {
    /// Connect the configured store and build the node
    pub async fn new(config: EscrowNodeConfig) -> EscrowResult<Self> {
        let store = connect_store(&config.store).await?;
        Self::with_store(config, store).await
    }

    /// Build the node over an existing store
    pub async fn with_store(config: EscrowNodeConfig, store: SharedStore) -> EscrowResult<Self> {
        info!("Initializing escrow node");

        let reputation_indexer = Arc::new(ReputationIndexer::new(config.reputation, store.clone()));
        let escrow_service = Arc::new(EscrowService::new(
            config.escrow.clone(),
            store.clone(),
            reputation_indexer,
        ));
        let payment_intake = Arc::new(PaymentIntakeService::new(
            store.clone(),
            config.escrow.default_currency.clone(),
        ));

        let forwarder: Arc<dyn IntakeForwarder> = match &config.gateway.intake_url {
            Some(url) => {
                info!("Payment gateway forwards to {}", url);
                Arc::new(HttpIntake::new(
                    url.clone(),
                    Duration::from_secs(config.gateway.forward_timeout_secs),
                )?)
            }
            None => Arc::new(LocalIntake::new(payment_intake.clone())),
        };
        let payment_gateway = Arc::new(PaymentGateway::new(config.gateway, forwarder));

        let catalog = Arc::new(ProductCatalog::seeded());
        let logistics = Arc::new(LogisticsMatcher::default());
        for route in config.routes {
            let traveler = route.traveler_id.clone();
            if let Err(e) = logistics.register(route).await {
                warn!("Skipping route for traveler {}: {}", traveler, e);
            }
        }

        let rpc = Arc::new(RpcDispatcher::new(
            config.agent,
            escrow_service.clone(),
            catalog,
            logistics,
        ));

        info!("Escrow node initialized");

        Ok(Self {
            store,
            escrow_service,
            payment_intake,
            payment_gateway,
            rpc,
        })
    }

    pub fn escrow_service(&self) -> &Arc<EscrowService> {
        &self.escrow_service
    }

    pub fn payment_intake(&self) -> &Arc<PaymentIntakeService> {
        &self.payment_intake
    }

    pub fn payment_gateway(&self) -> &Arc<PaymentGateway> {
        &self.payment_gateway
    }

    pub fn rpc(&self) -> &Arc<RpcDispatcher> {
        &self.rpc
    }

    /// Check the health of all components
    pub async fn health_check(&self) -> NodeHealth {
        let mut issues = Vec::new();

        if let Err(e) = self.store.ping().await {
            issues.push(format!("Escrow store error: {}", e));
        }

        NodeHealth {
            healthy: issues.is_empty(),
            agent: self.rpc.agent().clone(),
            issues,
            timestamp: Utc::now(),
        }
    }
}

async fn connect_store(config: &StoreConfig) -> EscrowResult<SharedStore> {
    match config {
        StoreConfig::Memory => {
            info!("Using in-memory escrow store");
            Ok(Arc::new(InMemoryEscrowStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreConfig::Postgres { url, max_connections } => {
            let store = crate::store::PgEscrowStore::connect(url, *max_connections).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreConfig::Postgres { .. } => Err(crate::error::EscrowError::config(
            "postgres store requested but escrow-engine was built without the `postgres` feature",
        )),
    }
}

/// Node health status
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub agent: AgentIdentity,
    pub issues: Vec<String>,
    pub timestamp: DateTime<Utc>,
}
