//! Escrow lifecycle and agent bridge for the TrustBridge marketplace
//!
//! This crate holds buyer funds between purchase and delivery:
//! - Escrow Service: initiate, inspect and release escrow transactions
//! - Payment intake and the x402 gate in front of it
//! - JSON-RPC bridge exposing commerce, escrow and logistics to agents
//! - Trust rewards recorded alongside every lifecycle step
//!
//! Persistence goes through the [`store::EscrowStore`] port. An in-memory
//! backend ships by default; PostgreSQL is behind the `postgres` feature.

pub mod catalog;
pub mod error;
pub mod escrow_service;
pub mod itinerary;
pub mod logistics;
pub mod models;
pub mod node;
pub mod payment_gateway;
pub mod payment_intake;
pub mod reputation_indexer;
pub mod rpc;
pub mod store;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
