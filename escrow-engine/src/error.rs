//! Error types for the escrow system
//!
//! Every service operation returns [`EscrowError`]. The store port has its own
//! [`StoreError`] so that services can tell an expected duplicate-key race or a
//! missing lock procedure apart from a real persistence failure.

use thiserror::Error;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Missing or malformed input
    #[error("{0}")]
    Validation(String),

    /// Row does not exist or is not visible to the caller
    #[error("{0}")]
    NotFound(String),

    /// Status transition not allowed from the current status
    #[error("Transaction is not in escrowed status (current status: {current})")]
    InvalidState { current: String },

    /// Underlying persistence failure
    #[error("Store error: {0}")]
    Store(String),

    /// Forwarded call failed
    #[error("Upstream error: {message}")]
    Upstream { status: Option<u16>, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EscrowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid-state error naming the current status
    pub fn invalid_state<S: Into<String>>(current: S) -> Self {
        Self::InvalidState {
            current: current.into(),
        }
    }

    /// Create a store error
    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    /// Create an upstream error
    pub fn upstream<S: Into<String>>(status: Option<u16>, msg: S) -> Self {
        Self::Upstream {
            status,
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// HTTP status this error maps to at the API edge
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidState { .. } => 400,
            Self::NotFound(_) => 404,
            Self::Upstream { status, .. } => status.unwrap_or(500),
            Self::Store(_) | Self::Config(_) | Self::Serialization(_) => 500,
        }
    }
}

/// Errors reported by an [`EscrowStore`](crate::store::EscrowStore) backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Uniqueness constraint rejected the write
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// The store has no exclusive-lock procedure installed
    #[error("procedure unavailable: {0}")]
    ProcedureUnavailable(String),

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

impl StoreError {
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        Self::Backend(msg.into())
    }
}

impl From<StoreError> for EscrowError {
    fn from(err: StoreError) -> Self {
        EscrowError::Store(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(EscrowError::validation("x").http_status(), 400);
        assert_eq!(EscrowError::invalid_state("released").http_status(), 400);
        assert_eq!(EscrowError::not_found("x").http_status(), 404);
        assert_eq!(EscrowError::store("x").http_status(), 500);
        assert_eq!(EscrowError::upstream(Some(400), "x").http_status(), 400);
        assert_eq!(EscrowError::upstream(None, "x").http_status(), 500);
    }

    #[test]
    fn test_invalid_state_names_current_status() {
        let err = EscrowError::invalid_state("released");
        assert!(err.to_string().contains("released"));
    }
}
