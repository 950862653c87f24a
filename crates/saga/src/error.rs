//! Saga error types.

use common::TransactionId;
use message_bus::BusError;
use saga_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The saga definition violates a construction rule.
    #[error("Invalid saga: {0}")]
    Invalid(String),

    /// A saga with this transaction id already exists for the tenant.
    #[error("Saga {0} already exists")]
    Duplicate(TransactionId),

    #[error("Saga {0} not found")]
    NotFound(TransactionId),

    /// The stored saga cannot be interpreted.
    #[error("Corrupt saga {transaction_id}: {reason}")]
    Corrupt {
        transaction_id: TransactionId,
        reason: String,
    },

    /// Concurrent writers kept winning the optimistic version check.
    #[error("Saga {0} is contended; giving up after repeated version conflicts")]
    Contended(TransactionId),

    #[error("Saga store error: {0}")]
    Store(StoreError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StoreError> for SagaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateTransaction { transaction_id, .. } => {
                SagaError::Duplicate(transaction_id)
            }
            StoreError::NotFound { transaction_id, .. } => SagaError::NotFound(transaction_id),
            other => SagaError::Store(other),
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
