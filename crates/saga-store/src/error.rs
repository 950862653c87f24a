use common::TransactionId;
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur when interacting with the saga store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A saga with this transaction id already exists for the tenant.
    #[error("saga {transaction_id} already exists for tenant {tenant_id}")]
    DuplicateTransaction {
        tenant_id: Uuid,
        transaction_id: TransactionId,
    },

    #[error("saga {transaction_id} not found for tenant {tenant_id}")]
    NotFound {
        tenant_id: Uuid,
        transaction_id: TransactionId,
    },

    /// The record changed since it was read.
    #[error("version conflict on saga {transaction_id}: expected {expected}, found {actual}")]
    VersionConflict {
        transaction_id: TransactionId,
        expected: i64,
        actual: i64,
    },

    #[error("invalid record status: {0}")]
    InvalidStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether the store itself is unreachable, as opposed to a per-record
    /// rejection.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Migration(_))
    }
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
