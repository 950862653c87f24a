use std::pin::Pin;

use async_trait::async_trait;
use common::TransactionId;
use futures_core::Stream;
use uuid::Uuid;

use crate::{Result, SagaQuery, SagaRecord, StoreError};

/// A stream of saga records.
pub type SagaStream = Pin<Box<dyn Stream<Item = Result<SagaRecord>> + Send>>;

/// Persistence for saga records.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Persists a new record.
    ///
    /// Fails with `DuplicateTransaction` when the tenant already has a saga
    /// with the same transaction id.
    async fn insert(&self, record: SagaRecord) -> Result<()>;

    async fn get(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<Option<SagaRecord>>;

    /// Replaces a record if its stored version still equals
    /// `record.version`. Returns the record as stored, with the version
    /// incremented.
    async fn update(&self, record: SagaRecord) -> Result<SagaRecord>;

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>>;

    /// Streams every unfinished record across tenants, oldest first.
    async fn stream_unfinished(&self) -> Result<SagaStream>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    async fn exists(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<bool> {
        Ok(self.get(tenant_id, transaction_id).await?.is_some())
    }

    /// Like [`SagaStore::get`] but absent records are an error.
    async fn require(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<SagaRecord> {
        self.get(tenant_id, transaction_id)
            .await?
            .ok_or(StoreError::NotFound {
                tenant_id,
                transaction_id,
            })
    }
}

// Blanket implementation for all SagaStore implementations
impl<T: SagaStore + ?Sized> SagaStoreExt for T {}

#[async_trait]
impl<S: SagaStore + ?Sized> SagaStore for std::sync::Arc<S> {
    async fn insert(&self, record: SagaRecord) -> Result<()> {
        (**self).insert(record).await
    }

    async fn get(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<Option<SagaRecord>> {
        (**self).get(tenant_id, transaction_id).await
    }

    async fn update(&self, record: SagaRecord) -> Result<SagaRecord> {
        (**self).update(record).await
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        (**self).query(query).await
    }

    async fn stream_unfinished(&self) -> Result<SagaStream> {
        (**self).stream_unfinished().await
    }
}
