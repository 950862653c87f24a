use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::TransactionId;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Result, SagaQuery, SagaRecord, StoreError,
    store::{SagaStore, SagaStream},
};

/// In-memory saga store for tests and single-process deployments.
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// duplicate rejection and optimistic versioning.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    records: Arc<RwLock<HashMap<(Uuid, TransactionId), SagaRecord>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn insert(&self, record: SagaRecord) -> Result<()> {
        let key = (record.tenant_id(), record.transaction_id);
        let mut records = self.records.write().await;
        if records.contains_key(&key) {
            return Err(StoreError::DuplicateTransaction {
                tenant_id: key.0,
                transaction_id: key.1,
            });
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<Option<SagaRecord>> {
        Ok(self
            .records
            .read()
            .await
            .get(&(tenant_id, transaction_id))
            .cloned())
    }

    async fn update(&self, mut record: SagaRecord) -> Result<SagaRecord> {
        let key = (record.tenant_id(), record.transaction_id);
        let mut records = self.records.write().await;
        let stored = records.get_mut(&key).ok_or(StoreError::NotFound {
            tenant_id: key.0,
            transaction_id: key.1,
        })?;

        if stored.version != record.version {
            return Err(StoreError::VersionConflict {
                transaction_id: key.1,
                expected: record.version,
                actual: stored.version,
            });
        }

        record.version += 1;
        record.updated_at = Utc::now();
        *stored = record.clone();
        Ok(record)
    }

    async fn query(&self, query: SagaQuery) -> Result<Vec<SagaRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<_> = records
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        if query.timed_out_at.is_some() {
            matching.sort_by_key(|r| r.timeout_at);
        } else {
            matching.sort_by_key(|r| r.created_at);
        }
        if let Some(limit) = query.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn stream_unfinished(&self) -> Result<SagaStream> {
        use futures_util::stream;

        let records = self.query(SagaQuery::unfinished()).await?;
        Ok(Box::pin(stream::iter(records.into_iter().map(Ok))))
    }
}
