use std::sync::Arc;

use common::OperationContext;
use serde::Serialize;

use crate::{Broker, BusError, Headers, Record, Result, codec};

/// Publishes typed bodies with the ambient tenant, span and transaction
/// headers of the calling operation.
#[derive(Clone)]
pub struct Producer {
    broker: Arc<dyn Broker>,
}

impl Producer {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    #[tracing::instrument(skip(self, ctx, body), fields(tenant_id = %ctx.tenant().id()))]
    pub async fn publish<T: Serialize>(
        &self,
        ctx: &OperationContext,
        topic: &str,
        key: &str,
        body: &T,
    ) -> Result<()> {
        let mut buffer = self.buffer(ctx);
        buffer.put(topic, key, body)?;
        self.flush(buffer).await
    }

    /// Starts a transactional buffer bound to `ctx`. Nothing becomes
    /// visible until [`Producer::flush`]; dropping the buffer discards it.
    pub fn buffer(&self, ctx: &OperationContext) -> Buffer {
        Buffer {
            ctx: ctx.clone(),
            records: Vec::new(),
        }
    }

    /// Publishes every buffered record as one batch.
    pub async fn flush(&self, buffer: Buffer) -> Result<()> {
        if buffer.records.is_empty() {
            return Ok(());
        }
        if buffer.ctx.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        let count = buffer.records.len();
        let produce = self.broker.produce(buffer.records);
        tokio::select! {
            result = produce => result?,
            _ = buffer.ctx.cancellation().cancelled() => return Err(BusError::Cancelled),
        }
        metrics::counter!("bus_records_published_total").increment(count as u64);
        Ok(())
    }

    /// Runs `populate` against a fresh buffer and flushes it only when
    /// `populate` succeeds.
    pub async fn emit<E, F>(&self, ctx: &OperationContext, populate: F) -> std::result::Result<(), E>
    where
        F: FnOnce(&mut Buffer) -> std::result::Result<(), E>,
        E: From<BusError>,
    {
        let mut buffer = self.buffer(ctx);
        populate(&mut buffer)?;
        self.flush(buffer).await?;
        Ok(())
    }
}

/// Records accumulated for one publish batch.
#[derive(Debug)]
pub struct Buffer {
    ctx: OperationContext,
    records: Vec<Record>,
}

impl Buffer {
    pub fn put<T: Serialize>(&mut self, topic: &str, key: &str, body: &T) -> Result<()> {
        self.records.push(Record {
            topic: topic.to_string(),
            key: key.to_string(),
            headers: Headers::from_context(&self.ctx),
            payload: codec::encode(body)?,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use common::{CancellationSource, Tenant, TransactionId};
    use uuid::Uuid;

    use super::*;
    use crate::{InMemoryBroker, headers};

    fn ctx() -> OperationContext {
        OperationContext::new(Tenant::new(Uuid::new_v4(), "GMS", 83, 1))
    }

    fn setup() -> (Arc<InMemoryBroker>, Producer) {
        let broker = Arc::new(InMemoryBroker::new());
        (broker.clone(), Producer::new(broker))
    }

    #[tokio::test]
    async fn publish_attaches_context_headers() {
        let (broker, producer) = setup();
        let tx = TransactionId::new();
        let ctx = ctx().with_transaction(tx);

        producer
            .publish(&ctx, "t", "7", &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        let records = broker.records("t").await;
        assert_eq!(records.len(), 1);
        let h = &records[0].headers;
        assert_eq!(h.get(headers::TENANT_ID), Some(ctx.tenant().id().to_string().as_str()));
        assert_eq!(h.get(headers::TRANSACTION_ID), Some(tx.to_string().as_str()));
        assert_eq!(h.get(headers::SPAN_ID), Some(ctx.span_id().as_str()));
    }

    #[tokio::test]
    async fn failed_population_flushes_nothing() {
        let (broker, producer) = setup();
        let ctx = ctx();

        let result: std::result::Result<(), BusError> = producer
            .emit(&ctx, |buffer| {
                buffer.put("t", "1", &1)?;
                buffer.put("t", "2", &2)?;
                Err(BusError::Closed)
            })
            .await;

        assert!(result.is_err());
        assert!(broker.records("t").await.is_empty());
    }

    #[tokio::test]
    async fn successful_population_flushes_all() {
        let (broker, producer) = setup();
        let ctx = ctx();

        producer
            .emit::<BusError, _>(&ctx, |buffer| {
                buffer.put("a", "1", &1)?;
                buffer.put("b", "1", &2)?;
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(broker.records("a").await.len(), 1);
        assert_eq!(broker.records("b").await.len(), 1);
    }

    #[tokio::test]
    async fn dropped_buffer_is_discarded() {
        let (broker, producer) = setup();
        let mut buffer = producer.buffer(&ctx());
        buffer.put("t", "1", &1).unwrap();
        drop(buffer);
        assert!(broker.records("t").await.is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_does_not_publish() {
        let (broker, producer) = setup();
        let source = CancellationSource::new();
        let ctx = ctx().with_cancellation(source.token());
        source.cancel();

        let result = producer.publish(&ctx, "t", "1", &1).await;
        assert!(matches!(result, Err(BusError::Cancelled)));
        assert!(broker.records("t").await.is_empty());
    }
}
