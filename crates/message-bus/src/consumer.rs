use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use common::{CancellationSource, OperationContext};
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;

use crate::{Broker, BusError, Delivery, StartOffset, codec};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Where a consumed record came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub topic: String,
    pub key: String,
    pub partition: usize,
    pub offset: u64,
}

/// Handles one decoded record. The context carries the tenant, span and
/// transaction of the producer.
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(
        &self,
        ctx: OperationContext,
        meta: &RecordMeta,
        message: T,
    ) -> Result<(), BoxError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub topic: String,
    pub group: String,
    pub start: StartOffset,
    /// Attempts per record before a failing record is committed anyway.
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl ConsumerConfig {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            start: StartOffset::Earliest,
            max_attempts: 3,
            retry_backoff: Duration::from_millis(100),
        }
    }

    pub fn start(mut self, start: StartOffset) -> Self {
        self.start = start;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }
}

/// Owns one consumer task per subscription and stops them together.
pub struct ConsumerManager {
    broker: Arc<dyn Broker>,
    shutdown: CancellationSource,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsumerManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            shutdown: CancellationSource::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes `handler` and spawns its consumer task. The group's start
    /// offset is fixed before this returns.
    pub async fn add_consumer<T, H>(&self, config: ConsumerConfig, handler: Arc<H>) -> crate::Result<()>
    where
        T: DeserializeOwned + Clone + Send + 'static,
        H: Handler<T> + 'static,
    {
        self.broker
            .subscribe(&config.topic, &config.group, config.start)
            .await?;

        tracing::info!(topic = %config.topic, group = %config.group, start = ?config.start, "consumer started");

        let worker = Worker::<T, H> {
            broker: self.broker.clone(),
            handler,
            config,
            _message: PhantomData,
        };
        let cancel = self.shutdown.token();
        let task = tokio::spawn(async move { worker.run(cancel).await });
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
        Ok(())
    }

    /// Signals every consumer to stop and waits for in-flight records.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "consumer task aborted");
            }
        }
    }
}

struct Worker<T, H> {
    broker: Arc<dyn Broker>,
    handler: Arc<H>,
    config: ConsumerConfig,
    _message: PhantomData<fn() -> T>,
}

impl<T, H> Worker<T, H>
where
    T: DeserializeOwned + Clone + Send + 'static,
    H: Handler<T> + 'static,
{
    async fn run(self, cancel: common::Cancellation) {
        loop {
            let fetched = tokio::select! {
                _ = cancel.cancelled() => break,
                fetched = self.broker.fetch(&self.config.topic, &self.config.group) => fetched,
            };

            let delivery = match fetched {
                Ok(delivery) => delivery,
                Err(BusError::Closed) => break,
                Err(e) => {
                    tracing::error!(topic = %self.config.topic, error = %e, "fetch failed");
                    tokio::time::sleep(self.config.retry_backoff).await;
                    continue;
                }
            };

            self.process(&delivery, &cancel).await;

            if let Err(e) = self.broker.commit(&self.config.group, &delivery).await {
                tracing::error!(topic = %self.config.topic, offset = delivery.offset, error = %e, "commit failed");
            }
        }
        tracing::info!(topic = %self.config.topic, group = %self.config.group, "consumer stopped");
    }

    async fn process(&self, delivery: &Delivery, cancel: &common::Cancellation) {
        let meta = RecordMeta {
            topic: delivery.record.topic.clone(),
            key: delivery.record.key.clone(),
            partition: delivery.partition,
            offset: delivery.offset,
        };

        let decoded = delivery
            .record
            .headers
            .to_context()
            .and_then(|ctx| codec::decode::<T>(&delivery.record.payload).map(|m| (ctx, m)));

        let (ctx, message) = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                metrics::counter!("bus_poison_records_total", "topic" => meta.topic.clone())
                    .increment(1);
                tracing::error!(
                    topic = %meta.topic,
                    partition = meta.partition,
                    offset = meta.offset,
                    error = %e,
                    "dropping undecodable record"
                );
                return;
            }
        };
        metrics::counter!("bus_records_consumed_total", "topic" => meta.topic.clone()).increment(1);

        let mut attempt = 1;
        loop {
            let outcome = AssertUnwindSafe(self.handler.handle(ctx.clone(), &meta, message.clone()))
                .catch_unwind()
                .await;
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handler panicked".to_string(),
            };

            if attempt >= self.config.max_attempts || cancel.is_cancelled() {
                tracing::error!(
                    topic = %meta.topic,
                    offset = meta.offset,
                    tenant_id = %ctx.tenant().id(),
                    transaction_id = ?ctx.transaction_id(),
                    attempts = attempt,
                    error = %error,
                    "handler failed, committing record"
                );
                return;
            }
            tracing::warn!(
                topic = %meta.topic,
                offset = meta.offset,
                attempt,
                error = %error,
                "handler failed, retrying"
            );
            tokio::time::sleep(self.config.retry_backoff * attempt).await;
            attempt += 1;
        }
    }
}
