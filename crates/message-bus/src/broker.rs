use async_trait::async_trait;

use crate::{Headers, Result};

/// One entry of a topic partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub topic: String,
    /// Partition key; usually the character or account id.
    pub key: String,
    pub headers: Headers,
    /// Length-prefixed body produced by [`codec::encode`](crate::codec::encode).
    pub payload: Vec<u8>,
}

/// A record handed to a consumer group, with its log position.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub record: Record,
    pub partition: usize,
    pub offset: u64,
}

/// Where a consumer group starts reading when it has no committed offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartOffset {
    /// Replay the retained log; used by durable workflows.
    #[default]
    Earliest,
    /// Only records produced after subscription; used for transient
    /// status broadcasts.
    Latest,
}

/// A partitioned log with consumer-group offsets.
///
/// Delivery is at-least-once: a fetched record is handed out again until
/// its offset is committed.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Appends records. Records sharing a topic and key keep their relative
    /// order.
    async fn produce(&self, records: Vec<Record>) -> Result<()>;

    /// Registers `group` on `topic`, fixing its initial offsets when the
    /// group has none yet.
    async fn subscribe(&self, topic: &str, group: &str, start: StartOffset) -> Result<()>;

    /// Waits for the next uncommitted record for `group`.
    async fn fetch(&self, topic: &str, group: &str) -> Result<Delivery>;

    /// Marks `delivery` and everything before it on its partition as
    /// consumed by `group`.
    async fn commit(&self, group: &str, delivery: &Delivery) -> Result<()>;
}

#[async_trait]
impl<B: Broker + ?Sized> Broker for std::sync::Arc<B> {
    async fn produce(&self, records: Vec<Record>) -> Result<()> {
        (**self).produce(records).await
    }

    async fn subscribe(&self, topic: &str, group: &str, start: StartOffset) -> Result<()> {
        (**self).subscribe(topic, group, start).await
    }

    async fn fetch(&self, topic: &str, group: &str) -> Result<Delivery> {
        (**self).fetch(topic, group).await
    }

    async fn commit(&self, group: &str, delivery: &Delivery) -> Result<()> {
        (**self).commit(group, delivery).await
    }
}
