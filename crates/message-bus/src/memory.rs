use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::{
    BusError, Result,
    broker::{Broker, Delivery, Record, StartOffset},
};

const DEFAULT_PARTITIONS: usize = 8;

/// In-process partitioned log.
///
/// Topics are created on first use with a fixed partition count. Each
/// consumer group tracks one committed offset per partition and reads the
/// partitions round-robin.
pub struct InMemoryBroker {
    partitions: usize,
    state: Mutex<BrokerState>,
    notify: Notify,
}

#[derive(Default)]
struct BrokerState {
    closed: bool,
    logs: HashMap<String, Vec<Vec<Record>>>,
    groups: HashMap<(String, String), GroupState>,
}

struct GroupState {
    committed: Vec<u64>,
    cursor: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITIONS)
    }

    pub fn with_partitions(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
        }
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as usize
    }

    /// Every record on `topic`, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<Record> {
        let state = self.state.lock().await;
        state
            .logs
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Records on `topic` that share `key`, in publish order.
    pub async fn records_for_key(&self, topic: &str, key: &str) -> Vec<Record> {
        let partition = self.partition_for(key);
        let state = self.state.lock().await;
        state
            .logs
            .get(topic)
            .map(|partitions| {
                partitions[partition]
                    .iter()
                    .filter(|r| r.key == key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of records `group` has committed on `topic`.
    pub async fn committed(&self, topic: &str, group: &str) -> u64 {
        let state = self.state.lock().await;
        state
            .groups
            .get(&(topic.to_string(), group.to_string()))
            .map(|g| g.committed.iter().sum())
            .unwrap_or(0)
    }

    /// Wakes every waiting fetch with [`BusError::Closed`].
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerState {
    fn log_mut(&mut self, topic: &str, partitions: usize) -> &mut Vec<Vec<Record>> {
        self.logs
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions])
    }

    fn register(&mut self, topic: &str, group: &str, start: StartOffset, partitions: usize) {
        let ends: Vec<u64> = self
            .log_mut(topic, partitions)
            .iter()
            .map(|p| p.len() as u64)
            .collect();
        self.groups
            .entry((topic.to_string(), group.to_string()))
            .or_insert_with(|| GroupState {
                committed: match start {
                    StartOffset::Earliest => vec![0; partitions],
                    StartOffset::Latest => ends,
                },
                cursor: 0,
            });
    }

    fn next(&mut self, topic: &str, group: &str) -> Option<Delivery> {
        let log = self.logs.get(topic)?;
        let state = self.groups.get_mut(&(topic.to_string(), group.to_string()))?;
        let count = log.len();
        for i in 0..count {
            let partition = (state.cursor + i) % count;
            let offset = state.committed[partition];
            if let Some(record) = log[partition].get(offset as usize) {
                state.cursor = (partition + 1) % count;
                return Some(Delivery {
                    record: record.clone(),
                    partition,
                    offset,
                });
            }
        }
        None
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn produce(&self, records: Vec<Record>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return Err(BusError::Closed);
            }
            for record in records {
                let partition = self.partition_for(&record.key);
                let log = state.log_mut(&record.topic, self.partitions);
                log[partition].push(record);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str, start: StartOffset) -> Result<()> {
        let mut state = self.state.lock().await;
        state.register(topic, group, start, self.partitions);
        Ok(())
    }

    async fn fetch(&self, topic: &str, group: &str) -> Result<Delivery> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(BusError::Closed);
                }
                state.register(topic, group, StartOffset::Earliest, self.partitions);
                if let Some(delivery) = state.next(topic, group) {
                    return Ok(delivery);
                }
            }

            notified.await;
        }
    }

    async fn commit(&self, group: &str, delivery: &Delivery) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(group) = state
            .groups
            .get_mut(&(delivery.record.topic.clone(), group.to_string()))
        {
            let committed = &mut group.committed[delivery.partition];
            *committed = (*committed).max(delivery.offset + 1);
        }
        Ok(())
    }
}
