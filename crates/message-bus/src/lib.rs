//! Cross-service message substrate.
//!
//! Commands and status events travel as [`Record`]s on named topics of a
//! partitioned log. Every record carries the tenant and span of the
//! operation that produced it (see [`headers`]); consumers rebuild an
//! [`OperationContext`](common::OperationContext) from those headers before
//! invoking their handler. Records sharing a key land on the same partition
//! and are observed in publish order.

pub mod broker;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod headers;
pub mod memory;
pub mod message;
pub mod producer;
pub mod topic;

pub use broker::{Broker, Delivery, Record, StartOffset};
pub use consumer::{BoxError, ConsumerConfig, ConsumerManager, Handler, RecordMeta};
pub use error::{BusError, Result};
pub use headers::Headers;
pub use memory::InMemoryBroker;
pub use message::Message;
pub use producer::{Buffer, Producer};
pub use topic::Topic;
