//! Saga state store.
//!
//! The store is the source of truth for orchestration state; anything the
//! orchestrator keeps in memory can be rebuilt from it. Records are keyed by
//! `(tenant_id, transaction_id)` and carry their steps as opaque JSON so the
//! store stays independent of the action catalogue.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod record;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use query::SagaQuery;
pub use record::{RecordStatus, SagaRecord};
pub use store::{SagaStore, SagaStoreExt, SagaStream};
