//! Shared building blocks for the orchestration services.
//!
//! Every core operation runs under an [`OperationContext`] carrying exactly
//! one [`Tenant`]. Data that outlives a single operation is keyed by tenant,
//! either in persisted records or in a sharded [`Registry`].

pub mod context;
pub mod field;
pub mod registry;
pub mod tenant;
pub mod types;

pub use context::{Cancellation, CancellationSource, OperationContext};
pub use field::{ChannelId, Field, MapId, WorldId};
pub use registry::Registry;
pub use tenant::{Tenant, TenantError};
pub use types::{AccountId, CharacterId, NpcId, SpanId, TransactionId};
