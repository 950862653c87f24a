//! Wire-stable header contract.
//!
//! ```text
//! TENANT_ID      = UUID, 36-char canonical form
//! REGION         = short string (e.g. "GMS")
//! MAJOR_VERSION  = decimal uint16
//! MINOR_VERSION  = decimal uint16
//! SPAN_ID        = opaque tracing id
//! TRANSACTION_ID = UUID (saga-scoped messages only)
//! SAGA_STEP_ID   = `<step>` or `<step>:compensate` (step commands and replies)
//! ```

use std::collections::BTreeMap;

use common::{OperationContext, SpanId, Tenant, TenantError, TransactionId};

use crate::{BusError, Result};

pub const TENANT_ID: &str = "TENANT_ID";
pub const REGION: &str = "REGION";
pub const MAJOR_VERSION: &str = "MAJOR_VERSION";
pub const MINOR_VERSION: &str = "MINOR_VERSION";
pub const SPAN_ID: &str = "SPAN_ID";
pub const TRANSACTION_ID: &str = "TRANSACTION_ID";
/// Step a saga command belongs to; leaf services echo it on their reply.
pub const STEP_ID: &str = "SAGA_STEP_ID";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers for a record produced under `ctx`.
    ///
    /// # Panics
    ///
    /// Panics when `ctx` has no tenant.
    pub fn from_context(ctx: &OperationContext) -> Self {
        let tenant = ctx.tenant();
        let mut headers = Self::new();
        headers.insert(TENANT_ID, tenant.id().to_string());
        headers.insert(REGION, tenant.region());
        headers.insert(MAJOR_VERSION, tenant.major_version().to_string());
        headers.insert(MINOR_VERSION, tenant.minor_version().to_string());
        headers.insert(SPAN_ID, ctx.span_id().as_str());
        if let Some(tx) = ctx.transaction_id() {
            headers.insert(TRANSACTION_ID, tx.to_string());
        }
        if let Some(step_id) = ctx.step_id() {
            headers.insert(STEP_ID, step_id);
        }
        headers
    }

    /// Rebuilds the producer's context. A missing `TENANT_ID` is fatal for
    /// the record; a missing span gets a fresh one.
    pub fn to_context(&self) -> Result<OperationContext> {
        let id = self.get(TENANT_ID).ok_or(BusError::MissingTenant)?;
        let tenant = Tenant::parse(
            id,
            self.get(REGION).unwrap_or_default(),
            self.get(MAJOR_VERSION).unwrap_or_default(),
            self.get(MINOR_VERSION).unwrap_or_default(),
        )
        .map_err(|e| match e {
            TenantError::InvalidId(value) => BusError::InvalidHeader {
                name: TENANT_ID,
                value,
            },
            TenantError::MissingRegion => BusError::InvalidHeader {
                name: REGION,
                value: String::new(),
            },
            TenantError::InvalidVersion { field, value } => BusError::InvalidHeader {
                name: if field == "major" {
                    MAJOR_VERSION
                } else {
                    MINOR_VERSION
                },
                value,
            },
        })?;

        let mut ctx = OperationContext::new(tenant);
        if let Some(span) = self.get(SPAN_ID).filter(|s| !s.is_empty()) {
            ctx = ctx.with_span(SpanId::from_string(span));
        }
        if let Some(tx) = self.transaction_id()? {
            ctx = ctx.with_transaction(tx);
        }
        if let Some(step_id) = self.get(STEP_ID).filter(|s| !s.is_empty()) {
            ctx = ctx.with_step_id(step_id);
        }
        Ok(ctx)
    }

    pub fn transaction_id(&self) -> Result<Option<TransactionId>> {
        match self.get(TRANSACTION_ID) {
            None => Ok(None),
            Some(raw) => TransactionId::parse(raw)
                .map(Some)
                .map_err(|_| BusError::InvalidHeader {
                    name: TRANSACTION_ID,
                    value: raw.to_string(),
                }),
        }
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
