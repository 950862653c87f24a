use chrono::{DateTime, Utc};
use common::{Tenant, TransactionId};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// Lifecycle of a saga record.
///
/// ```text
///   Active ──all steps completed──► Completed
///     │
///     └──step failed──► Compensating ──walk finished──► Failed
///     └──step failed, nothing to undo──────────────────► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    #[default]
    Active,
    Compensating,
    Completed,
    Failed,
}

impl RecordStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordStatus::Completed | RecordStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Active => "active",
            RecordStatus::Compensating => "compensating",
            RecordStatus::Completed => "completed",
            RecordStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RecordStatus::Active),
            "compensating" => Ok(RecordStatus::Compensating),
            "completed" => Ok(RecordStatus::Completed),
            "failed" => Ok(RecordStatus::Failed),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// One persisted saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub tenant: Tenant,
    pub transaction_id: TransactionId,
    pub saga_type: String,
    pub initiated_by: String,
    pub status: RecordStatus,
    /// Ordered steps, encoded by the orchestrator.
    pub steps: serde_json::Value,
    /// Incremented by every successful update; starts at 1.
    pub version: i64,
    /// Deadline of the step currently awaiting a status event.
    pub timeout_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(
        tenant: Tenant,
        transaction_id: TransactionId,
        saga_type: impl Into<String>,
        initiated_by: impl Into<String>,
        steps: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant,
            transaction_id,
            saga_type: saga_type.into(),
            initiated_by: initiated_by.into(),
            status: RecordStatus::Active,
            steps,
            version: 1,
            timeout_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn tenant_id(&self) -> uuid::Uuid {
        self.tenant.id()
    }

    pub fn is_timed_out(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.timeout_at.is_some_and(|deadline| deadline <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            RecordStatus::Active,
            RecordStatus::Compensating,
            RecordStatus::Completed,
            RecordStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RecordStatus>().unwrap(), status);
        }
        assert!("paused".parse::<RecordStatus>().is_err());
    }

    #[test]
    fn terminal_records_never_time_out() {
        let tenant = Tenant::new(uuid::Uuid::new_v4(), "GMS", 83, 1);
        let mut record = SagaRecord::new(
            tenant,
            TransactionId::new(),
            "inventory_transaction",
            "test",
            serde_json::json!([]),
        );
        let past = Utc::now() - chrono::Duration::seconds(1);
        record.timeout_at = Some(past);
        assert!(record.is_timed_out(Utc::now()));

        record.status = RecordStatus::Completed;
        assert!(!record.is_timed_out(Utc::now()));
    }
}
