use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{RecordStatus, SagaRecord};

/// Builder for filtering saga records.
#[derive(Debug, Clone, Default)]
pub struct SagaQuery {
    pub tenant_id: Option<Uuid>,
    /// Any of these statuses.
    pub statuses: Option<Vec<RecordStatus>>,
    pub saga_type: Option<String>,
    /// Records whose deadline is at or before this instant.
    pub timed_out_at: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SagaQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    /// Active and compensating records across all tenants.
    pub fn unfinished() -> Self {
        Self::new().statuses(vec![RecordStatus::Active, RecordStatus::Compensating])
    }

    /// Unfinished records whose step deadline has passed.
    pub fn timed_out(now: DateTime<Utc>) -> Self {
        let mut query = Self::unfinished();
        query.timed_out_at = Some(now);
        query
    }

    pub fn tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn status(mut self, status: RecordStatus) -> Self {
        self.statuses = Some(vec![status]);
        self
    }

    pub fn statuses(mut self, statuses: Vec<RecordStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    pub fn saga_type(mut self, saga_type: impl Into<String>) -> Self {
        self.saga_type = Some(saga_type.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `record` passes every filter except `limit`.
    pub fn matches(&self, record: &SagaRecord) -> bool {
        if self.tenant_id.is_some_and(|id| id != record.tenant_id()) {
            return false;
        }
        if let Some(statuses) = &self.statuses
            && !statuses.contains(&record.status)
        {
            return false;
        }
        if let Some(saga_type) = &self.saga_type
            && *saga_type != record.saga_type
        {
            return false;
        }
        if let Some(now) = self.timed_out_at
            && !record.timeout_at.is_some_and(|deadline| deadline <= now)
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use common::{Tenant, TransactionId};

    use super::*;

    fn record(tenant: &Tenant) -> SagaRecord {
        SagaRecord::new(
            tenant.clone(),
            TransactionId::new(),
            "quest_reward",
            "test",
            serde_json::json!([]),
        )
    }

    #[test]
    fn tenant_and_status_filters_combine() {
        let a = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let b = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let query = SagaQuery::for_tenant(a.id()).status(RecordStatus::Active);

        assert!(query.matches(&record(&a)));
        assert!(!query.matches(&record(&b)));

        let mut done = record(&a);
        done.status = RecordStatus::Completed;
        assert!(!query.matches(&done));
    }

    #[test]
    fn timed_out_requires_a_past_deadline() {
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let now = Utc::now();
        let query = SagaQuery::timed_out(now);

        let mut r = record(&tenant);
        assert!(!query.matches(&r));
        r.timeout_at = Some(now + chrono::Duration::seconds(5));
        assert!(!query.matches(&r));
        r.timeout_at = Some(now - chrono::Duration::seconds(5));
        assert!(query.matches(&r));
    }
}
