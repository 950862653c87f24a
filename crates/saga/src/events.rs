//! Terminal saga broadcasts.

use common::{Tenant, TransactionId};
use message_bus::Message;
use serde::{Deserialize, Serialize};

use crate::model::{Saga, Terminal};

/// Body of a `saga.status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaStatusBody {
    pub saga_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// `{transactionId, type: COMPLETED|FAILED, body}` on `saga.status`.
pub type SagaStatusEvent = Message<SagaStatusBody>;

/// How a saga ended, as handed to resumption hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaOutcome {
    pub tenant: Tenant,
    pub transaction_id: TransactionId,
    pub saga_type: String,
    pub terminal: Terminal,
    pub failed_step: Option<String>,
    pub error_code: Option<String>,
    pub reason: Option<String>,
}

impl SagaOutcome {
    pub fn of(saga: &Saga) -> Option<Self> {
        let terminal = match saga.status {
            saga_store::RecordStatus::Completed => Terminal::Completed,
            saga_store::RecordStatus::Failed => Terminal::Failed,
            _ => return None,
        };
        let failed = saga.failed_step();
        let error = failed.and_then(|s| s.error.as_ref());
        Some(Self {
            tenant: saga.tenant.clone(),
            transaction_id: saga.transaction_id,
            saga_type: saga.saga_type.to_string(),
            terminal,
            failed_step: failed.map(|s| s.step_id.clone()),
            error_code: error.and_then(|e| e.error_code.clone()),
            reason: error.map(|e| e.reason.clone()).filter(|r| !r.is_empty()),
        })
    }

    /// Rebuilds an outcome from a consumed status event.
    pub fn from_event(tenant: Tenant, event: &SagaStatusEvent) -> Option<Self> {
        let terminal = match event.kind.to_ascii_uppercase().as_str() {
            "COMPLETED" => Terminal::Completed,
            "FAILED" => Terminal::Failed,
            _ => return None,
        };
        Some(Self {
            tenant,
            transaction_id: event.transaction_id?,
            saga_type: event.body.saga_type.clone(),
            terminal,
            failed_step: event.body.failed_step.clone(),
            error_code: event.body.error_code.clone(),
            reason: event.body.reason.clone(),
        })
    }

    pub fn to_event(&self) -> SagaStatusEvent {
        Message::new(
            self.terminal.as_str(),
            SagaStatusBody {
                saga_type: self.saga_type.clone(),
                failed_step: self.failed_step.clone(),
                error_code: self.error_code.clone(),
                reason: self.reason.clone(),
            },
        )
        .transaction(self.transaction_id)
    }

    pub fn is_completed(&self) -> bool {
        self.terminal == Terminal::Completed
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn event_shape_omits_absent_failure_details() {
        let outcome = SagaOutcome {
            tenant: Tenant::new(Uuid::new_v4(), "GMS", 83, 1),
            transaction_id: TransactionId::new(),
            saga_type: "craft_transaction".into(),
            terminal: Terminal::Completed,
            failed_step: None,
            error_code: None,
            reason: None,
        };
        let json = serde_json::to_value(outcome.to_event()).unwrap();
        assert_eq!(json["type"], "COMPLETED");
        assert_eq!(json["body"], serde_json::json!({"sagaType": "craft_transaction"}));
        assert_eq!(json["transactionId"], outcome.transaction_id.to_string());
    }

    #[test]
    fn failed_event_round_trips_to_outcome() {
        let tenant = Tenant::new(Uuid::new_v4(), "GMS", 83, 1);
        let outcome = SagaOutcome {
            tenant: tenant.clone(),
            transaction_id: TransactionId::new(),
            saga_type: "transport_transaction".into(),
            terminal: Terminal::Failed,
            failed_step: Some("warp".into()),
            error_code: Some("TRANSPORT_CAPACITY_FULL".into()),
            reason: Some("full".into()),
        };
        let rebuilt = SagaOutcome::from_event(tenant, &outcome.to_event()).unwrap();
        assert_eq!(rebuilt, outcome);
    }
}
