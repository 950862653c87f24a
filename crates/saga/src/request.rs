//! Wire shape of a saga creation request, shared by `POST /sagas` and the
//! `saga.command` topic.

use common::{Tenant, TransactionId};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::{Action, Payload, Saga, SagaType};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRequest {
    pub step_id: String,
    pub action: Action,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSagaRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    pub saga_type: SagaType,
    pub initiated_by: String,
    pub steps: Vec<StepRequest>,
}

impl CreateSagaRequest {
    pub fn new(saga_type: SagaType, initiated_by: impl Into<String>) -> Self {
        Self {
            transaction_id: None,
            saga_type,
            initiated_by: initiated_by.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn step(mut self, step_id: impl Into<String>, payload: Payload) -> Result<Self> {
        let (action, payload) = payload.into_parts()?;
        self.steps.push(StepRequest {
            step_id: step_id.into(),
            action,
            payload,
        });
        Ok(self)
    }

    /// Validates every payload against its action and builds the saga.
    pub fn into_saga(self, tenant: Tenant) -> Result<Saga> {
        let mut builder = Saga::builder(tenant)
            .saga_type(self.saga_type)
            .initiated_by(self.initiated_by);
        if let Some(transaction_id) = self.transaction_id {
            builder = builder.transaction_id(transaction_id);
        }
        for step in self.steps {
            let payload = Payload::from_parts(step.action, &step.payload).map_err(|e| {
                SagaError::Invalid(format!(
                    "step '{}' has an invalid {} payload: {e}",
                    step.step_id, step.action
                ))
            })?;
            builder = builder.step(step.step_id, payload);
        }
        builder.build()
    }
}

/// Reply to an accepted creation request; progress is observed on
/// `saga.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaAccepted {
    pub transaction_id: TransactionId,
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn tenant() -> Tenant {
        Tenant::new(Uuid::new_v4(), "GMS", 83, 1)
    }

    #[test]
    fn parses_wire_request() {
        let request: CreateSagaRequest = serde_json::from_value(serde_json::json!({
            "sagaType": "inventory_transaction",
            "initiatedBy": "npc-9010000",
            "steps": [{
                "stepId": "give",
                "action": "award_inventory",
                "payload": {"characterId": 5, "templateId": 2000000, "quantity": 3}
            }]
        }))
        .unwrap();

        let saga = request.into_saga(tenant()).unwrap();
        assert_eq!(saga.steps.len(), 1);
        assert_eq!(saga.steps[0].action, Action::AwardInventory);
    }

    #[test]
    fn mismatched_payload_is_invalid() {
        let request: CreateSagaRequest = serde_json::from_value(serde_json::json!({
            "sagaType": "inventory_transaction",
            "initiatedBy": "npc",
            "steps": [{"stepId": "a", "action": "change_job", "payload": {"amount": 1}}]
        }))
        .unwrap();

        assert!(matches!(
            request.into_saga(tenant()),
            Err(SagaError::Invalid(_))
        ));
    }
}
