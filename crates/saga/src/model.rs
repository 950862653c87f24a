//! Saga and step model, the builder that enforces construction rules, and
//! the pure transition logic the orchestrator persists.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use common::{Tenant, TransactionId};
use saga_store::{RecordStatus, SagaRecord};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::{Action, Payload, StepStatus};

/// Reason recorded on a step whose action failed validation.
pub const VALIDATION_FAILED: &str = "Validation failed";
/// Reason recorded on a step whose deadline elapsed.
pub const TIMEOUT: &str = "Timeout";
/// How long an unfinished saga may sit with no command in flight before
/// the sweeper advances it.
pub const STALL_GRACE_SECS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaType {
    InventoryTransaction,
    QuestReward,
    TradeTransaction,
    CashShopOperation,
    GachaponTransaction,
    CraftTransaction,
    TransportTransaction,
    QuestStart,
    QuestComplete,
}

impl SagaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaType::InventoryTransaction => "inventory_transaction",
            SagaType::QuestReward => "quest_reward",
            SagaType::TradeTransaction => "trade_transaction",
            SagaType::CashShopOperation => "cash_shop_operation",
            SagaType::GachaponTransaction => "gachapon_transaction",
            SagaType::CraftTransaction => "craft_transaction",
            SagaType::TransportTransaction => "transport_transaction",
            SagaType::QuestStart => "quest_start",
            SagaType::QuestComplete => "quest_complete",
        }
    }
}

impl std::fmt::Display for SagaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SagaType {
    type Err = SagaError;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| SagaError::Invalid(format!("unknown saga type '{s}'")))
    }
}

/// Why a step failed, as reported by the leaf service or the sweeper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default)]
    pub reason: String,
}

impl StepError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            error_code: None,
            reason: reason.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn timeout() -> Self {
        Self::new(TIMEOUT)
    }

    /// Reads `errorCode` and `reason` from a status event body.
    pub fn from_body(body: &serde_json::Value) -> Self {
        let text = |key: &str| body.get(key).and_then(|v| v.as_str()).map(str::to_string);
        Self {
            error_code: text("errorCode").filter(|c| !c.is_empty()),
            reason: text("reason").unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub index: usize,
    pub step_id: String,
    pub status: StepStatus,
    pub action: Action,
    pub payload: serde_json::Value,
    /// When the command (or, while compensating, the inverse) was published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

impl Step {
    /// Whether the step has a command in flight and is waiting for its
    /// status event.
    pub fn is_awaiting(&self) -> bool {
        match self.status {
            StepStatus::Pending => self.dispatched_at.is_some(),
            StepStatus::Compensating => true,
            _ => false,
        }
    }

    pub fn payload(&self) -> serde_json::Result<Payload> {
        Payload::from_parts(self.action, &self.payload)
    }

    /// Step header value of this step's command, or of its inverse.
    pub fn command_id(&self, compensating: bool) -> String {
        if compensating {
            format!("{}:compensate", self.step_id)
        } else {
            self.step_id.clone()
        }
    }

    /// Step header value a reply to the command in flight must carry.
    pub fn awaited_command_id(&self) -> String {
        self.command_id(self.status == StepStatus::Compensating)
    }

    fn transition(&mut self, next: StepStatus) {
        debug_assert!(
            self.status.can_transition_to(next),
            "illegal step transition {} -> {}",
            self.status,
            next
        );
        self.status = next;
    }
}

/// Terminal state a saga ends in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Terminal {
    Completed,
    Failed,
}

impl Terminal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Terminal::Completed => "COMPLETED",
            Terminal::Failed => "FAILED",
        }
    }
}

/// What the orchestrator should do next with a saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Move {
    /// A command is in flight; nothing to do until its event arrives.
    Wait,
    /// Publish the forward command of this step.
    Dispatch(usize),
    /// Publish the inverse of this completed step.
    Compensate(usize),
    Finish(Terminal),
    /// Already terminal.
    Done,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Saga {
    pub tenant: Tenant,
    pub transaction_id: TransactionId,
    pub saga_type: SagaType,
    pub initiated_by: String,
    pub status: RecordStatus,
    pub steps: Vec<Step>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Saga {
    pub fn builder(tenant: Tenant) -> SagaBuilder {
        SagaBuilder::new(tenant)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Index of the step with a command in flight.
    pub fn awaiting(&self) -> Option<usize> {
        self.steps.iter().position(Step::is_awaiting)
    }

    pub fn failed_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.status == StepStatus::Failed)
    }

    /// When the sweeper must look at the saga: the deadline of the step in
    /// flight, or for an unfinished saga with nothing in flight, a grace
    /// period after its last change.
    pub fn timeout_at(&self) -> Option<DateTime<Utc>> {
        if self.is_terminal() {
            return None;
        }
        match self.awaiting() {
            Some(i) => self.steps[i].deadline,
            None => Some(self.updated_at + chrono::Duration::seconds(STALL_GRACE_SECS)),
        }
    }

    /// Decides the next orchestration move from the current step statuses.
    pub fn next_move(&self) -> Move {
        match self.status {
            RecordStatus::Completed | RecordStatus::Failed => Move::Done,
            _ if self.awaiting().is_some() => Move::Wait,
            RecordStatus::Active => match self
                .steps
                .iter()
                .position(|s| s.status == StepStatus::Pending)
            {
                Some(i) => Move::Dispatch(i),
                None => Move::Finish(Terminal::Completed),
            },
            RecordStatus::Compensating => {
                let candidate = self.steps.iter().rposition(|s| {
                    s.status == StepStatus::Completed
                        && s.payload().ok().and_then(|p| p.inverse()).is_some()
                });
                match candidate {
                    Some(i) => Move::Compensate(i),
                    None => Move::Finish(Terminal::Failed),
                }
            }
        }
    }

    pub fn mark_dispatched(&mut self, index: usize, now: DateTime<Utc>, deadline: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.dispatched_at = Some(now);
        step.deadline = Some(deadline);
        self.updated_at = now;
    }

    pub fn begin_compensation(&mut self, index: usize, now: DateTime<Utc>, deadline: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.transition(StepStatus::Compensating);
        step.dispatched_at = Some(now);
        step.deadline = Some(deadline);
        self.updated_at = now;
    }

    /// Applies a success verdict to the awaiting step.
    pub fn step_succeeded(&mut self, index: usize, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        let next = match step.status {
            StepStatus::Compensating => StepStatus::Compensated,
            _ => StepStatus::Completed,
        };
        step.transition(next);
        step.completed_at = Some(now);
        step.deadline = None;
        self.updated_at = now;
    }

    /// Applies a failure verdict to the awaiting step.
    ///
    /// A forward failure flips the saga into compensation, except a failed
    /// validation probe, which fails the saga outright. A failed inverse is
    /// recorded on the step and the reverse walk continues.
    pub fn step_failed(&mut self, index: usize, error: StepError, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.deadline = None;
        step.completed_at = Some(now);
        self.updated_at = now;

        if step.status == StepStatus::Compensating {
            step.transition(StepStatus::Compensated);
            step.error = Some(error);
            return;
        }

        step.transition(StepStatus::Failed);
        if step.action == Action::ValidateCharacterState {
            step.error = Some(StepError {
                error_code: error.error_code,
                reason: VALIDATION_FAILED.to_string(),
            });
            self.status = RecordStatus::Failed;
        } else {
            step.error = Some(error);
            self.status = RecordStatus::Compensating;
        }
    }

    /// Fails the saga without compensation because `index` cannot be
    /// interpreted.
    pub fn fail_corrupt(&mut self, index: usize, reason: impl Into<String>, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Failed;
        step.deadline = None;
        step.error = Some(StepError::new(reason));
        self.status = RecordStatus::Failed;
        self.updated_at = now;
    }

    pub fn finish(&mut self, terminal: Terminal, now: DateTime<Utc>) {
        self.status = match terminal {
            Terminal::Completed => RecordStatus::Completed,
            Terminal::Failed => RecordStatus::Failed,
        };
        self.updated_at = now;
    }

    pub fn to_record(&self) -> Result<SagaRecord> {
        Ok(SagaRecord {
            tenant: self.tenant.clone(),
            transaction_id: self.transaction_id,
            saga_type: self.saga_type.to_string(),
            initiated_by: self.initiated_by.clone(),
            status: self.status,
            steps: serde_json::to_value(&self.steps)?,
            version: self.version,
            timeout_at: self.timeout_at(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }

    pub fn from_record(record: SagaRecord) -> Result<Saga> {
        let corrupt = |reason: String| SagaError::Corrupt {
            transaction_id: record.transaction_id,
            reason,
        };
        let saga_type = record
            .saga_type
            .parse::<SagaType>()
            .map_err(|e| corrupt(e.to_string()))?;
        let steps: Vec<Step> = serde_json::from_value(record.steps.clone())
            .map_err(|e| corrupt(format!("unreadable steps: {e}")))?;
        if steps.iter().filter(|s| s.is_awaiting()).count() > 1 {
            return Err(corrupt("more than one step in flight".to_string()));
        }

        Ok(Saga {
            tenant: record.tenant,
            transaction_id: record.transaction_id,
            saga_type,
            initiated_by: record.initiated_by,
            status: record.status,
            steps,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

/// Builds a [`Saga`], rejecting definitions that break construction rules.
#[derive(Debug)]
pub struct SagaBuilder {
    tenant: Tenant,
    transaction_id: Option<TransactionId>,
    saga_type: SagaType,
    initiated_by: String,
    steps: Vec<(String, Payload)>,
}

impl SagaBuilder {
    fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            transaction_id: None,
            saga_type: SagaType::InventoryTransaction,
            initiated_by: String::new(),
            steps: Vec::new(),
        }
    }

    pub fn transaction_id(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn saga_type(mut self, saga_type: SagaType) -> Self {
        self.saga_type = saga_type;
        self
    }

    pub fn initiated_by(mut self, initiated_by: impl Into<String>) -> Self {
        self.initiated_by = initiated_by.into();
        self
    }

    pub fn step(mut self, step_id: impl Into<String>, payload: Payload) -> Self {
        self.steps.push((step_id.into(), payload));
        self
    }

    pub fn build(self) -> Result<Saga> {
        let transaction_id = self.transaction_id.unwrap_or_default();
        if transaction_id.is_nil() {
            return Err(SagaError::Invalid("transaction id must not be nil".into()));
        }
        if self.initiated_by.trim().is_empty() {
            return Err(SagaError::Invalid("initiatedBy must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SagaError::Invalid("a saga needs at least one step".into()));
        }

        let mut seen = HashSet::new();
        let mut steps = Vec::with_capacity(self.steps.len());
        for (index, (step_id, payload)) in self.steps.into_iter().enumerate() {
            if step_id.trim().is_empty() {
                return Err(SagaError::Invalid(format!("step {index} has an empty id")));
            }
            if !seen.insert(step_id.clone()) {
                return Err(SagaError::Invalid(format!("duplicate step id '{step_id}'")));
            }
            let (action, payload) = payload.into_parts()?;
            steps.push(Step {
                index,
                step_id,
                status: StepStatus::Pending,
                action,
                payload,
                dispatched_at: None,
                deadline: None,
                completed_at: None,
                error: None,
            });
        }

        let now = Utc::now();
        Ok(Saga {
            tenant: self.tenant,
            transaction_id,
            saga_type: self.saga_type,
            initiated_by: self.initiated_by,
            status: RecordStatus::Active,
            steps,
            version: 1,
            created_at: now,
            updated_at: now,
        })
    }
}
