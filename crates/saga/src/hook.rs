use async_trait::async_trait;
use common::OperationContext;

use crate::SagaOutcome;

/// Notified once when a saga reaches a terminal state.
///
/// Hooks run on the task that finished the saga; a hook that does not know
/// the transaction should return without doing anything.
#[async_trait]
pub trait ResumptionHook: Send + Sync {
    async fn on_terminal(&self, ctx: &OperationContext, outcome: &SagaOutcome);
}
