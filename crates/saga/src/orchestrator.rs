//! The orchestrator drives sagas from creation to a terminal state.
//!
//! Every state change is a read-modify-write of the saga record guarded by
//! the record's version. The command for a step is published only after the
//! step has been persisted as dispatched; if that publish is lost the step
//! deadline fires and the sweeper fails the step. An unfinished saga with
//! nothing in flight is advanced by the sweeper once its grace period has
//! passed. Status events are matched on the transaction id and, when the
//! leaf echoes it, the step header. Terminal transitions go
//! through the same version check, so exactly one writer announces a saga's
//! outcome and resumption hooks fire at most once.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{Cancellation, OperationContext, TransactionId};
use futures_util::StreamExt;
use message_bus::{Message, Producer};
use saga_store::{RecordStatus, SagaQuery, SagaRecord, SagaStore, StoreError};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{Result, SagaError};
use crate::model::{Move, Saga, StepError, Terminal};
use crate::table::{self, SAGA_STATUS, Verdict};
use crate::{Action, Payload, ResumptionHook, SagaOutcome, StepStatus};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Deadline for actions without their own timeout in the action table.
    pub step_timeout: Duration,
    pub sweep_interval: Duration,
    /// Reloads attempted after a version conflict before giving up.
    pub conflict_retries: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            conflict_retries: 5,
        }
    }
}

/// Result of feeding a status event to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// The event resolved the awaiting step.
    Applied,
    /// No saga with this transaction id exists for the tenant.
    Unknown,
    /// The saga exists but the event is not for its awaiting step.
    Ignored,
}

enum Mutation<T> {
    Missing,
    Unchanged,
    Applied(Saga, T),
}

enum Planned {
    Command(Outbound),
    Finished,
}

/// What the sweeper did to a saga that was due.
enum Swept {
    TimedOut(usize),
    Advanced(Planned),
}

/// A command ready to publish for one step.
struct Outbound {
    topic: String,
    key: String,
    sub_id: String,
    action: Action,
    index: usize,
    compensating: bool,
    message: Message,
}

impl Outbound {
    fn build(saga: &Saga, index: usize, payload: Payload, compensating: bool) -> Result<Self> {
        let spec = table::spec(payload.action());
        let character_id = payload.character_id();
        let key = payload.partition_key();
        let field = match &payload {
            Payload::ChangeMap(p) => Some(p.field),
            _ => None,
        };
        let (action, body) = payload.into_parts()?;

        let mut message = Message::new(spec.command_type, body)
            .transaction(saga.transaction_id)
            .character(character_id);
        if let Some(field) = field {
            message = message.world(field.world_id, field.channel_id);
        }

        Ok(Self {
            topic: spec.command_topic.name(),
            key,
            sub_id: saga.steps[index].command_id(compensating),
            action,
            index,
            compensating,
            message,
        })
    }

    fn timeout(&self, default: Duration) -> Duration {
        table::spec(self.action).timeout.unwrap_or(default)
    }
}

/// Drives saga records in `S`, publishing commands through the producer.
pub struct Orchestrator<S> {
    store: S,
    producer: Producer,
    config: OrchestratorConfig,
    hooks: RwLock<Vec<Arc<dyn ResumptionHook>>>,
}

impl<S: SagaStore> Orchestrator<S> {
    pub fn new(store: S, producer: Producer) -> Self {
        Self {
            store,
            producer,
            config: OrchestratorConfig::default(),
            hooks: RwLock::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn register_hook(&self, hook: Arc<dyn ResumptionHook>) {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(hook);
    }

    /// Persists a new saga and dispatches its first step.
    ///
    /// Once the saga is stored it is accepted: a failed first dispatch is
    /// logged and left to the sweeper.
    #[tracing::instrument(
        skip_all,
        fields(
            transaction_id = %saga.transaction_id,
            tenant_id = %ctx.tenant().id(),
            saga_type = %saga.saga_type,
        )
    )]
    pub async fn create(&self, ctx: &OperationContext, saga: Saga) -> Result<TransactionId> {
        if saga.tenant != *ctx.tenant() {
            return Err(SagaError::Invalid(
                "saga tenant does not match the operation tenant".into(),
            ));
        }
        let transaction_id = saga.transaction_id;
        self.store.insert(saga.to_record()?).await?;

        metrics::counter!("saga_created_total", "saga_type" => saga.saga_type.as_str())
            .increment(1);
        tracing::info!(steps = saga.steps.len(), "saga created");

        if let Err(e) = self.advance(ctx, transaction_id).await {
            tracing::warn!(error = %e, "first dispatch failed; the sweeper will advance the saga");
        }
        Ok(transaction_id)
    }

    pub async fn get(&self, tenant_id: Uuid, transaction_id: TransactionId) -> Result<Option<Saga>> {
        self.store
            .get(tenant_id, transaction_id)
            .await?
            .map(Saga::from_record)
            .transpose()
    }

    /// Dispatches the next command the saga needs, or finishes it.
    ///
    /// A no-op while a command is in flight or once the saga is terminal.
    #[tracing::instrument(
        skip_all,
        fields(transaction_id = %transaction_id, tenant_id = %ctx.tenant().id())
    )]
    pub async fn advance(&self, ctx: &OperationContext, transaction_id: TransactionId) -> Result<()> {
        let now = Utc::now();
        let default_timeout = self.config.step_timeout;
        let mutation = self
            .mutate(ctx, transaction_id, |saga| plan(saga, now, default_timeout))
            .await?;

        match mutation {
            Mutation::Applied(saga, Planned::Command(command)) => {
                self.publish_command(ctx, &saga, command).await;
            }
            Mutation::Applied(saga, Planned::Finished) => self.announce(ctx, &saga).await,
            Mutation::Missing => return Err(SagaError::NotFound(transaction_id)),
            Mutation::Unchanged => {}
        }
        Ok(())
    }

    /// Correlates a status event consumed from `topic` with the step its
    /// transaction is awaiting. An event whose step header names another
    /// step, or the forward command of a step being compensated, is ignored.
    #[tracing::instrument(
        skip_all,
        fields(
            topic = %topic,
            kind = %message.kind,
            tenant_id = %ctx.tenant().id(),
            transaction_id = tracing::field::Empty,
        )
    )]
    pub async fn handle_status(
        &self,
        ctx: &OperationContext,
        topic: &str,
        message: &Message,
    ) -> Result<Correlation> {
        let Some(transaction_id) = ctx.transaction_id().or(message.transaction_id) else {
            return Ok(Correlation::Unknown);
        };
        tracing::Span::current().record("transaction_id", tracing::field::display(transaction_id));
        let step_id = ctx.step_id();

        let now = Utc::now();
        let mutation = self
            .mutate(ctx, transaction_id, |saga| {
                let Some(index) = saga.awaiting() else {
                    return Ok(None);
                };
                if step_id.is_some_and(|id| id != saga.steps[index].awaited_command_id()) {
                    return Ok(None);
                }
                let Some(action) = awaited_action(saga, index) else {
                    return Ok(None);
                };
                let spec = table::spec(action);
                if spec.status_topic.name() != topic {
                    return Ok(None);
                }
                match spec.classify(&message.kind) {
                    Some(Verdict::Success) => saga.step_succeeded(index, now),
                    Some(Verdict::Failure) => {
                        saga.step_failed(index, StepError::from_body(&message.body), now)
                    }
                    None => return Ok(None),
                }
                Ok(Some(index))
            })
            .await?;

        match mutation {
            Mutation::Missing => Ok(Correlation::Unknown),
            Mutation::Unchanged => {
                tracing::debug!("status event does not match the awaiting step");
                Ok(Correlation::Ignored)
            }
            Mutation::Applied(saga, index) => {
                let step = &saga.steps[index];
                tracing::info!(
                    step = %step.step_id,
                    action = %step.action,
                    status = %step.status,
                    character_id = %message.character_id,
                    "step resolved"
                );
                self.continue_with(ctx, &saga, index).await?;
                Ok(Correlation::Applied)
            }
        }
    }

    /// Fails the awaiting step of `transaction_id` if its deadline has
    /// passed, or advances the saga if it has sat with nothing in flight
    /// past its grace period. Returns whether the saga was acted on.
    #[tracing::instrument(
        skip_all,
        fields(transaction_id = %transaction_id, tenant_id = %ctx.tenant().id())
    )]
    pub async fn handle_timeout(
        &self,
        ctx: &OperationContext,
        transaction_id: TransactionId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let default_timeout = self.config.step_timeout;
        let mutation = self
            .mutate(ctx, transaction_id, |saga| {
                if saga.timeout_at().is_none_or(|due| due > now) {
                    return Ok(None);
                }
                let Some(index) = saga.awaiting() else {
                    return Ok(plan(saga, now, default_timeout)?.map(Swept::Advanced));
                };
                saga.step_failed(index, StepError::timeout(), now);
                Ok(Some(Swept::TimedOut(index)))
            })
            .await?;

        let Mutation::Applied(saga, swept) = mutation else {
            return Ok(false);
        };
        match swept {
            Swept::TimedOut(index) => {
                let step = &saga.steps[index];
                metrics::counter!("saga_step_timeouts_total", "action" => step.action.to_string())
                    .increment(1);
                tracing::warn!(step = %step.step_id, action = %step.action, "step timed out");
                self.continue_with(ctx, &saga, index).await?;
            }
            Swept::Advanced(Planned::Command(command)) => {
                tracing::warn!(step = %command.sub_id, "saga had nothing in flight; dispatching");
                self.publish_command(ctx, &saga, command).await;
            }
            Swept::Advanced(Planned::Finished) => self.announce(ctx, &saga).await,
        }
        Ok(true)
    }

    /// Handles every saga due at or before `now` across all tenants: steps
    /// past their deadline time out and stalled sagas are advanced.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.store.query(SagaQuery::timed_out(now)).await?;
        let mut swept = 0;
        for record in due {
            let ctx = OperationContext::new(record.tenant.clone())
                .with_transaction(record.transaction_id);
            match self.handle_timeout(&ctx, record.transaction_id, now).await {
                Ok(true) => swept += 1,
                Ok(false) => {}
                Err(e) => tracing::error!(
                    transaction_id = %record.transaction_id,
                    tenant_id = %record.tenant_id(),
                    error = %e,
                    "sweep failed for saga"
                ),
            }
        }
        Ok(swept)
    }

    /// Re-dispatches work left over from a previous process: steps never
    /// dispatched and sagas whose last step resolved without being finished.
    /// Steps already in flight are left to the sweeper.
    #[tracing::instrument(skip_all)]
    pub async fn recover(&self) -> Result<usize> {
        let mut unfinished = self.store.stream_unfinished().await?;
        let mut recovered = 0;
        while let Some(record) = unfinished.next().await {
            let record = record?;
            let ctx = OperationContext::new(record.tenant.clone())
                .with_transaction(record.transaction_id);
            match self.advance(&ctx, record.transaction_id).await {
                Ok(()) => recovered += 1,
                Err(e) => tracing::error!(
                    transaction_id = %record.transaction_id,
                    tenant_id = %record.tenant_id(),
                    error = %e,
                    "saga recovery failed"
                ),
            }
        }
        tracing::info!(sagas = recovered, "saga recovery finished");
        Ok(recovered)
    }

    /// Follows up on the step at `index` having just been resolved.
    async fn continue_with(&self, ctx: &OperationContext, saga: &Saga, index: usize) -> Result<()> {
        if saga.is_terminal() {
            self.announce(ctx, saga).await;
            return Ok(());
        }
        if saga.steps[index].status == StepStatus::Failed {
            warn_uncompensable(saga);
        }
        self.advance(ctx, saga.transaction_id).await
    }

    async fn publish_command(&self, ctx: &OperationContext, saga: &Saga, command: Outbound) {
        let ctx = ctx
            .clone()
            .with_transaction(saga.transaction_id)
            .with_step_id(command.sub_id.as_str());
        let published = self
            .producer
            .emit(&ctx, |buffer| buffer.put(&command.topic, &command.key, &command.message))
            .await;

        let step = &saga.steps[command.index];
        match published {
            Ok(()) => {
                metrics::counter!("saga_steps_dispatched_total", "action" => command.action.to_string())
                    .increment(1);
                if command.compensating {
                    metrics::counter!("saga_compensations_total").increment(1);
                }
                tracing::info!(
                    step = %command.sub_id,
                    action = %command.action,
                    topic = %command.topic,
                    "command dispatched"
                );
            }
            Err(e) => tracing::error!(
                step = %step.step_id,
                action = %command.action,
                topic = %command.topic,
                error = %e,
                "command publish failed; the step will time out"
            ),
        }
    }

    async fn announce(&self, ctx: &OperationContext, saga: &Saga) {
        let Some(outcome) = SagaOutcome::of(saga) else {
            return;
        };
        let elapsed = (saga.updated_at - saga.created_at).to_std().unwrap_or_default();
        metrics::histogram!("saga_duration_seconds").record(elapsed.as_secs_f64());
        self.broadcast(ctx, &outcome).await;
    }

    async fn broadcast(&self, ctx: &OperationContext, outcome: &SagaOutcome) {
        match outcome.terminal {
            Terminal::Completed => {
                metrics::counter!("saga_completed_total").increment(1);
                tracing::info!(transaction_id = %outcome.transaction_id, "saga completed");
            }
            Terminal::Failed => {
                metrics::counter!("saga_failed_total").increment(1);
                tracing::warn!(
                    transaction_id = %outcome.transaction_id,
                    failed_step = ?outcome.failed_step,
                    error_code = ?outcome.error_code,
                    reason = ?outcome.reason,
                    "saga failed"
                );
            }
        }

        let ctx = ctx.clone().with_transaction(outcome.transaction_id).without_step_id();
        let key = outcome.transaction_id.to_string();
        if let Err(e) = self
            .producer
            .publish(&ctx, &SAGA_STATUS.name(), &key, &outcome.to_event())
            .await
        {
            tracing::error!(transaction_id = %outcome.transaction_id, error = %e, "saga status publish failed");
        }

        let hooks: Vec<_> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook.on_terminal(&ctx, outcome).await;
        }
    }

    /// Loads the saga, applies `apply` and writes the result back under the
    /// version check, reloading on conflict. `apply` returning `None` means
    /// nothing changed and nothing is written.
    async fn mutate<T, F>(
        &self,
        ctx: &OperationContext,
        transaction_id: TransactionId,
        mut apply: F,
    ) -> Result<Mutation<T>>
    where
        F: FnMut(&mut Saga) -> Result<Option<T>> + Send,
        T: Send,
    {
        let tenant_id = ctx.tenant().id();
        for attempt in 0..=self.config.conflict_retries {
            let Some(record) = self.store.get(tenant_id, transaction_id).await? else {
                return Ok(Mutation::Missing);
            };
            if record.status.is_terminal() {
                return Ok(Mutation::Unchanged);
            }

            let mut saga = match Saga::from_record(record.clone()) {
                Ok(saga) => saga,
                Err(SagaError::Corrupt { reason, .. }) => {
                    self.fail_unreadable(ctx, record, reason).await?;
                    return Ok(Mutation::Unchanged);
                }
                Err(e) => return Err(e),
            };

            let Some(value) = apply(&mut saga)? else {
                return Ok(Mutation::Unchanged);
            };

            match self.store.update(saga.to_record()?).await {
                Ok(stored) => {
                    saga.version = stored.version;
                    saga.updated_at = stored.updated_at;
                    return Ok(Mutation::Applied(saga, value));
                }
                Err(StoreError::VersionConflict { expected, actual, .. }) => {
                    tracing::debug!(attempt, expected, actual, "version conflict; reloading saga");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(SagaError::Contended(transaction_id))
    }

    async fn fail_unreadable(
        &self,
        ctx: &OperationContext,
        mut record: SagaRecord,
        reason: String,
    ) -> Result<()> {
        tracing::error!(
            transaction_id = %record.transaction_id,
            tenant_id = %record.tenant_id(),
            reason = %reason,
            "corrupt saga; failing it without compensation"
        );
        record.status = RecordStatus::Failed;
        record.timeout_at = None;
        match self.store.update(record.clone()).await {
            Ok(_) => {}
            Err(StoreError::VersionConflict { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        let outcome = SagaOutcome {
            tenant: record.tenant,
            transaction_id: record.transaction_id,
            saga_type: record.saga_type,
            terminal: Terminal::Failed,
            failed_step: None,
            error_code: None,
            reason: Some(reason),
        };
        self.broadcast(ctx, &outcome).await;
        Ok(())
    }
}

impl<S: SagaStore + 'static> Orchestrator<S> {
    /// Runs [`Orchestrator::sweep`] every `sweep_interval` until `cancel`
    /// fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: Cancellation) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(orchestrator.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match orchestrator.sweep(Utc::now()).await {
                            Ok(0) => {}
                            Ok(n) => tracing::info!(sagas = n, "sweeper handled due sagas"),
                            Err(e) => tracing::error!(error = %e, "saga sweep failed"),
                        }
                    }
                }
            }
            tracing::info!("saga sweeper stopped");
        })
    }
}

/// Chooses and applies the next move. Runs inside [`Orchestrator::mutate`].
fn plan(saga: &mut Saga, now: DateTime<Utc>, default_timeout: Duration) -> Result<Option<Planned>> {
    let deadline = |timeout: Duration| {
        now + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(30))
    };

    match saga.next_move() {
        Move::Wait | Move::Done => Ok(None),
        Move::Finish(terminal) => {
            saga.finish(terminal, now);
            Ok(Some(Planned::Finished))
        }
        Move::Dispatch(index) => match saga.steps[index].payload() {
            Ok(payload) => {
                let command = Outbound::build(saga, index, payload, false)?;
                saga.mark_dispatched(index, now, deadline(command.timeout(default_timeout)));
                Ok(Some(Planned::Command(command)))
            }
            Err(e) => {
                let action = saga.steps[index].action;
                saga.fail_corrupt(index, format!("unreadable {action} payload: {e}"), now);
                Ok(Some(Planned::Finished))
            }
        },
        Move::Compensate(index) => {
            let Some(inverse) = saga.steps[index].payload().ok().and_then(|p| p.inverse()) else {
                saga.fail_corrupt(index, "compensation target has no inverse", now);
                return Ok(Some(Planned::Finished));
            };
            let command = Outbound::build(saga, index, inverse, true)?;
            saga.begin_compensation(index, now, deadline(command.timeout(default_timeout)));
            Ok(Some(Planned::Command(command)))
        }
    }
}

/// The action whose status event the step at `index` is waiting for.
fn awaited_action(saga: &Saga, index: usize) -> Option<Action> {
    let step = &saga.steps[index];
    match step.status {
        StepStatus::Compensating => step.payload().ok()?.inverse().map(|p| p.action()),
        _ => Some(step.action),
    }
}

fn warn_uncompensable(saga: &Saga) {
    for step in &saga.steps {
        let invertible = step.payload().ok().and_then(|p| p.inverse()).is_some();
        if step.status == StepStatus::Completed && !invertible {
            tracing::warn!(
                transaction_id = %saga.transaction_id,
                step = %step.step_id,
                action = %step.action,
                "step has no inverse; leaving it completed"
            );
        }
    }
}
