//! Bus wiring for the orchestrator.

use std::sync::Arc;

use async_trait::async_trait;
use common::OperationContext;
use message_bus::{BoxError, ConsumerConfig, ConsumerManager, Handler, Message, RecordMeta, StartOffset};
use saga_store::SagaStore;

use crate::error::SagaError;
use crate::table::{self, SAGA_COMMAND};
use crate::{CreateSagaRequest, Orchestrator};

/// Consumer group correlating status events and accepting saga commands.
pub const ORCHESTRATOR_GROUP: &str = "saga-orchestrator";

/// Feeds every status event of the action table to the orchestrator.
pub struct StatusEventHandler<S> {
    orchestrator: Arc<Orchestrator<S>>,
}

impl<S> StatusEventHandler<S> {
    pub fn new(orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S: SagaStore + 'static> Handler<Message> for StatusEventHandler<S> {
    async fn handle(
        &self,
        ctx: OperationContext,
        meta: &RecordMeta,
        message: Message,
    ) -> Result<(), BoxError> {
        self.orchestrator
            .handle_status(&ctx, &meta.topic, &message)
            .await?;
        Ok(())
    }
}

/// Creates sagas requested over `saga.command`.
pub struct SagaCommandHandler<S> {
    orchestrator: Arc<Orchestrator<S>>,
}

impl<S> SagaCommandHandler<S> {
    pub fn new(orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl<S: SagaStore + 'static> Handler<CreateSagaRequest> for SagaCommandHandler<S> {
    async fn handle(
        &self,
        ctx: OperationContext,
        meta: &RecordMeta,
        mut request: CreateSagaRequest,
    ) -> Result<(), BoxError> {
        if request.transaction_id.is_none() {
            request.transaction_id = ctx.transaction_id();
        }
        let saga = match request.into_saga(ctx.tenant().clone()) {
            Ok(saga) => saga,
            Err(e) => {
                tracing::error!(offset = meta.offset, error = %e, "rejecting invalid saga command");
                return Ok(());
            }
        };

        match self.orchestrator.create(&ctx, saga).await {
            Ok(_) => Ok(()),
            // Redelivery of a command that already created its saga.
            Err(SagaError::Duplicate(transaction_id)) => {
                tracing::debug!(%transaction_id, "saga already exists");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Subscribes the orchestrator to every status topic and to `saga.command`,
/// both from the earliest offset.
pub async fn register<S: SagaStore + 'static>(
    manager: &ConsumerManager,
    orchestrator: Arc<Orchestrator<S>>,
) -> message_bus::Result<()> {
    let status = Arc::new(StatusEventHandler::new(orchestrator.clone()));
    for topic in table::status_topics() {
        manager
            .add_consumer::<Message, _>(
                ConsumerConfig::new(topic.name(), ORCHESTRATOR_GROUP).start(StartOffset::Earliest),
                status.clone(),
            )
            .await?;
    }

    manager
        .add_consumer::<CreateSagaRequest, _>(
            ConsumerConfig::new(SAGA_COMMAND.name(), ORCHESTRATOR_GROUP).start(StartOffset::Earliest),
            Arc::new(SagaCommandHandler::new(orchestrator)),
        )
        .await
}
