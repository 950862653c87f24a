//! Bus wiring for the conversation runtime.

use std::sync::Arc;

use async_trait::async_trait;
use common::{AccountId, Field, MapId, NpcId, OperationContext};
use message_bus::{
    BoxError, ConsumerConfig, ConsumerManager, Handler, Message, RecordMeta, StartOffset, Topic,
};
use saga::table::{CHARACTER_STATUS, SAGA_STATUS};
use saga::{SagaOutcome, SagaStatusEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConversationError;
use crate::runtime::{ConversationRuntime, Selection};

pub const CONVERSATION_GROUP: &str = "npc-conversation";

pub const CONVERSATION_COMMAND: Topic =
    Topic::new("COMMAND_TOPIC_NPC_CONVERSATION", "npc.conversation.command");

pub const START: &str = "START";
pub const CONTINUE: &str = "CONTINUE";
pub const END: &str = "END";
pub const LOGOUT: &str = "LOGOUT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    pub npc_id: NpcId,
    #[serde(default)]
    pub account_id: AccountId,
    pub map_id: MapId,
}

/// Player-facing errors are logged and the record committed; only
/// transport failures go back to the consumer for another attempt.
fn settle(result: Result<(), ConversationError>) -> Result<(), BoxError> {
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.is_transient() => Err(e.into()),
        Err(e) => {
            tracing::warn!(error = %e, "conversation input rejected");
            Ok(())
        }
    }
}

/// Resumes conversations from `saga.status` broadcasts.
pub struct SagaStatusHandler {
    runtime: Arc<ConversationRuntime>,
}

impl SagaStatusHandler {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Handler<SagaStatusEvent> for SagaStatusHandler {
    async fn handle(
        &self,
        ctx: OperationContext,
        meta: &RecordMeta,
        event: SagaStatusEvent,
    ) -> Result<(), BoxError> {
        let Some(outcome) = SagaOutcome::from_event(ctx.tenant().clone(), &event) else {
            tracing::warn!(offset = meta.offset, kind = %event.kind, "unrecognised saga status event");
            return Ok(());
        };
        settle(self.runtime.resume(&ctx, &outcome).await.map(|_| ()))
    }
}

/// Start, continue and end requests from the channel servers.
pub struct ConversationCommandHandler {
    runtime: Arc<ConversationRuntime>,
}

impl ConversationCommandHandler {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Handler<Message> for ConversationCommandHandler {
    async fn handle(&self, ctx: OperationContext, meta: &RecordMeta, message: Message) -> Result<(), BoxError> {
        let character_id = message.character_id;
        let result = match message.kind.as_str() {
            START => {
                let body: StartBody = match serde_json::from_value(message.body) {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::error!(offset = meta.offset, error = %e, "malformed start command");
                        return Ok(());
                    }
                };
                let field = Field::new(message.world_id, message.channel_id, body.map_id);
                self.runtime
                    .start(&ctx, body.npc_id, character_id, body.account_id, field)
                    .await
            }
            CONTINUE => {
                let selection: Selection = match serde_json::from_value(message.body) {
                    Ok(selection) => selection,
                    Err(e) => {
                        tracing::error!(offset = meta.offset, error = %e, "malformed continue command");
                        return Ok(());
                    }
                };
                self.runtime
                    .continue_conversation(&ctx, character_id, selection)
                    .await
            }
            END => self.runtime.end(&ctx, character_id).await,
            other => {
                tracing::debug!(kind = other, "ignoring conversation command");
                Ok(())
            }
        };
        settle(result)
    }
}

/// Drops conversations of characters that log out.
pub struct CharacterStatusHandler {
    runtime: Arc<ConversationRuntime>,
}

impl CharacterStatusHandler {
    pub fn new(runtime: Arc<ConversationRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl Handler<Message<Value>> for CharacterStatusHandler {
    async fn handle(&self, ctx: OperationContext, _meta: &RecordMeta, message: Message<Value>) -> Result<(), BoxError> {
        if message.kind == LOGOUT {
            self.runtime.disconnect(&ctx, message.character_id);
        }
        Ok(())
    }
}

/// Subscribes the runtime to conversation commands (earliest), character
/// status (latest) and `saga.status` (latest).
pub async fn register(manager: &ConsumerManager, runtime: Arc<ConversationRuntime>) -> message_bus::Result<()> {
    manager
        .add_consumer::<Message, _>(
            ConsumerConfig::new(CONVERSATION_COMMAND.name(), CONVERSATION_GROUP).start(StartOffset::Earliest),
            Arc::new(ConversationCommandHandler::new(runtime.clone())),
        )
        .await?;
    manager
        .add_consumer::<Message<Value>, _>(
            ConsumerConfig::new(CHARACTER_STATUS.name(), CONVERSATION_GROUP).start(StartOffset::Latest),
            Arc::new(CharacterStatusHandler::new(runtime.clone())),
        )
        .await?;
    manager
        .add_consumer::<SagaStatusEvent, _>(
            ConsumerConfig::new(SAGA_STATUS.name(), CONVERSATION_GROUP).start(StartOffset::Latest),
            Arc::new(SagaStatusHandler::new(runtime)),
        )
        .await
}
