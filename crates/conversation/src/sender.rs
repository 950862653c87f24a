//! Outbound NPC dialogue.

use async_trait::async_trait;
use common::{CharacterId, Field, NpcId, OperationContext};
use message_bus::{Message, Producer, Topic};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::DialogueType;

pub const NPC_COMMAND: Topic = Topic::new("COMMAND_TOPIC_NPC", "npc.command");

pub const TALK: &str = "TALK";
pub const DISPOSE: &str = "DISPOSE";

/// Client dialogue window kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TalkKind {
    Simple,
    Next,
    NextPrevious,
    Previous,
    YesNo,
    Ok,
    Num,
    Style,
    AcceptDecline,
    SlideMenu,
}

impl From<DialogueType> for TalkKind {
    fn from(kind: DialogueType) -> Self {
        match kind {
            DialogueType::SendOk => TalkKind::Ok,
            DialogueType::SendYesNo => TalkKind::YesNo,
            DialogueType::SendNext => TalkKind::Next,
            DialogueType::SendNextPrev => TalkKind::NextPrevious,
            DialogueType::SendPrev => TalkKind::Previous,
            DialogueType::SendAcceptDecline => TalkKind::AcceptDecline,
        }
    }
}

/// One dialogue window shown to one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Talk {
    pub npc_id: NpcId,
    pub message_type: TalkKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub end_chat: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<NumberRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub menu_type: Option<u32>,
}

impl Talk {
    pub fn new(npc_id: NpcId, message_type: TalkKind, message: impl Into<String>) -> Self {
        Self {
            npc_id,
            message_type,
            message: message.into(),
            speaker: None,
            end_chat: false,
            number: None,
            styles: Vec::new(),
            menu_type: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberRange {
    pub default_value: u32,
    pub min_value: u32,
    pub max_value: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisposeBody {}

/// Delivers dialogue windows to the player's channel.
#[async_trait]
pub trait DialogueSender: Send + Sync {
    async fn talk(&self, ctx: &OperationContext, character_id: CharacterId, field: Field, talk: Talk) -> Result<()>;

    /// Closes any open dialogue and re-enables the character's actions.
    async fn dispose(&self, ctx: &OperationContext, character_id: CharacterId, field: Field) -> Result<()>;
}

/// Publishes dialogue as `npc.command` records keyed by character.
pub struct BusDialogueSender {
    producer: Producer,
    topic: String,
}

impl BusDialogueSender {
    pub fn new(producer: Producer) -> Self {
        Self {
            producer,
            topic: NPC_COMMAND.name(),
        }
    }
}

#[async_trait]
impl DialogueSender for BusDialogueSender {
    async fn talk(&self, ctx: &OperationContext, character_id: CharacterId, field: Field, talk: Talk) -> Result<()> {
        let message = Message::new(TALK, talk)
            .character(character_id)
            .world(field.world_id, field.channel_id);
        self.producer
            .publish(ctx, &self.topic, &character_id.to_string(), &message)
            .await?;
        Ok(())
    }

    async fn dispose(&self, ctx: &OperationContext, character_id: CharacterId, field: Field) -> Result<()> {
        let message = Message::new(DISPOSE, DisposeBody::default())
            .character(character_id)
            .world(field.world_id, field.channel_id);
        self.producer
            .publish(ctx, &self.topic, &character_id.to_string(), &message)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{ChannelId, MapId, Tenant, WorldId};
    use message_bus::{InMemoryBroker, codec};
    use uuid::Uuid;

    use super::*;

    #[tokio::test]
    async fn talk_is_published_keyed_by_character() {
        let broker = Arc::new(InMemoryBroker::new());
        let sender = BusDialogueSender::new(Producer::new(broker.clone()));
        let ctx = OperationContext::new(Tenant::new(Uuid::new_v4(), "GMS", 83, 1));
        let field = Field::new(WorldId(0), ChannelId(3), MapId(100000000));

        let mut talk = Talk::new(NpcId(9010000), TalkKind::YesNo, "Ready?");
        talk.speaker = Some("NPC".into());
        sender.talk(&ctx, CharacterId(42), field, talk).await.unwrap();
        sender.dispose(&ctx, CharacterId(42), field).await.unwrap();

        let records = broker.records_for_key(&NPC_COMMAND.name(), "42").await;
        assert_eq!(records.len(), 2);
        let first: Message = codec::decode(&records[0].payload).unwrap();
        assert_eq!(first.kind, TALK);
        assert_eq!(first.channel_id, ChannelId(3));
        assert_eq!(first.body["messageType"], "YES_NO");
        assert_eq!(first.body["npcId"], 9010000);
        let second: Message = codec::decode(&records[1].payload).unwrap();
        assert_eq!(second.kind, DISPOSE);
    }
}
