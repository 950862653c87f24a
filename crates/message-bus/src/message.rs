use common::{ChannelId, CharacterId, TransactionId, WorldId};
use serde::{Deserialize, Serialize};

/// Common body envelope shared by commands and status events.
///
/// `kind` is the short discriminator (`type` on the wire) taken from the
/// closed set of the topic's message kinds; `body` holds the kind-specific
/// fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message<B = serde_json::Value> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TransactionId>,
    #[serde(default)]
    pub world_id: WorldId,
    #[serde(default)]
    pub channel_id: ChannelId,
    #[serde(default)]
    pub character_id: CharacterId,
    #[serde(rename = "type")]
    pub kind: String,
    pub body: B,
}

impl<B> Message<B> {
    pub fn new(kind: impl Into<String>, body: B) -> Self {
        Self {
            transaction_id: None,
            world_id: WorldId::default(),
            channel_id: ChannelId::default(),
            character_id: CharacterId::default(),
            kind: kind.into(),
            body,
        }
    }

    pub fn transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn character(mut self, character_id: CharacterId) -> Self {
        self.character_id = character_id;
        self
    }

    pub fn world(mut self, world_id: WorldId, channel_id: ChannelId) -> Self {
        self.world_id = world_id;
        self.channel_id = channel_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_field_is_the_discriminator() {
        let tx = TransactionId::new();
        let message = Message::new("CREATED", serde_json::json!({"itemId": 2000000}))
            .transaction(tx)
            .character(CharacterId(7));
        let json = serde_json::to_value(&message).unwrap();

        assert_eq!(json["type"], "CREATED");
        assert_eq!(json["characterId"], 7);
        assert_eq!(json["transactionId"], tx.to_string());
        assert_eq!(json["body"]["itemId"], 2000000);
    }

    #[test]
    fn addressing_fields_default_when_absent() {
        let message: Message =
            serde_json::from_str(r#"{"type":"ERROR","body":{"reason":"x"}}"#).unwrap();
        assert_eq!(message.character_id, CharacterId(0));
        assert!(message.transaction_id.is_none());
    }
}
