//! Conversation error types.

use common::{CharacterId, NpcId, TransactionId};
use message_bus::BusError;
use rest_client::RequestError;
use saga::SagaError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Character {0} is already in a conversation")]
    AlreadyInConversation(CharacterId),

    #[error("Character {0} is not in a conversation")]
    NotInConversation(CharacterId),

    /// The conversation waits on a saga and ignores player input.
    #[error("Conversation of character {character_id} is waiting on saga {transaction_id}")]
    Suspended {
        character_id: CharacterId,
        transaction_id: TransactionId,
    },

    #[error("Unknown state '{0}'")]
    UnknownState(String),

    #[error("Invalid selection: {0}")]
    InvalidSelection(String),

    #[error("No conversation defined for NPC {0}")]
    UnknownNpc(NpcId),

    /// Too many consecutive non-interactive states.
    #[error("Conversation loop detected after state '{0}'")]
    CycleDetected(String),

    #[error("Invalid conversation definition: {0}")]
    InvalidDefinition(String),

    #[error("Saga creation failed: {0}")]
    SagaCreation(String),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConversationError {
    /// Failures of the transport underneath, worth redelivering the input
    /// that caused them.
    pub fn is_transient(&self) -> bool {
        match self {
            ConversationError::Bus(e) => !e.is_poison(),
            ConversationError::Request(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<SagaError> for ConversationError {
    fn from(e: SagaError) -> Self {
        ConversationError::SagaCreation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ConversationError>;
