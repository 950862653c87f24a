//! Per-character conversation state.

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{AccountId, CharacterId, Field, NpcId, TransactionId};

use crate::error::{ConversationError, Result};
use crate::model::{ConversationGraph, State};

/// Where one character stands in one NPC's graph.
///
/// While `pending_saga` is set the conversation is suspended: player input
/// is rejected and only the saga's terminal outcome moves it forward.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub character_id: CharacterId,
    pub account_id: AccountId,
    pub npc_id: NpcId,
    pub field: Field,
    pub current_state: String,
    /// String scratch values shared by placeholders, conditions and
    /// resumption routing.
    pub scratch: BTreeMap<String, String>,
    pub pending_saga: Option<TransactionId>,
    pub graph: Arc<ConversationGraph>,
}

impl ConversationContext {
    pub fn builder(graph: Arc<ConversationGraph>) -> ConversationContextBuilder {
        ConversationContextBuilder::new(graph)
    }

    pub fn is_suspended(&self) -> bool {
        self.pending_saga.is_some()
    }

    pub fn state(&self) -> Result<&State> {
        self.graph
            .find_state(&self.current_state)
            .ok_or_else(|| ConversationError::UnknownState(self.current_state.clone()))
    }

    /// Removes every scratch key starting with `prefix`.
    pub fn purge(&mut self, prefix: &str) {
        self.scratch.retain(|key, _| !key.starts_with(prefix));
    }
}

pub struct ConversationContextBuilder {
    graph: Arc<ConversationGraph>,
    character_id: CharacterId,
    account_id: AccountId,
    field: Field,
    current_state: Option<String>,
    scratch: BTreeMap<String, String>,
}

impl ConversationContextBuilder {
    fn new(graph: Arc<ConversationGraph>) -> Self {
        Self {
            graph,
            character_id: CharacterId::default(),
            account_id: AccountId::default(),
            field: Field::default(),
            current_state: None,
            scratch: BTreeMap::new(),
        }
    }

    pub fn character(mut self, character_id: CharacterId) -> Self {
        self.character_id = character_id;
        self
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.field = field;
        self
    }

    /// Defaults to the graph's start state.
    pub fn current_state(mut self, state: impl Into<String>) -> Self {
        self.current_state = Some(state.into());
        self
    }

    pub fn value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.scratch.insert(key.into(), value.into());
        self
    }

    pub fn build(mut self) -> Result<ConversationContext> {
        if self.character_id == CharacterId::default() {
            return Err(ConversationError::InvalidDefinition(
                "conversation needs a character".into(),
            ));
        }

        let current_state = self
            .current_state
            .take()
            .unwrap_or_else(|| self.graph.start_state.clone());
        if self.graph.find_state(&current_state).is_none() {
            return Err(ConversationError::UnknownState(current_state));
        }

        if self.field.world_id.0 > 0 {
            self.scratch
                .entry("worldId".into())
                .or_insert_with(|| self.field.world_id.0.to_string());
        }
        if self.field.channel_id.0 > 0 {
            self.scratch
                .entry("channelId".into())
                .or_insert_with(|| self.field.channel_id.0.to_string());
        }
        if self.account_id.0 > 0 {
            self.scratch
                .entry("accountId".into())
                .or_insert_with(|| self.account_id.0.to_string());
        }

        Ok(ConversationContext {
            character_id: self.character_id,
            account_id: self.account_id,
            npc_id: self.graph.npc_id,
            field: self.field,
            current_state,
            scratch: self.scratch,
            pending_saga: None,
            graph: self.graph,
        })
    }
}
