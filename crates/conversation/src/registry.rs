//! Tenant-scoped conversation storage.

use std::sync::Arc;

use common::{CharacterId, NpcId, Registry, TransactionId};
use uuid::Uuid;

use crate::context::ConversationContext;
use crate::error::{ConversationError, Result};
use crate::model::ConversationGraph;

/// Active conversations by character, plus the pending-saga index used to
/// find the conversation a terminal saga belongs to.
pub struct ConversationRegistry {
    contexts: Registry<CharacterId, ConversationContext>,
    by_saga: Registry<TransactionId, CharacterId>,
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            contexts: Registry::new(),
            by_saga: Registry::new(),
        }
    }

    /// Registers a fresh conversation. A character holds at most one.
    pub fn begin(&self, tenant: Uuid, ctx: ConversationContext) -> Result<()> {
        let character_id = ctx.character_id;
        let pending_saga = ctx.pending_saga;
        if !self.contexts.insert_new(tenant, character_id, ctx) {
            return Err(ConversationError::AlreadyInConversation(character_id));
        }
        if let Some(transaction_id) = pending_saga {
            self.by_saga.insert(tenant, transaction_id, character_id);
        }
        Ok(())
    }

    pub fn get(&self, tenant: Uuid, character_id: CharacterId) -> Option<ConversationContext> {
        self.contexts.get(tenant, &character_id)
    }

    /// Stores `ctx`, indexing its pending saga when it has one.
    pub fn put(&self, tenant: Uuid, ctx: ConversationContext) {
        if let Some(transaction_id) = ctx.pending_saga {
            self.by_saga.insert(tenant, transaction_id, ctx.character_id);
        }
        if let Some(previous) = self.contexts.insert(tenant, ctx.character_id, ctx.clone())
            && let Some(stale) = previous.pending_saga
            && Some(stale) != ctx.pending_saga
        {
            self.by_saga.remove(tenant, &stale);
        }
    }

    /// The suspended conversation waiting on `transaction_id`, if any.
    pub fn by_saga(&self, tenant: Uuid, transaction_id: TransactionId) -> Option<ConversationContext> {
        let character_id = self.by_saga.get(tenant, &transaction_id)?;
        self.contexts
            .get(tenant, &character_id)
            .filter(|ctx| ctx.pending_saga == Some(transaction_id))
    }

    /// Claims the conversation waiting on `transaction_id`. Only the first
    /// caller for a transaction gets it back.
    pub fn claim(&self, tenant: Uuid, transaction_id: TransactionId) -> Option<ConversationContext> {
        let character_id = self.by_saga.remove(tenant, &transaction_id)?;
        self.contexts
            .get(tenant, &character_id)
            .filter(|ctx| ctx.pending_saga == Some(transaction_id))
    }

    /// Drops the character's conversation and its saga index entry.
    pub fn end(&self, tenant: Uuid, character_id: CharacterId) -> Option<ConversationContext> {
        let ctx = self.contexts.remove(tenant, &character_id)?;
        if let Some(transaction_id) = ctx.pending_saga {
            self.by_saga.remove(tenant, &transaction_id);
        }
        Some(ctx)
    }

    pub fn active(&self, tenant: Uuid) -> Vec<CharacterId> {
        self.contexts.keys(tenant)
    }
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Conversation graphs by NPC, per tenant.
pub struct ConversationCatalog {
    graphs: Registry<NpcId, Arc<ConversationGraph>>,
}

impl ConversationCatalog {
    pub fn new() -> Self {
        Self {
            graphs: Registry::new(),
        }
    }

    /// Validates and installs `graph`, replacing any graph for the same NPC.
    pub fn install(&self, tenant: Uuid, graph: ConversationGraph) -> Result<()> {
        graph.validate()?;
        tracing::debug!(%tenant, npc_id = %graph.npc_id, states = graph.states.len(), "installing conversation");
        self.graphs.insert(tenant, graph.npc_id, Arc::new(graph));
        Ok(())
    }

    pub fn get(&self, tenant: Uuid, npc_id: NpcId) -> Result<Arc<ConversationGraph>> {
        self.graphs
            .get(tenant, &npc_id)
            .ok_or(ConversationError::UnknownNpc(npc_id))
    }

    pub fn remove(&self, tenant: Uuid, npc_id: NpcId) -> bool {
        self.graphs.remove(tenant, &npc_id).is_some()
    }
}

impl Default for ConversationCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Dialogue, DialogueType, State, StateKind};

    fn graph(npc: u32) -> ConversationGraph {
        ConversationGraph {
            npc_id: NpcId(npc),
            start_state: "start".into(),
            states: vec![State::new(
                "start",
                StateKind::Dialogue(Dialogue {
                    dialogue_type: DialogueType::SendOk,
                    text: "Hi".into(),
                    speaker: None,
                    end_chat: false,
                    choices: vec![],
                }),
            )],
        }
    }

    fn context(character: u32) -> ConversationContext {
        ConversationContext::builder(Arc::new(graph(1)))
            .character(CharacterId(character))
            .build()
            .unwrap()
    }

    #[test]
    fn one_conversation_per_character() {
        let registry = ConversationRegistry::new();
        let tenant = Uuid::new_v4();
        registry.begin(tenant, context(1)).unwrap();
        assert!(matches!(
            registry.begin(tenant, context(1)),
            Err(ConversationError::AlreadyInConversation(CharacterId(1)))
        ));
        // Another tenant's character 1 is a different player.
        registry.begin(Uuid::new_v4(), context(1)).unwrap();
    }

    #[test]
    fn concurrent_begins_admit_one_conversation() {
        let registry = Arc::new(ConversationRegistry::new());
        let tenant = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.begin(tenant, context(1)).is_ok())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();

        assert_eq!(admitted, 1);
        assert_eq!(registry.active(tenant), vec![CharacterId(1)]);
    }

    #[test]
    fn claim_hands_out_a_suspended_conversation_once() {
        let registry = ConversationRegistry::new();
        let tenant = Uuid::new_v4();
        let tx = TransactionId::new();
        let mut ctx = context(1);
        ctx.pending_saga = Some(tx);
        registry.begin(tenant, ctx).unwrap();

        assert!(registry.by_saga(tenant, tx).is_some());
        assert!(registry.by_saga(Uuid::new_v4(), tx).is_none());
        assert_eq!(registry.claim(tenant, tx).unwrap().character_id, CharacterId(1));
        assert!(registry.claim(tenant, tx).is_none());
    }

    #[test]
    fn ending_drops_the_saga_index() {
        let registry = ConversationRegistry::new();
        let tenant = Uuid::new_v4();
        let tx = TransactionId::new();
        let mut ctx = context(1);
        ctx.pending_saga = Some(tx);
        registry.begin(tenant, ctx).unwrap();

        assert!(registry.end(tenant, CharacterId(1)).is_some());
        assert!(registry.claim(tenant, tx).is_none());
        assert!(registry.active(tenant).is_empty());
    }

    #[test]
    fn catalog_is_tenant_scoped_and_validates() {
        let catalog = ConversationCatalog::new();
        let tenant = Uuid::new_v4();
        catalog.install(tenant, graph(5)).unwrap();
        assert!(catalog.get(tenant, NpcId(5)).is_ok());
        assert!(matches!(
            catalog.get(Uuid::new_v4(), NpcId(5)),
            Err(ConversationError::UnknownNpc(NpcId(5)))
        ));

        let mut broken = graph(6);
        broken.start_state = "missing".into();
        assert!(catalog.install(tenant, broken).is_err());
    }
}
