//! Drives conversations through their graphs.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use common::{AccountId, CharacterId, Field, NpcId, OperationContext, TransactionId};
use saga::{CreateSagaRequest, ResumptionHook, SagaOutcome, SagaType};
use serde::{Deserialize, Serialize};

use crate::actions::{self, LOCAL_PREFIX, Suspension};
use crate::context::ConversationContext;
use crate::error::{ConversationError, Result};
use crate::model::{Choice, State, StateKind, is_end};
use crate::registry::{ConversationCatalog, ConversationRegistry};
use crate::resolver;
use crate::saga_port::SagaCreator;
use crate::sender::{DialogueSender, NumberRange, Talk, TalkKind};

/// Client action byte that closes a menu or picker.
pub const CANCEL_ACTION: u8 = 0;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Shown while a saga runs; `None` shows nothing.
    pub wait_message: Option<String>,
    /// Consecutive non-interactive states allowed before the conversation
    /// is aborted.
    pub max_chain: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            wait_message: Some("Please wait...".into()),
            max_chain: 64,
        }
    }
}

/// Player input answering the window on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub action: u8,
    #[serde(default)]
    pub last_message_type: u8,
    #[serde(default)]
    pub selection: i32,
}

impl Selection {
    pub fn new(action: u8, selection: i32) -> Self {
        Self {
            action,
            last_message_type: 0,
            selection,
        }
    }
}

/// What entering a state asks the loop to do next.
enum Flow {
    /// Waiting for the player.
    Await,
    /// Waiting for a saga; the registry already holds the context.
    Suspended,
    Goto(String),
    /// Conversation over. `dispose` closes the client window.
    End { dispose: bool },
}

pub struct ConversationRuntime {
    catalog: Arc<ConversationCatalog>,
    registry: Arc<ConversationRegistry>,
    sender: Arc<dyn DialogueSender>,
    sagas: Arc<dyn SagaCreator>,
    config: RuntimeConfig,
}

impl ConversationRuntime {
    pub fn new(
        catalog: Arc<ConversationCatalog>,
        registry: Arc<ConversationRegistry>,
        sender: Arc<dyn DialogueSender>,
        sagas: Arc<dyn SagaCreator>,
    ) -> Self {
        Self {
            catalog,
            registry,
            sender,
            sagas,
            config: RuntimeConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ConversationCatalog {
        &self.catalog
    }

    /// Hook for the orchestrator. Holds the runtime weakly so the two can
    /// reference each other.
    pub fn hook(self: &Arc<Self>) -> Arc<dyn ResumptionHook> {
        Arc::new(ResumeOnTerminal(Arc::downgrade(self)))
    }

    /// Opens `npc_id`'s conversation for a character.
    #[tracing::instrument(skip(self, ctx, field), fields(tenant_id = %ctx.tenant().id()))]
    pub async fn start(
        &self,
        ctx: &OperationContext,
        npc_id: NpcId,
        character_id: CharacterId,
        account_id: AccountId,
        field: Field,
    ) -> Result<()> {
        let tenant = ctx.tenant().id();
        let graph = self.catalog.get(tenant, npc_id)?;
        let conversation = ConversationContext::builder(graph)
            .character(character_id)
            .account(account_id)
            .field(field)
            .build()?;
        self.registry.begin(tenant, conversation.clone())?;
        metrics::counter!("conversation_started_total").increment(1);
        tracing::debug!(state = %conversation.current_state, "conversation started");

        self.run(ctx, conversation).await
    }

    /// Applies the player's answer to the state on screen. A suspended
    /// conversation rejects input and stays where it is.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant().id()))]
    pub async fn continue_conversation(
        &self,
        ctx: &OperationContext,
        character_id: CharacterId,
        selection: Selection,
    ) -> Result<()> {
        let tenant = ctx.tenant().id();
        let mut conversation = self
            .registry
            .get(tenant, character_id)
            .ok_or(ConversationError::NotInConversation(character_id))?;
        if let Some(transaction_id) = conversation.pending_saga {
            tracing::debug!(%transaction_id, "ignoring input while saga runs");
            return Err(ConversationError::Suspended {
                character_id,
                transaction_id,
            });
        }

        let state = conversation.state()?.clone();
        let Some((next, assignments)) = answer(&conversation, &state, selection)? else {
            tracing::debug!(state = %state.id, "player left the conversation");
            return self.finish(ctx, &conversation, true).await;
        };

        if is_end(&next) {
            return self.finish(ctx, &conversation, true).await;
        }
        conversation.scratch.extend(assignments);
        conversation.current_state = next;
        self.registry.put(tenant, conversation.clone());
        self.run(ctx, conversation).await
    }

    /// Routes a suspended conversation by its saga's outcome. Returns false
    /// when no conversation waits on the saga, including when it was
    /// already resumed or the player left.
    #[tracing::instrument(
        skip(self, ctx, outcome),
        fields(tenant_id = %ctx.tenant().id(), transaction_id = %outcome.transaction_id)
    )]
    pub async fn resume(&self, ctx: &OperationContext, outcome: &SagaOutcome) -> Result<bool> {
        let tenant = ctx.tenant().id();
        let Some(mut conversation) = self.registry.claim(tenant, outcome.transaction_id) else {
            tracing::debug!("no conversation waits on this saga");
            return Ok(false);
        };

        let next = resolver::resolve(outcome, &conversation.scratch);
        resolver::purge(&mut conversation.scratch);
        conversation.pending_saga = None;
        metrics::counter!("conversation_resumed_total", "terminal" => outcome.terminal.as_str())
            .increment(1);
        tracing::info!(
            character_id = %conversation.character_id,
            npc_id = %conversation.npc_id,
            terminal = outcome.terminal.as_str(),
            next = %next,
            "resuming conversation"
        );

        if is_end(&next) {
            self.finish(ctx, &conversation, true).await?;
            return Ok(true);
        }
        conversation.current_state = next;
        self.registry.put(tenant, conversation.clone());
        self.run(ctx, conversation).await?;
        Ok(true)
    }

    /// Ends the character's conversation and closes the client window.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant().id()))]
    pub async fn end(&self, ctx: &OperationContext, character_id: CharacterId) -> Result<()> {
        let conversation = self
            .registry
            .get(ctx.tenant().id(), character_id)
            .ok_or(ConversationError::NotInConversation(character_id))?;
        self.finish(ctx, &conversation, true).await
    }

    /// Forgets the character's conversation without telling the client.
    /// A saga still running completes on its own; its outcome then finds
    /// nothing to resume.
    pub fn disconnect(&self, ctx: &OperationContext, character_id: CharacterId) -> bool {
        match self.registry.end(ctx.tenant().id(), character_id) {
            Some(conversation) => {
                tracing::debug!(
                    %character_id,
                    pending_saga = ?conversation.pending_saga,
                    "conversation dropped on disconnect"
                );
                true
            }
            None => false,
        }
    }

    /// Processes states until one needs the player, suspends or ends.
    /// Any failure ends the conversation.
    async fn run(&self, ctx: &OperationContext, mut conversation: ConversationContext) -> Result<()> {
        let tenant = ctx.tenant().id();
        let mut hops = 0usize;

        loop {
            let graph = conversation.graph.clone();
            let state = match graph.find_state(&conversation.current_state) {
                Some(state) => state,
                None => {
                    let e = ConversationError::UnknownState(conversation.current_state.clone());
                    return self.abort(ctx, &conversation, e).await;
                }
            };

            let flow = match self.enter(ctx, &mut conversation, state).await {
                Ok(flow) => flow,
                Err(e) => return self.abort(ctx, &conversation, e).await,
            };

            match flow {
                Flow::Await => {
                    self.registry.put(tenant, conversation);
                    return Ok(());
                }
                Flow::Suspended => return Ok(()),
                Flow::End { dispose } => return self.finish(ctx, &conversation, dispose).await,
                Flow::Goto(next) if is_end(&next) => {
                    return self.finish(ctx, &conversation, true).await;
                }
                Flow::Goto(next) => {
                    hops += 1;
                    if hops > self.config.max_chain {
                        let e = ConversationError::CycleDetected(state.id.clone());
                        return self.abort(ctx, &conversation, e).await;
                    }
                    conversation.current_state = next;
                }
            }
        }
    }

    async fn enter(
        &self,
        ctx: &OperationContext,
        conversation: &mut ConversationContext,
        state: &State,
    ) -> Result<Flow> {
        tracing::debug!(state = %state.id, kind = state.kind.label(), "entering state");
        let npc_id = conversation.npc_id;

        match &state.kind {
            StateKind::Dialogue(dialogue) => {
                let mut talk = Talk::new(
                    npc_id,
                    dialogue.dialogue_type.into(),
                    actions::substitute_lenient(&dialogue.text, &conversation.scratch),
                );
                talk.speaker = dialogue.speaker.clone();
                talk.end_chat = dialogue.end_chat;
                self.show(ctx, conversation, talk).await?;
                if dialogue.end_chat || dialogue.choices.is_empty() {
                    Ok(Flow::End { dispose: false })
                } else {
                    Ok(Flow::Await)
                }
            }
            StateKind::ListSelection(list) => {
                let mut text = actions::substitute_lenient(&list.title, &conversation.scratch);
                text.push_str("\r\n");
                for (i, choice) in listed(&list.choices) {
                    let label = actions::substitute_lenient(&choice.text, &conversation.scratch);
                    text.push_str(&format!("#L{i}##b{label}#k#l\r\n"));
                }
                self.show(ctx, conversation, Talk::new(npc_id, TalkKind::Simple, text)).await?;
                Ok(Flow::Await)
            }
            StateKind::AskSlideMenu(menu) => {
                let mut text = actions::substitute_lenient(&menu.title, &conversation.scratch);
                for (i, choice) in listed(&menu.choices) {
                    let label = actions::substitute_lenient(&choice.text, &conversation.scratch);
                    text.push_str(&format!("#{i}#{label}"));
                }
                let mut talk = Talk::new(npc_id, TalkKind::SlideMenu, text);
                talk.menu_type = Some(menu.menu_type);
                self.show(ctx, conversation, talk).await?;
                Ok(Flow::Await)
            }
            StateKind::AskNumber(ask) => {
                let mut talk = Talk::new(
                    npc_id,
                    TalkKind::Num,
                    actions::substitute_lenient(&ask.text, &conversation.scratch),
                );
                talk.number = Some(NumberRange {
                    default_value: ask.default_value,
                    min_value: ask.min_value,
                    max_value: ask.max_value,
                });
                self.show(ctx, conversation, talk).await?;
                Ok(Flow::Await)
            }
            StateKind::AskStyle(ask) => {
                let styles = styles_of(conversation, &state.kind)?;
                let mut talk = Talk::new(
                    npc_id,
                    TalkKind::Style,
                    actions::substitute_lenient(&ask.text, &conversation.scratch),
                );
                talk.styles = styles;
                self.show(ctx, conversation, talk).await?;
                Ok(Flow::Await)
            }
            StateKind::GenericAction(generic) => {
                let mut remote = Vec::new();
                for operation in &generic.operations {
                    if operation.operation_type.starts_with(LOCAL_PREFIX) {
                        actions::apply_local(conversation, operation)?;
                    } else {
                        remote.push(actions::remote_payload(conversation, operation)?);
                    }
                }
                if !remote.is_empty() {
                    self.fire_and_forget(ctx, conversation, remote).await?;
                }

                for outcome in &generic.outcomes {
                    if actions::conditions_hold(&outcome.conditions, &conversation.scratch)? {
                        return Ok(Flow::Goto(outcome.next_state.clone()));
                    }
                }
                tracing::debug!(state = %state.id, "no outcome matched");
                Ok(Flow::End { dispose: true })
            }
            StateKind::CraftAction(craft) => {
                let transaction_id = TransactionId::new();
                match actions::craft(conversation, craft, transaction_id) {
                    Ok(suspension) => self.suspend(ctx, conversation, suspension, &craft.failure_state).await,
                    Err(e) => {
                        tracing::error!(error = %e, "cannot build craft saga");
                        Ok(Flow::Goto(craft.failure_state.clone()))
                    }
                }
            }
            StateKind::TransportAction(transport) => {
                tracing::debug!(route = %transport.route_name, "starting transport");
                let suspension = actions::transport(conversation, transport, TransactionId::new())?;
                self.suspend(ctx, conversation, suspension, &transport.failure_state).await
            }
            StateKind::GachaponAction(gachapon) => {
                let suspension = actions::gachapon(conversation, gachapon, TransactionId::new())?;
                self.suspend(ctx, conversation, suspension, &gachapon.failure_state).await
            }
        }
    }

    /// Stores the suspended context before the saga exists so an outcome
    /// that arrives early always finds it.
    async fn suspend(
        &self,
        ctx: &OperationContext,
        conversation: &mut ConversationContext,
        suspension: Suspension,
        failure_state: &str,
    ) -> Result<Flow> {
        let tenant = ctx.tenant().id();
        let Suspension { request, scratch } = suspension;
        let transaction_id = request
            .transaction_id
            .ok_or_else(|| ConversationError::SagaCreation("saga request without transaction id".into()))?;

        for (key, value) in scratch {
            conversation.scratch.insert(key.to_string(), value);
        }
        conversation.pending_saga = Some(transaction_id);
        self.registry.put(tenant, conversation.clone());

        let saga_ctx = ctx.clone().with_transaction(transaction_id);
        match self.sagas.create(&saga_ctx, request).await {
            Ok(_) => {
                tracing::info!(
                    %transaction_id,
                    character_id = %conversation.character_id,
                    npc_id = %conversation.npc_id,
                    "saga created, conversation waiting"
                );
                if let Some(wait) = &self.config.wait_message {
                    let talk = Talk::new(conversation.npc_id, TalkKind::Ok, wait.clone());
                    if let Err(e) = self.show(ctx, conversation, talk).await {
                        tracing::warn!(error = %e, "wait message not delivered");
                    }
                }
                Ok(Flow::Suspended)
            }
            Err(e) => {
                tracing::error!(%transaction_id, error = %e, "saga creation failed");
                if self.registry.claim(tenant, transaction_id).is_none() {
                    // Resumed already; nothing left to route here.
                    return Ok(Flow::Suspended);
                }
                conversation.pending_saga = None;
                resolver::purge(&mut conversation.scratch);
                Ok(Flow::Goto(failure_state.to_string()))
            }
        }
    }

    /// Remote operations of a generic action run as their own saga; the
    /// conversation does not wait for it.
    async fn fire_and_forget(
        &self,
        ctx: &OperationContext,
        conversation: &ConversationContext,
        payloads: Vec<saga::Payload>,
    ) -> Result<()> {
        let transaction_id = TransactionId::new();
        let mut request = CreateSagaRequest::new(
            SagaType::InventoryTransaction,
            format!("NPC_{}", conversation.npc_id),
        )
        .with_transaction_id(transaction_id);
        for (i, payload) in payloads.into_iter().enumerate() {
            let step_id = format!("{}_{i}", payload.action());
            request = request.step(step_id, payload)?;
        }
        self.sagas
            .create(&ctx.clone().with_transaction(transaction_id), request)
            .await?;
        Ok(())
    }

    async fn show(&self, ctx: &OperationContext, conversation: &ConversationContext, talk: Talk) -> Result<()> {
        self.sender
            .talk(ctx, conversation.character_id, conversation.field, talk)
            .await
    }

    async fn finish(&self, ctx: &OperationContext, conversation: &ConversationContext, dispose: bool) -> Result<()> {
        self.registry.end(ctx.tenant().id(), conversation.character_id);
        tracing::debug!(character_id = %conversation.character_id, "conversation ended");
        if dispose {
            self.sender
                .dispose(ctx, conversation.character_id, conversation.field)
                .await?;
        }
        Ok(())
    }

    async fn abort(&self, ctx: &OperationContext, conversation: &ConversationContext, error: ConversationError) -> Result<()> {
        tracing::error!(
            character_id = %conversation.character_id,
            npc_id = %conversation.npc_id,
            state = %conversation.current_state,
            error = %error,
            "conversation aborted"
        );
        if let Err(e) = self.finish(ctx, conversation, true).await {
            tracing::warn!(error = %e, "dispose after abort failed");
        }
        Err(error)
    }
}

/// Menu entries worth rendering, with their selection index.
fn listed(choices: &[Choice]) -> impl Iterator<Item = (usize, &Choice)> {
    choices
        .iter()
        .enumerate()
        .filter(|(_, c)| !c.next_state.is_empty() && c.text != "Exit")
}

fn styles_of(conversation: &ConversationContext, kind: &StateKind) -> Result<Vec<u32>> {
    let StateKind::AskStyle(ask) = kind else {
        return Ok(Vec::new());
    };
    if !ask.styles.is_empty() {
        return Ok(ask.styles.clone());
    }
    let key = ask
        .styles_context_key
        .as_deref()
        .ok_or_else(|| ConversationError::InvalidDefinition("style picker without styles".into()))?;
    let raw = conversation
        .scratch
        .get(key)
        .ok_or_else(|| ConversationError::InvalidDefinition(format!("no styles under '{key}'")))?;
    let styles = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.trim().parse::<u32>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|_| ConversationError::InvalidDefinition(format!("malformed styles under '{key}'")))?;
    if styles.is_empty() {
        return Err(ConversationError::InvalidDefinition(format!("no styles under '{key}'")));
    }
    Ok(styles)
}

fn pick<'a>(choices: &'a [Choice], selection: i32) -> Result<&'a Choice> {
    usize::try_from(selection)
        .ok()
        .and_then(|i| choices.get(i))
        .ok_or_else(|| ConversationError::InvalidSelection(format!("no choice {selection}")))
}

/// Maps input on `state` to the next state id and the scratch values to
/// record. `None` means the player closed the window.
fn answer(
    conversation: &ConversationContext,
    state: &State,
    input: Selection,
) -> Result<Option<(String, Vec<(String, String)>)>> {
    let with_context = |choice: &Choice| {
        let values = choice
            .context
            .iter()
            .map(|(k, v)| (k.clone(), actions::substitute_lenient(v, &conversation.scratch)))
            .collect::<Vec<_>>();
        (choice.next_state.clone(), values)
    };

    match &state.kind {
        StateKind::Dialogue(dialogue) => Ok(dialogue
            .choices
            .get(usize::from(input.action))
            .map(with_context)),
        StateKind::ListSelection(list) => {
            if input.action == CANCEL_ACTION {
                return Ok(None);
            }
            Ok(Some(with_context(pick(&list.choices, input.selection)?)))
        }
        StateKind::AskSlideMenu(menu) => {
            if input.action == CANCEL_ACTION {
                return Ok(None);
            }
            let (next, mut values) = with_context(pick(&menu.choices, input.selection)?);
            values.push((menu.context_key.clone(), input.selection.to_string()));
            Ok(Some((next, values)))
        }
        StateKind::AskNumber(ask) => {
            if input.action == CANCEL_ACTION {
                return Ok(None);
            }
            let value = u32::try_from(input.selection)
                .ok()
                .filter(|v| (ask.min_value..=ask.max_value).contains(v))
                .ok_or_else(|| {
                    ConversationError::InvalidSelection(format!(
                        "{} outside {}..={}",
                        input.selection, ask.min_value, ask.max_value
                    ))
                })?;
            let mut values = vec![(ask.context_key.clone(), value.to_string())];
            if let Some(price) = conversation.scratch.get("price").and_then(|p| p.parse::<u64>().ok()) {
                values.push(("totalCost".into(), (u64::from(value) * price).to_string()));
            }
            Ok(Some((ask.next_state.clone(), values)))
        }
        StateKind::AskStyle(ask) => {
            if input.action == CANCEL_ACTION {
                return Ok(None);
            }
            let styles = styles_of(conversation, &state.kind)?;
            let style = usize::try_from(input.selection)
                .ok()
                .and_then(|i| styles.get(i))
                .ok_or_else(|| ConversationError::InvalidSelection(format!("no style {}", input.selection)))?;
            Ok(Some((
                ask.next_state.clone(),
                vec![(ask.context_key.clone(), style.to_string())],
            )))
        }
        other => Err(ConversationError::InvalidSelection(format!(
            "state '{}' ({}) takes no input",
            state.id,
            other.label()
        ))),
    }
}

struct ResumeOnTerminal(Weak<ConversationRuntime>);

#[async_trait]
impl ResumptionHook for ResumeOnTerminal {
    async fn on_terminal(&self, ctx: &OperationContext, outcome: &SagaOutcome) {
        let Some(runtime) = self.0.upgrade() else {
            return;
        };
        if let Err(e) = runtime.resume(ctx, outcome).await {
            tracing::error!(transaction_id = %outcome.transaction_id, error = %e, "resumption failed");
        }
    }
}
