//! Conversation graph definitions.
//!
//! A graph is a set of named states reachable from `startState`. Each state
//! carries exactly one kind: an interactive prompt (dialogue, list, number,
//! style, slide menu), a local branch (`genericAction`), or an action that
//! suspends the conversation behind a saga (craft, transport, gachapon).
//!
//! On the wire a state is `{"id": .., "stateType": .., "<kind>": {..}}`;
//! the kind object is keyed by its camelCase name.

use std::collections::{BTreeMap, HashSet};

use common::NpcId;
use serde::{Deserialize, Serialize};

use crate::error::{ConversationError, Result};

/// Next-state id that ends the conversation.
pub const END_STATE: &str = "end";

/// Whether `next` leads out of the conversation.
pub fn is_end(next: &str) -> bool {
    next.is_empty() || next.eq_ignore_ascii_case(END_STATE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationGraph {
    pub npc_id: NpcId,
    pub start_state: String,
    pub states: Vec<State>,
}

impl ConversationGraph {
    pub fn find_state(&self, id: &str) -> Option<&State> {
        self.states.iter().find(|s| s.id == id)
    }

    /// Checks that ids are unique and every transition lands on a known
    /// state or on `end`.
    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for state in &self.states {
            if state.id.is_empty() {
                return Err(ConversationError::InvalidDefinition("state with empty id".into()));
            }
            if !ids.insert(state.id.as_str()) {
                return Err(ConversationError::InvalidDefinition(format!(
                    "duplicate state '{}'",
                    state.id
                )));
            }
        }

        if !ids.contains(self.start_state.as_str()) {
            return Err(ConversationError::InvalidDefinition(format!(
                "start state '{}' does not exist",
                self.start_state
            )));
        }

        for state in &self.states {
            for next in state.kind.transitions() {
                if !is_end(next) && !ids.contains(next) {
                    return Err(ConversationError::InvalidDefinition(format!(
                        "state '{}' points at unknown state '{next}'",
                        state.id
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct State {
    pub id: String,
    #[serde(flatten)]
    pub kind: StateKind,
}

impl State {
    pub fn new(id: impl Into<String>, kind: StateKind) -> Self {
        Self { id: id.into(), kind }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StateKind {
    Dialogue(Dialogue),
    GenericAction(GenericAction),
    CraftAction(CraftAction),
    TransportAction(TransportAction),
    GachaponAction(GachaponAction),
    ListSelection(ListSelection),
    AskNumber(AskNumber),
    AskStyle(AskStyle),
    AskSlideMenu(AskSlideMenu),
}

impl StateKind {
    /// Label matching the wire `stateType`.
    pub fn label(&self) -> &'static str {
        match self {
            StateKind::Dialogue(_) => "dialogue",
            StateKind::GenericAction(_) => "genericAction",
            StateKind::CraftAction(_) => "craftAction",
            StateKind::TransportAction(_) => "transportAction",
            StateKind::GachaponAction(_) => "gachaponAction",
            StateKind::ListSelection(_) => "listSelection",
            StateKind::AskNumber(_) => "askNumber",
            StateKind::AskStyle(_) => "askStyle",
            StateKind::AskSlideMenu(_) => "askSlideMenu",
        }
    }

    /// States that hand control to a saga and wait for its outcome.
    pub fn suspends(&self) -> bool {
        matches!(
            self,
            StateKind::CraftAction(_) | StateKind::TransportAction(_) | StateKind::GachaponAction(_)
        )
    }

    fn transitions(&self) -> Vec<&str> {
        fn choices(choices: &[Choice]) -> Vec<&str> {
            choices.iter().map(|c| c.next_state.as_str()).collect()
        }

        match self {
            StateKind::Dialogue(d) => choices(&d.choices),
            StateKind::ListSelection(l) => choices(&l.choices),
            StateKind::AskSlideMenu(m) => choices(&m.choices),
            StateKind::AskNumber(n) => vec![n.next_state.as_str()],
            StateKind::AskStyle(s) => vec![s.next_state.as_str()],
            StateKind::GenericAction(g) => g.outcomes.iter().map(|o| o.next_state.as_str()).collect(),
            StateKind::CraftAction(c) => vec![
                c.success_state.as_str(),
                c.failure_state.as_str(),
                c.missing_materials_state.as_str(),
            ],
            StateKind::TransportAction(t) => [
                Some(t.failure_state.as_str()),
                t.capacity_full_state.as_deref(),
                t.already_in_transit_state.as_deref(),
                t.route_not_found_state.as_deref(),
                t.service_error_state.as_deref(),
            ]
            .into_iter()
            .flatten()
            .collect(),
            StateKind::GachaponAction(g) => vec![g.failure_state.as_str()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DialogueType {
    SendOk,
    SendYesNo,
    SendNext,
    SendNextPrev,
    SendPrev,
    SendAcceptDecline,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Choice {
    pub text: String,
    pub next_state: String,
    /// Scratch values written when the choice is taken.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl Choice {
    pub fn new(text: impl Into<String>, next_state: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            next_state: next_state.into(),
            context: BTreeMap::new(),
        }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Text prompt. The client's action byte indexes `choices`; a dialogue
/// without choices is shown once and ends the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dialogue {
    pub dialogue_type: DialogueType,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default)]
    pub end_chat: bool,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListSelection {
    pub title: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskNumber {
    pub text: String,
    #[serde(default)]
    pub default_value: u32,
    #[serde(default)]
    pub min_value: u32,
    pub max_value: u32,
    pub context_key: String,
    pub next_state: String,
}

/// Avatar style picker. Styles come inline or from a comma-separated
/// scratch value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskStyle {
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub styles: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub styles_context_key: Option<String>,
    pub context_key: String,
    pub next_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskSlideMenu {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub menu_type: u32,
    pub context_key: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub operation_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    pub condition_type: String,
    pub operator: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    pub next_state: String,
}

/// Runs operations, then follows the first outcome whose conditions all
/// hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenericAction {
    #[serde(default)]
    pub operations: Vec<Operation>,
    pub outcomes: Vec<Outcome>,
}

/// Consumes materials and mesos and awards an item. `item_id` may hold a
/// `{context.key}` placeholder; the scratch value `quantity` multiplies
/// every amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CraftAction {
    pub item_id: String,
    #[serde(default)]
    pub materials: Vec<u32>,
    #[serde(default)]
    pub quantities: Vec<u32>,
    #[serde(default)]
    pub meso_cost: u32,
    pub success_state: String,
    pub failure_state: String,
    pub missing_materials_state: String,
}

/// Charges a fare and warps the character to `map_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportAction {
    pub route_name: String,
    pub map_id: u32,
    #[serde(default)]
    pub portal_id: u32,
    #[serde(default)]
    pub fare: u32,
    #[serde(default = "default_currency")]
    pub currency_type: u32,
    pub failure_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_full_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub already_in_transit_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_not_found_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_error_state: Option<String>,
}

fn default_currency() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GachaponAction {
    pub gachapon_id: String,
    pub ticket_item_id: u32,
    pub failure_state: String,
}
