//! NPC conversation runtime.
//!
//! Each NPC owns a [`ConversationGraph`] of named states. The
//! [`ConversationRuntime`] walks a character through it: interactive states
//! render a dialogue window and wait for input, local states branch on the
//! scratch map, and action states (craft, transport, gachapon) create a saga
//! and suspend the conversation until the saga ends. A terminal saga
//! outcome, delivered by an orchestrator hook or by `saga.status`, routes
//! the conversation to its success or most specific failure state.

pub mod actions;
pub mod consumers;
pub mod context;
pub mod error;
pub mod model;
pub mod placeholder;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod saga_port;
pub mod sender;

pub use context::{ConversationContext, ConversationContextBuilder};
pub use error::{ConversationError, Result};
pub use model::{ConversationGraph, State, StateKind};
pub use registry::{ConversationCatalog, ConversationRegistry};
pub use runtime::{ConversationRuntime, RuntimeConfig, Selection};
pub use saga_port::{RestSagaCreator, SagaCreator};
pub use sender::{BusDialogueSender, DialogueSender, Talk, TalkKind};
