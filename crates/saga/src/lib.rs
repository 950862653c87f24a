//! Saga orchestration for multi-service state transitions.
//!
//! A saga is an ordered list of steps, each an [`Action`] with its payload.
//! The [`Orchestrator`] publishes one step's command at a time, correlates
//! the leaf service's status event by transaction id, and either advances
//! to the next step or walks the completed prefix in reverse dispatching
//! each step's inverse. Terminal outcomes are broadcast on `saga.status`
//! and handed to registered [`ResumptionHook`]s.

pub mod action;
pub mod consumers;
pub mod error;
pub mod events;
pub mod hook;
pub mod model;
pub mod orchestrator;
pub mod request;
pub mod state;
pub mod table;

pub use action::{Action, Payload};
pub use error::{Result, SagaError};
pub use events::{SagaOutcome, SagaStatusBody, SagaStatusEvent};
pub use hook::ResumptionHook;
pub use model::{Move, Saga, SagaBuilder, SagaType, Step, StepError, Terminal};
pub use orchestrator::{Correlation, Orchestrator, OrchestratorConfig};
pub use request::{CreateSagaRequest, SagaAccepted, StepRequest};
pub use state::StepStatus;
pub use table::{ActionSpec, Verdict};
