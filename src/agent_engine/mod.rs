//! Single-model agent loop: context, step strategies and the run driver.

pub mod context;
pub mod engine;
pub mod event_bus;
pub mod events;
pub mod glm;
pub mod history;
pub mod loop_control;
pub mod state;
pub mod step;
pub mod tool_call;

pub use engine::{AgentKind, CancelHandle, PhoneAgent};
pub use events::{AgentEvent, StepResult};
pub use state::{AgentState, RunOutcome};
