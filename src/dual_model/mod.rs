//! Decision/vision split: a text model plans and picks each step while a
//! vision model describes the screen and performs the chosen action.

pub mod agent;
pub mod decision;
pub mod protocols;
pub mod vision;

pub use agent::{DualModelAgent, StateHandle};
pub use decision::DecisionModel;
pub use protocols::{
    Decision, DecisionAction, DualModelEvent, DualModelPayload, DualModelState, ExecutionResult,
    ModelRole, ModelStage, ScreenDescription, TaskPlan,
};
pub use vision::VisionModel;
