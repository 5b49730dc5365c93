pub mod actions;
pub mod agent_engine;
pub mod config;
pub mod device;
pub mod dual_model;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod prompts;

pub use actions::{Action, DeviceAction};
pub use agent_engine::{AgentEvent, AgentKind, AgentState, CancelHandle, PhoneAgent, RunOutcome, StepResult};
pub use dual_model::{DualModelAgent, DualModelEvent};
pub use errors::{AutoGlmError, AutoGlmResult};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the default
/// `info` filter. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}
