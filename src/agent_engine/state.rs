use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::agent_engine::context::ConversationContext;

/// Lifecycle of a phone agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Finished,
    Aborted,
    MaxStepsReached,
    DeviceError,
    ModelError,
}

impl AgentState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, AgentState::Idle | AgentState::Running)
    }
}

/// Final report of a run that was not cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub state: AgentState,
    pub success: bool,
    pub message: String,
    pub steps: u32,
}

#[derive(Debug)]
struct Lifecycle {
    running: bool,
    state: AgentState,
}

/// Running flag and lifecycle state, shared with the [`RunGuard`] of the
/// run in flight.
#[derive(Debug, Clone)]
pub struct RunStatus {
    inner: Arc<Mutex<Lifecycle>>,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Lifecycle {
                running: false,
                state: AgentState::Idle,
            })),
        }
    }
}

impl RunStatus {
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn state(&self) -> AgentState {
        self.lock().state
    }

    /// Mark a run as started. The returned guard ends it.
    pub fn begin(&self) -> RunGuard {
        let mut l = self.lock();
        l.running = true;
        l.state = AgentState::Running;
        RunGuard {
            status: self.clone(),
        }
    }

    fn set_idle(&self) {
        let mut l = self.lock();
        l.running = false;
        l.state = AgentState::Idle;
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Clears the running flag when the run ends, however it ends.
///
/// A run future dropped before it reported a final state is left `Aborted`.
pub struct RunGuard {
    status: RunStatus,
}

impl RunGuard {
    pub fn finish(self, state: AgentState) {
        self.status.lock().state = state;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut l = self.status.lock();
        l.running = false;
        if l.state == AgentState::Running {
            l.state = AgentState::Aborted;
        }
    }
}

/// Mutable state of one agent. Survives across runs until [`RunState::reset`].
#[derive(Debug, Clone)]
pub struct RunState {
    pub step_count: u32,
    pub status: RunStatus,
    pub context: ConversationContext,
}

impl RunState {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            step_count: 0,
            status: RunStatus::default(),
            context: ConversationContext::new(system_prompt),
        }
    }

    /// Back to a single system turn and zero steps.
    pub fn reset(&mut self) {
        self.step_count = 0;
        self.status.set_idle();
        self.context.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_records_final_state() {
        let status = RunStatus::default();
        let guard = status.begin();
        assert!(status.is_running());
        assert_eq!(status.state(), AgentState::Running);
        guard.finish(AgentState::Finished);
        assert!(!status.is_running());
        assert_eq!(status.state(), AgentState::Finished);
    }

    #[test]
    fn dropped_guard_leaves_run_aborted() {
        let status = RunStatus::default();
        drop(status.begin());
        assert!(!status.is_running());
        assert_eq!(status.state(), AgentState::Aborted);
    }

    #[test]
    fn reset_returns_to_idle() {
        let mut run = RunState::new("sys");
        run.step_count = 3;
        drop(run.status.begin());
        run.reset();
        assert_eq!(run.step_count, 0);
        assert_eq!(run.status.state(), AgentState::Idle);
        assert_eq!(run.context.len(), 1);
    }
}
