use tokio_util::sync::CancellationToken;

/// What the run loop should do before starting the next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopDecision {
    Continue,
    Cancelled,
    MaxStepsReached,
}

/// Step budget and cancellation check shared by both agent flavours.
#[derive(Debug, Clone, Copy)]
pub struct LoopController {
    max_steps: u32,
}

impl LoopController {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps }
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    /// Cancellation wins over an exhausted budget.
    pub fn check(&self, steps_done: u32, cancel: &CancellationToken) -> LoopDecision {
        if cancel.is_cancelled() {
            LoopDecision::Cancelled
        } else if steps_done >= self.max_steps {
            LoopDecision::MaxStepsReached
        } else {
            LoopDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_and_cancellation() {
        let ctrl = LoopController::new(3);
        let token = CancellationToken::new();
        assert_eq!(ctrl.check(2, &token), LoopDecision::Continue);
        assert_eq!(ctrl.check(3, &token), LoopDecision::MaxStepsReached);
        token.cancel();
        assert_eq!(ctrl.check(3, &token), LoopDecision::Cancelled);
    }
}
