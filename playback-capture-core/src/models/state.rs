use super::error::PipelineError;

/// Pipeline state machine.
///
/// State transitions:
/// ```text
/// idle → capturing → draining → stopped
///   ↓        ↓           ↓
///   └────────┴───────────┴──→ failed
/// ```
/// `stop()` from idle goes straight to stopped without touching any resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PipelineState {
    #[default]
    Idle,
    Capturing,
    Draining,
    Stopped,
    Failed(PipelineError),
}

impl PipelineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    /// Capturing or draining: the worker still owns the codec and container.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Capturing | Self::Draining)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Failed(_) => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(PipelineState::Stopped.is_terminal());
        assert!(PipelineState::Failed(PipelineError::Write("x".into())).is_terminal());
        assert!(!PipelineState::Draining.is_terminal());
        assert!(PipelineState::Draining.is_running());
        assert!(!PipelineState::Idle.is_running());
    }
}
