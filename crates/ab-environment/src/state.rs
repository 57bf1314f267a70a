/// The environment lifecycle phases (spec §4.3 state diagram), tracked by
/// every [`crate::Environment`] implementation through an embedded
/// [`StateMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninit,
    Ready,
    Running,
}

use crate::error::{EnvResult, EnvironmentError};

/// Enforces `enter_context -> setup -> run -> teardown -> exit_context`
/// ordering and idempotency so each concrete `Environment` only needs to
/// embed one of these rather than re-deriving the rules.
#[derive(Debug, Default)]
pub struct StateMachine {
    in_context: bool,
    phase: Option<Phase>,
    last_setup_hash: Option<String>,
}

impl StateMachine {
    pub fn new() -> Self {
        StateMachine::default()
    }

    pub fn is_in_context(&self) -> bool {
        self.in_context
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phase
    }

    /// Idempotent: entering an already-entered context is a no-op.
    pub fn enter_context(&mut self) {
        if !self.in_context {
            self.in_context = true;
            self.phase = Some(Phase::Uninit);
        }
    }

    /// Idempotent, and guaranteed to run on every exit path by callers
    /// (panics are caught at the Trial Runner boundary, not here).
    pub fn exit_context(&mut self) {
        self.in_context = false;
        self.phase = None;
        self.last_setup_hash = None;
    }

    fn require_in_context(&self, op: &str) -> EnvResult<()> {
        if self.in_context {
            Ok(())
        } else {
            Err(EnvironmentError::InvalidState {
                expected: "entered context".to_string(),
                actual: format!("not in context ({op})"),
            })
        }
    }

    /// Returns `true` if `setup` with the same tunable hash is a no-op
    /// because the environment is already `Ready` from an identical prior
    /// call.
    pub fn begin_setup(&mut self, hash: &str) -> EnvResult<bool> {
        self.require_in_context("setup")?;
        Ok(self.phase == Some(Phase::Ready) && self.last_setup_hash.as_deref() == Some(hash))
    }

    pub fn mark_ready(&mut self, hash: String) {
        self.phase = Some(Phase::Ready);
        self.last_setup_hash = Some(hash);
    }

    pub fn require_ready(&self, op: &str) -> EnvResult<()> {
        self.require_in_context(op)?;
        if self.phase == Some(Phase::Ready) {
            Ok(())
        } else {
            Err(EnvironmentError::InvalidState {
                expected: "Ready".to_string(),
                actual: format!("{:?} ({op})", self.phase),
            })
        }
    }

    pub fn mark_running(&mut self) {
        self.phase = Some(Phase::Running);
    }

    pub fn mark_ready_after_run(&mut self) {
        // a run leaves the environment Ready again for polling/teardown
        self.phase = Some(Phase::Ready);
    }

    /// Idempotent: tearing down a non-Ready environment (or one already
    /// torn down) is a no-op, returning to Uninit-in-context.
    pub fn teardown(&mut self) {
        self.phase = Some(Phase::Uninit);
        self.last_setup_hash = None;
    }
}
