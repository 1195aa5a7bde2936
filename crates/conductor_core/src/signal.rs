//! Control-flow signals returned by actions.

use std::fmt;

/// Outcome of one action invocation as seen by its block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Signal {
    /// Move on to the next action
    #[default]
    Continue,
    /// Halt the whole run
    Stop,
    /// Leave the enclosing loop
    BreakLoop,
    /// Skip the rest of the current loop pass
    NextLoop,
    /// Go to the action at this position of the same block
    JumpTo(usize),
}

impl Signal {
    /// Does this signal end the current block pass?
    #[must_use]
    pub const fn terminates_block(self) -> bool {
        matches!(self, Self::Stop | Self::BreakLoop | Self::NextLoop)
    }

    /// Is this the default continue?
    #[must_use]
    pub const fn is_continue(self) -> bool {
        matches!(self, Self::Continue)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => write!(f, "continue"),
            Self::Stop => write!(f, "stop"),
            Self::BreakLoop => write!(f, "break-loop"),
            Self::NextLoop => write!(f, "next-loop"),
            Self::JumpTo(idx) => write!(f, "jump-to #{}", idx),
        }
    }
}
