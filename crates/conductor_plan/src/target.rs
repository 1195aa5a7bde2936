//! Jump directives as written in definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved directive: end the run
pub const STOP: &str = "_stop";
/// Reserved directive: leave the innermost loop
pub const BREAK_LOOP: &str = "_break";
/// Reserved directive: start the next pass of the innermost loop
pub const NEXT_LOOP: &str = "_next";

/// Parsed jump directive, before it is bound to a block
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JumpTarget {
    /// End the run
    Stop,
    /// Leave the innermost loop
    BreakLoop,
    /// Next pass of the innermost loop
    NextLoop,
    /// Named action in the same block
    Action(String),
}

impl JumpTarget {
    /// Parse a directive. The short forms `_s`, `_b` and `_n` are accepted
    /// as well as the long ones.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        match text.trim() {
            STOP | "_s" => Self::Stop,
            BREAK_LOOP | "_b" => Self::BreakLoop,
            NEXT_LOOP | "_n" => Self::NextLoop,
            name => Self::Action(name.to_string()),
        }
    }

    /// Is this one of the reserved directives?
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        !matches!(self, Self::Action(_))
    }
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str(STOP),
            Self::BreakLoop => f.write_str(BREAK_LOOP),
            Self::NextLoop => f.write_str(NEXT_LOOP),
            Self::Action(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reserved() {
        assert_eq!(JumpTarget::parse("_stop"), JumpTarget::Stop);
        assert_eq!(JumpTarget::parse("_s"), JumpTarget::Stop);
        assert_eq!(JumpTarget::parse("_b"), JumpTarget::BreakLoop);
        assert_eq!(JumpTarget::parse(" _next "), JumpTarget::NextLoop);
        assert!(JumpTarget::parse("_n").is_reserved());
    }

    #[test]
    fn test_parse_name() {
        let target = JumpTarget::parse("checkout");
        assert_eq!(target, JumpTarget::Action("checkout".to_string()));
        assert!(!target.is_reserved());
        assert_eq!(target.to_string(), "checkout");
    }
}
