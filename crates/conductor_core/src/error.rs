//! Error taxonomy for the action engine.
//!
//! Three families matter to callers:
//! - configuration errors, which abort a run and are never retried,
//! - resource errors raised by drivers while acquiring or releasing handles,
//! - action errors raised by user logic.
//!
//! Business failures (an action returning `false`) are not errors at all;
//! they travel through the signal contract instead.

use crate::usage::{DbAccessType, DbUsage};

/// Engine result type
pub type EngineResult<T> = Result<T, EngineError>;

/// Failure reported by a database driver, transaction coordinator or messaging setup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResourceError {
    /// A handle could not be acquired
    #[error("Unable to acquire {access:?} db handle: {reason}")]
    Acquire {
        /// Requested access level
        access: DbAccessType,
        /// Driver supplied reason
        reason: String,
    },

    /// A statement failed
    #[error("Statement failed: {0}")]
    Statement(String),

    /// Commit failed
    #[error("Commit failed: {0}")]
    Commit(String),

    /// Rollback failed
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// Releasing the handle failed
    #[error("Release failed: {0}")]
    Release(String),

    /// External transaction could not be started
    #[error("Unable to begin external transaction: {0}")]
    Begin(String),

    /// Messaging session problems
    #[error("Messaging failure: {0}")]
    Messaging(String),

    /// Requested schema is not known to the driver
    #[error("Schema {0} is not defined for the driver")]
    UnknownSchema(String),
}

/// Engine error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    /// Two actions of the same block share a name
    #[error("Block {block} has actions with duplicate action name {name} at action nbr {position}")]
    DuplicateActionName {
        /// Owning block or processor
        block: String,
        /// Offending name
        name: String,
        /// 1-based position of the second occurrence
        position: usize,
    },

    /// A jump names an action that is not in the same block
    #[error("Action {action} requested to jump to {target} but that is not a valid name of any action within its block")]
    JumpTargetNotFound {
        /// Action carrying the directive
        action: String,
        /// Requested target
        target: String,
    },

    /// A loop body tried to leave its loop through a jump
    #[error("Action inside loop {loop_name} is signalling a jump to an action outside the loop")]
    JumpOutOfLoop {
        /// Loop action name
        loop_name: String,
    },

    /// NEXT_LOOP used where no loop encloses the action
    #[error("Action {action} signals next-loop but it is not inside a loop")]
    NextLoopOutsideLoop {
        /// Offending action
        action: String,
    },

    /// Sub-processor cannot work with the handle it was given
    #[error("Processor {processor} uses db as {declared:?} but the caller holds a handle of type {handle:?}")]
    UsageMismatch {
        /// Called processor
        processor: String,
        /// Its declared usage
        declared: DbUsage,
        /// Access type of the caller's handle, if any
        handle: Option<DbAccessType>,
    },

    /// A db action has no handle and may not acquire one
    #[error("Action {action} requires db access but no db handle is available")]
    MissingDbResource {
        /// Offending action
        action: String,
    },

    /// Declared usage of an action does not fit its processor
    #[error("Action {action} needs db usage {child:?} which is not compatible with processor usage {parent:?}")]
    IncompatibleUsage {
        /// Offending action
        action: String,
        /// Processor usage
        parent: DbUsage,
        /// Action usage
        child: DbUsage,
    },

    /// A condition expression failed to compile
    #[error("Action {action} has an invalid condition '{expression}': {reason}")]
    InvalidCondition {
        /// Owning action
        action: String,
        /// Source text
        expression: String,
        /// Compiler message
        reason: String,
    },

    /// A condition failed to evaluate at run time
    #[error("Error while evaluating '{expression}': {reason}")]
    Evaluation {
        /// Source text
        expression: String,
        /// Evaluator message
        reason: String,
    },

    /// A referenced component is not registered
    #[error("{kind} {name} is not registered")]
    UnknownComponent {
        /// Kind of component (logic, processor, message)
        kind: String,
        /// Requested name
        name: String,
    },

    /// A definition is internally inconsistent
    #[error("Invalid definition for {component}: {reason}")]
    InvalidDefinition {
        /// Component name
        component: String,
        /// What is wrong
        reason: String,
    },

    /// A loop tried to iterate a sheet an enclosing loop is already iterating
    #[error("Data sheet {sheet} is already iterating as part of an enclosing loop action")]
    SheetAlreadyIterating {
        /// Sheet name
        sheet: String,
    },

    /// Driver level failure
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// User logic raised an error
    #[error("Action {action} failed: {reason}")]
    ActionFailed {
        /// Action name
        action: String,
        /// Error text
        reason: String,
    },

    /// A parallel child panicked
    #[error("Parallel action {action} panicked: {reason}")]
    ActionPanicked {
        /// Child action name
        action: String,
        /// Panic payload, when it was a string
        reason: String,
    },

    /// One or more parallel children failed
    #[error("{} parallel action(s) failed: {}", .0.len(), join_errors(.0))]
    Parallel(Vec<EngineError>),
}

impl EngineError {
    /// Is this a declarative configuration error?
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::DuplicateActionName { .. }
            | Self::JumpTargetNotFound { .. }
            | Self::JumpOutOfLoop { .. }
            | Self::NextLoopOutsideLoop { .. }
            | Self::UsageMismatch { .. }
            | Self::MissingDbResource { .. }
            | Self::IncompatibleUsage { .. }
            | Self::InvalidCondition { .. }
            | Self::UnknownComponent { .. }
            | Self::InvalidDefinition { .. }
            | Self::SheetAlreadyIterating { .. } => true,
            Self::Parallel(errors) => errors.iter().any(Self::is_configuration),
            _ => false,
        }
    }

    /// Is this a driver failure?
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Shorthand for a logic failure
    pub fn action_failed(action: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ActionFailed {
            action: action.into(),
            reason: reason.to_string(),
        }
    }
}

fn join_errors(errors: &[EngineError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::JumpTargetNotFound {
            action: "a".to_string(),
            target: "zz".to_string(),
        };
        assert!(err.to_string().contains("zz"));

        let err = EngineError::DuplicateActionName {
            block: "svc".to_string(),
            name: "dup".to_string(),
            position: 3,
        };
        assert_eq!(
            err.to_string(),
            "Block svc has actions with duplicate action name dup at action nbr 3"
        );
    }

    #[test]
    fn test_classification() {
        assert!(EngineError::JumpOutOfLoop { loop_name: "l".to_string() }.is_configuration());
        assert!(!EngineError::action_failed("x", "boom").is_configuration());

        let err = EngineError::from(ResourceError::Commit("disk".to_string()));
        assert!(err.is_resource());
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_parallel_aggregate() {
        let err = EngineError::Parallel(vec![
            EngineError::action_failed("a", "one"),
            EngineError::action_failed("b", "two"),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 parallel action(s) failed"));
        assert!(text.contains("one"));
        assert!(text.contains("two"));
    }
}
