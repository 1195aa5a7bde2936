//! Conductor Planning
//!
//! Declarative processor and action definitions, the name scopes jumps are
//! bound against, expression conditions, engine configuration and a
//! validator that reports every design problem of a processor at once.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod condition;
pub mod config;
pub mod scope;
pub mod spec;
pub mod target;
pub mod validate;

pub use condition::Condition;
pub use config::EngineConfig;
pub use scope::{default_action_name, BlockScope};
pub use spec::{ActionHeader, ActionKind, ActionSpec, DefinitionSet, ProcessorSpec};
pub use target::JumpTarget;
pub use validate::{ComponentLookup, Severity, ValidationMessage, ValidationReport, Validator};
