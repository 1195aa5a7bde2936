//! Conductor Core Types
//!
//! Values, sheets, messages and the shared execution context, plus the
//! signal, usage-policy and resource contracts the engine is built on.
//! This crate performs no I/O of its own.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod error;
pub mod message;
pub mod resource;
pub mod sheet;
pub mod signal;
pub mod usage;
pub mod value;

// Re-exports
pub use context::{ExecutionContext, IterationGuard};
pub use error::{EngineError, EngineResult, ResourceError};
pub use message::{Message, MessageDef, MessageKind};
pub use resource::{
    DbDriver, DbHandle, MessagingSession, MessagingSetup, Resources, TransactionCoordinator,
};
pub use sheet::Sheet;
pub use signal::Signal;
pub use usage::{schema_matches, DbAccessType, DbUsage, MessagingUsage};
pub use value::Value;
