//! Conductor Runtime
//!
//! Executes prepared processors: the block interpreter with named jumps,
//! sheet and condition loops, parallel blocks, db-bound actions and the
//! transaction processor that owns db handles, external transactions and
//! messaging sessions for the duration of a run.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod block;
pub mod builder;
pub mod builtin;
pub mod catalog;
pub mod db;
pub mod logic;
pub mod looping;
pub mod monitor;
pub mod parallel;
pub mod processor;

pub use action::{Action, ActionHeader, Body, Container, Invocation, MessageTemplate, Operand, Work};
pub use block::{ActionBlock, NestedBlock};
pub use builder::Preparer;
pub use catalog::ComponentCatalog;
pub use db::{DbAction, DbLogicWork, DbWork, ExecuteSqlWork};
pub use logic::{DbLogic, FnDbLogic, FnLogic, Logic};
pub use looping::{FieldSelection, LoopAction, LoopMode};
pub use monitor::{Metrics, RunMetrics};
pub use parallel::SynchronizeAction;
pub use processor::{RunReport, ServiceCall, TransactionProcessor};
