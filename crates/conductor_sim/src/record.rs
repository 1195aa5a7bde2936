//! Recording of every resource operation for later assertions.

use conductor_core::{DbAccessType, MessagingUsage};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One operation performed against a simulated resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ResourceEvent {
    /// A db handle was handed out
    Acquire {
        /// Handle number
        handle: u64,
        /// Access level
        access: DbAccessType,
        /// Schema, `None` for default
        schema: Option<String>,
    },
    /// A statement ran on a handle
    Execute {
        /// Handle number
        handle: u64,
        /// Statement text
        statement: String,
    },
    /// A handle committed
    Commit {
        /// Handle number
        handle: u64,
    },
    /// A handle rolled back
    Rollback {
        /// Handle number
        handle: u64,
    },
    /// A handle went back to the driver
    Release {
        /// Handle number
        handle: u64,
    },
    /// An external transaction started
    BeginExternal,
    /// The external transaction committed
    CommitExternal,
    /// The external transaction rolled back
    RollbackExternal,
    /// A messaging session was borrowed
    Borrow {
        /// Requested usage
        usage: MessagingUsage,
    },
    /// A payload was sent
    Send {
        /// Destination
        destination: String,
        /// Payload
        payload: serde_json::Value,
    },
    /// A messaging session was returned
    Return {
        /// Whether its work is to be kept
        success: bool,
    },
}

impl ResourceEvent {
    /// Handle number for db handle operations
    #[must_use]
    pub fn handle(&self) -> Option<u64> {
        match self {
            Self::Acquire { handle, .. }
            | Self::Execute { handle, .. }
            | Self::Commit { handle }
            | Self::Rollback { handle }
            | Self::Release { handle } => Some(*handle),
            _ => None,
        }
    }
}

/// Shared, append-only list of resource events
#[derive(Debug, Clone, Default)]
pub struct ResourceLedger {
    events: Arc<Mutex<Vec<ResourceEvent>>>,
}

impl ResourceLedger {
    /// Create an empty ledger
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event
    pub fn record(&self, event: ResourceEvent) {
        tracing::trace!(?event, "resource event");
        self.lock().push(event);
    }

    /// Copy of all events so far
    #[must_use]
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.lock().clone()
    }

    /// Number of events matching `pred`
    #[must_use]
    pub fn count(&self, pred: impl Fn(&ResourceEvent) -> bool) -> usize {
        self.lock().iter().filter(|e| pred(e)).count()
    }

    /// Handles acquired
    #[must_use]
    pub fn acquires(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::Acquire { .. }))
    }

    /// Handle commits
    #[must_use]
    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::Commit { .. }))
    }

    /// Handle rollbacks
    #[must_use]
    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::Rollback { .. }))
    }

    /// Handle releases
    #[must_use]
    pub fn releases(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::Release { .. }))
    }

    /// Access levels of acquired handles, in order
    #[must_use]
    pub fn acquired_access(&self) -> Vec<DbAccessType> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ResourceEvent::Acquire { access, .. } => Some(*access),
                _ => None,
            })
            .collect()
    }

    /// Payloads sent to `destination`
    #[must_use]
    pub fn sent_to(&self, destination: &str) -> Vec<serde_json::Value> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ResourceEvent::Send {
                    destination: d,
                    payload,
                } if d == destination => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    /// Statements executed, in order
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .iter()
            .filter_map(|e| match e {
                ResourceEvent::Execute { statement, .. } => Some(statement.clone()),
                _ => None,
            })
            .collect()
    }

    /// Forget everything recorded
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Serialize to JSON
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(&*self.lock()).unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ResourceEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
