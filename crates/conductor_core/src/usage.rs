//! Resource usage policies for processors and db-bound actions.

use serde::{Deserialize, Serialize};

/// How a processor (or a db action) uses the relational database
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbUsage {
    /// No db access at all
    #[default]
    None,
    /// Reads only
    ReadOnly,
    /// Reads and writes inside one transaction owned by the processor
    ReadWrite,
    /// Reads and writes inside an externally coordinated transaction
    External,
    /// The processor does not acquire a handle; db actions manage their own
    Delegated,
}

impl DbUsage {
    /// Access level to request from the driver, `None` when no handle is needed at this level
    #[must_use]
    pub const fn access_type(self) -> Option<DbAccessType> {
        match self {
            Self::None | Self::Delegated => None,
            Self::ReadOnly => Some(DbAccessType::ReadOnly),
            Self::ReadWrite => Some(DbAccessType::ReadWrite),
            Self::External => Some(DbAccessType::ExternallyManaged),
        }
    }

    /// Does this usage write to the db?
    #[must_use]
    pub const fn updates_db(self) -> bool {
        matches!(self, Self::ReadWrite | Self::External)
    }

    /// Can an action with usage `child` run under a processor declaring `self`?
    #[must_use]
    pub const fn can_host(self, child: DbUsage) -> bool {
        match self {
            Self::None => false,
            Self::ReadOnly => matches!(child, Self::ReadOnly),
            Self::ReadWrite | Self::External => matches!(child, Self::ReadOnly | Self::ReadWrite),
            Self::Delegated => !matches!(child, Self::None),
        }
    }
}

/// Access level of an acquired handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbAccessType {
    /// Read-only, no updates
    ReadOnly,
    /// Read-write within a single transaction committed or rolled back at the end
    ReadWrite,
    /// Read-write, the transaction boundary is owned by an external coordinator
    ExternallyManaged,
}

impl DbAccessType {
    /// Can this handle be used for updates?
    #[must_use]
    pub const fn updates_db(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }

    /// Does the holder commit/rollback on this handle itself?
    #[must_use]
    pub const fn is_transactional(self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// How a processor uses the messaging layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagingUsage {
    /// A session is used without transaction semantics
    Shared,
    /// The processor commits/rolls back its session
    ServiceManaged,
    /// An external coordinator owns the session transaction
    ExternallyManaged,
}

impl MessagingUsage {
    /// Must a processor with this usage manage its own resources even as a sub-processor?
    #[must_use]
    pub const fn requires_independent_management(self) -> bool {
        matches!(self, Self::ServiceManaged | Self::ExternallyManaged)
    }
}

/// Does `handle_schema` satisfy a requested `schema`? Absent means the default schema.
#[must_use]
pub fn schema_matches(requested: Option<&str>, handle_schema: Option<&str>) -> bool {
    match (requested, handle_schema) {
        (None, None) => true,
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => false,
    }
}
