//! Declarative definitions of processors and their actions.
//!
//! These are plain serde structures as delivered by the component loader.
//! They carry no behaviour; the runtime prepares them into executable actions.

use crate::config::EngineConfig;
use conductor_core::{DbUsage, MessageDef, MessagingUsage};
use serde::{Deserialize, Serialize};

/// Attributes common to every action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionHeader {
    /// Unique name within the block, `_a<index>` when absent
    pub name: Option<String>,
    /// Pre-condition over the context fields
    pub execute_on_condition: Option<String>,
    /// Run only if this sheet has at least one row
    pub execute_if_rows_in_sheet: Option<String>,
    /// Run only if this sheet is absent or empty
    pub execute_if_no_rows_in_sheet: Option<String>,
    /// Message to add on success
    pub success_message: Option<String>,
    /// Parameters for the success message; `$name` refers to a field
    pub success_message_parameters: Vec<String>,
    /// Message to add on failure
    pub failure_message: Option<String>,
    /// Parameters for the failure message; `$name` refers to a field
    pub failure_message_parameters: Vec<String>,
    /// Stop the run when the added message is an error
    pub stop_if_message_is_error: bool,
    /// Action name or `_stop`/`_break`/`_next` to go to on success
    pub on_success_jump_to: Option<String>,
    /// Action name or `_stop`/`_break`/`_next` to go to on failure
    pub on_failure_jump_to: Option<String>,
}

impl ActionHeader {
    /// Does the action declare anything to do after its work?
    #[must_use]
    pub fn requires_post_processing(&self) -> bool {
        self.success_message.is_some()
            || self.failure_message.is_some()
            || self.on_success_jump_to.is_some()
            || self.on_failure_jump_to.is_some()
            || self.stop_if_message_is_error
    }
}

/// Type specific part of an action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Set a field from a literal, another field (`$name`) or an expression
    SetValue {
        /// Field to set
        field_name: String,
        /// Literal or `$field`
        #[serde(default)]
        field_value: Option<String>,
        /// Expression over fields
        #[serde(default)]
        expression: Option<String>,
    },
    /// Remove a field; `$name` removes the field named by that field's value
    RemoveValue {
        /// Field to remove
        field_name: String,
    },
    /// Rename a sheet
    RenameSheet {
        /// Current name
        sheet_name: String,
        /// New name
        new_sheet_name: String,
    },
    /// Add a catalog message
    AddMessage {
        /// Message id
        message_id: String,
        /// Parameters; `$name` refers to a field
        #[serde(default)]
        parameters: Vec<String>,
    },
    /// Registered business logic
    Logic {
        /// Registered logic name
        logic_name: String,
    },
    /// Registered business logic that needs a db handle
    DbLogic {
        /// Registered logic name
        logic_name: String,
        /// Usage of the logic
        db_usage: DbUsage,
        /// Schema to use when acquiring its own handle
        #[serde(default)]
        schema_name: Option<String>,
    },
    /// Run a statement through the db handle
    ExecuteSql {
        /// Statement text, `?` marks a parameter
        statement: String,
        /// Parameters; `$name` refers to a field, anything else is a literal
        #[serde(default)]
        parameters: Vec<String>,
        /// Run once per row of this sheet, parameters naming its columns
        #[serde(default)]
        input_sheet_name: Option<String>,
        /// Usage of the statement
        #[serde(default = "read_write")]
        db_usage: DbUsage,
        /// Schema to use when acquiring its own handle
        #[serde(default)]
        schema_name: Option<String>,
    },
    /// Run another processor as part of this one
    ExecuteService {
        /// Registered processor name
        service_name: String,
    },
    /// Send fields to a messaging destination
    Publish {
        /// Destination name
        destination: String,
        /// Fields to include, all fields when empty
        #[serde(default)]
        fields: Vec<String>,
    },
    /// Nested block of actions
    Block {
        /// Child actions
        actions: Vec<ActionSpec>,
    },
    /// Repeat child actions per sheet row or while the condition holds
    Loop {
        /// Sheet to iterate
        #[serde(default)]
        data_sheet_name: Option<String>,
        /// Columns copied into fields per row, none when absent; `*` for all
        #[serde(default)]
        columns_to_copy_as_fields: Option<Vec<String>>,
        /// Fields copied back into the row after each pass; `*` for all columns
        #[serde(default)]
        fields_to_copy_back_as_columns: Option<Vec<String>>,
        /// End the loop when the run is interrupted
        #[serde(default)]
        break_on_interrupt: bool,
        /// Child actions
        actions: Vec<ActionSpec>,
    },
    /// Run child actions concurrently and wait for all of them
    Synchronize {
        /// Run before fan-out
        #[serde(default)]
        initial_action: Option<Box<ActionSpec>>,
        /// Run after all children finished
        #[serde(default)]
        final_action: Option<Box<ActionSpec>>,
        /// Concurrent children
        actions: Vec<ActionSpec>,
    },
}

impl ActionKind {
    /// Short type name used in logs and diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::SetValue { .. } => "set_value",
            Self::RemoveValue { .. } => "remove_value",
            Self::RenameSheet { .. } => "rename_sheet",
            Self::AddMessage { .. } => "add_message",
            Self::Logic { .. } => "logic",
            Self::DbLogic { .. } => "db_logic",
            Self::ExecuteSql { .. } => "execute_sql",
            Self::ExecuteService { .. } => "execute_service",
            Self::Publish { .. } => "publish",
            Self::Block { .. } => "block",
            Self::Loop { .. } => "loop",
            Self::Synchronize { .. } => "synchronize",
        }
    }

    /// Is this a container of other actions?
    #[must_use]
    pub fn is_block(&self) -> bool {
        matches!(self, Self::Block { .. } | Self::Loop { .. } | Self::Synchronize { .. })
    }
}

fn read_write() -> DbUsage {
    DbUsage::ReadWrite
}

/// One action as declared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    /// Common attributes
    #[serde(flatten)]
    pub header: ActionHeader,
    /// Type specific attributes
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl ActionSpec {
    /// Create an unnamed action
    #[must_use]
    pub fn new(kind: ActionKind) -> Self {
        Self {
            header: ActionHeader::default(),
            kind,
        }
    }

    /// Registered logic
    #[must_use]
    pub fn logic(logic_name: &str) -> Self {
        Self::new(ActionKind::Logic {
            logic_name: logic_name.to_string(),
        })
    }

    /// Registered db logic
    #[must_use]
    pub fn db_logic(logic_name: &str, db_usage: DbUsage) -> Self {
        Self::new(ActionKind::DbLogic {
            logic_name: logic_name.to_string(),
            db_usage,
            schema_name: None,
        })
    }

    /// Literal assignment
    #[must_use]
    pub fn set_value(field_name: &str, field_value: &str) -> Self {
        Self::new(ActionKind::SetValue {
            field_name: field_name.to_string(),
            field_value: Some(field_value.to_string()),
            expression: None,
        })
    }

    /// Statement with field parameters
    #[must_use]
    pub fn execute_sql(statement: &str, parameters: &[&str]) -> Self {
        Self::new(ActionKind::ExecuteSql {
            statement: statement.to_string(),
            parameters: parameters.iter().map(ToString::to_string).collect(),
            input_sheet_name: None,
            db_usage: DbUsage::ReadWrite,
            schema_name: None,
        })
    }

    /// Nested block
    #[must_use]
    pub fn block(actions: Vec<ActionSpec>) -> Self {
        Self::new(ActionKind::Block { actions })
    }

    /// Loop over the rows of a sheet
    #[must_use]
    pub fn loop_over(sheet: &str, actions: Vec<ActionSpec>) -> Self {
        Self::new(ActionKind::Loop {
            data_sheet_name: Some(sheet.to_string()),
            columns_to_copy_as_fields: None,
            fields_to_copy_back_as_columns: None,
            break_on_interrupt: false,
            actions,
        })
    }

    /// Loop while `condition` holds
    #[must_use]
    pub fn loop_while(condition: &str, actions: Vec<ActionSpec>) -> Self {
        Self::new(ActionKind::Loop {
            data_sheet_name: None,
            columns_to_copy_as_fields: None,
            fields_to_copy_back_as_columns: None,
            break_on_interrupt: false,
            actions,
        })
        .when(condition)
    }

    /// Parallel block
    #[must_use]
    pub fn synchronize(actions: Vec<ActionSpec>) -> Self {
        Self::new(ActionKind::Synchronize {
            initial_action: None,
            final_action: None,
            actions,
        })
    }

    /// Call another processor
    #[must_use]
    pub fn execute_service(service_name: &str) -> Self {
        Self::new(ActionKind::ExecuteService {
            service_name: service_name.to_string(),
        })
    }

    /// Set the name
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.header.name = Some(name.to_string());
        self
    }

    /// Set the pre-condition
    #[must_use]
    pub fn when(mut self, condition: &str) -> Self {
        self.header.execute_on_condition = Some(condition.to_string());
        self
    }

    /// Jump target on success
    #[must_use]
    pub fn on_success(mut self, target: &str) -> Self {
        self.header.on_success_jump_to = Some(target.to_string());
        self
    }

    /// Jump target on failure
    #[must_use]
    pub fn on_failure(mut self, target: &str) -> Self {
        self.header.on_failure_jump_to = Some(target.to_string());
        self
    }

    /// Message on success
    #[must_use]
    pub fn with_success_message(mut self, id: &str, params: &[&str]) -> Self {
        self.header.success_message = Some(id.to_string());
        self.header.success_message_parameters = params.iter().map(ToString::to_string).collect();
        self
    }

    /// Message on failure
    #[must_use]
    pub fn with_failure_message(mut self, id: &str, params: &[&str]) -> Self {
        self.header.failure_message = Some(id.to_string());
        self.header.failure_message_parameters = params.iter().map(ToString::to_string).collect();
        self
    }

    /// Stop the run when an emitted message is an error
    #[must_use]
    pub fn stop_on_error_message(mut self) -> Self {
        self.header.stop_if_message_is_error = true;
        self
    }

    /// Display name for diagnostics before a name was assigned
    #[must_use]
    pub fn display_name(&self, index: usize) -> String {
        self.header
            .name
            .clone()
            .unwrap_or_else(|| crate::scope::default_action_name(index))
    }
}

/// A processor as declared: resource usage plus its top-level actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorSpec {
    /// Service name
    pub name: String,
    /// Db usage of the whole run
    #[serde(default)]
    pub db_usage: DbUsage,
    /// Non-default schema
    #[serde(default)]
    pub schema_name: Option<String>,
    /// Messaging usage, `None` when no session is needed
    #[serde(default)]
    pub messaging_usage: Option<MessagingUsage>,
    /// Top-level actions
    pub actions: Vec<ActionSpec>,
}

impl ProcessorSpec {
    /// Create a processor with no db usage
    #[must_use]
    pub fn new(name: &str, actions: Vec<ActionSpec>) -> Self {
        Self {
            name: name.to_string(),
            db_usage: DbUsage::None,
            schema_name: None,
            messaging_usage: None,
            actions,
        }
    }

    /// Set db usage
    #[must_use]
    pub fn with_db_usage(mut self, usage: DbUsage) -> Self {
        self.db_usage = usage;
        self
    }

    /// Set schema
    #[must_use]
    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema_name = Some(schema.to_string());
        self
    }

    /// Set messaging usage
    #[must_use]
    pub fn with_messaging(mut self, usage: MessagingUsage) -> Self {
        self.messaging_usage = Some(usage);
        self
    }
}

/// Everything a definition file may carry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefinitionSet {
    /// Engine configuration
    pub config: EngineConfig,
    /// Message catalog
    pub messages: Vec<MessageDef>,
    /// Processors, in dependency order (callees before callers)
    pub processors: Vec<ProcessorSpec>,
}

impl DefinitionSet {
    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the text is not a valid definition set
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
