//! Design-time checks for processor definitions.
//!
//! The validator walks a whole [`ProcessorSpec`] and collects every
//! diagnostic instead of stopping at the first one. Errors carry the
//! [`EngineError`] the runtime builder would have raised for the same
//! problem.

use crate::condition::Condition;
use crate::scope::BlockScope;
use crate::spec::{ActionKind, ActionSpec, ProcessorSpec};
use conductor_core::{DbUsage, EngineError};
use std::fmt;

/// Severity of a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Prevents the processor from being prepared
    Error,
    /// Probably a design mistake
    Warning,
    /// Worth knowing
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => f.write_str("error"),
            Self::Warning => f.write_str("warning"),
            Self::Info => f.write_str("info"),
        }
    }
}

/// One diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationMessage {
    /// Severity
    pub severity: Severity,
    /// Path of the offending component, `processor/block/action`
    pub component: String,
    /// Human readable text
    pub text: String,
    /// Error raised at prepare time, for error diagnostics
    pub error: Option<EngineError>,
}

impl ValidationMessage {
    fn error(component: &str, error: EngineError) -> Self {
        Self {
            severity: Severity::Error,
            component: component.to_string(),
            text: error.to_string(),
            error: Some(error),
        }
    }

    fn warning(component: &str, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            component: component.to_string(),
            text: text.into(),
            error: None,
        }
    }

    fn info(component: &str, text: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            component: component.to_string(),
            text: text.into(),
            error: None,
        }
    }
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.component, self.text)
    }
}

/// All diagnostics for one processor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    /// Diagnostics in walk order
    pub messages: Vec<ValidationMessage>,
}

impl ValidationReport {
    /// Any error diagnostics?
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.messages.iter().any(|m| m.severity == Severity::Error)
    }

    /// Number of diagnostics of `severity`
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.messages.iter().filter(|m| m.severity == severity).count()
    }

    /// Diagnostics that are not errors
    pub fn notes(&self) -> impl Iterator<Item = &ValidationMessage> {
        self.messages.iter().filter(|m| m.severity != Severity::Error)
    }

    /// The first error, as the engine error it stands for
    #[must_use]
    pub fn into_first_error(self) -> Option<EngineError> {
        self.messages
            .into_iter()
            .find(|m| m.severity == Severity::Error)
            .and_then(|m| m.error)
    }
}

/// Registered components the validator may check references against
pub trait ComponentLookup {
    /// Is logic `name` registered?
    fn has_logic(&self, name: &str) -> bool;

    /// Is db logic `name` registered?
    fn has_db_logic(&self, name: &str) -> bool;

    /// Is processor `name` registered?
    fn has_processor(&self, name: &str) -> bool;

    /// Is message `id` in the catalog?
    fn has_message(&self, id: &str) -> bool;
}

/// Walks processor definitions
pub struct Validator<'a> {
    lookup: Option<&'a dyn ComponentLookup>,
    strict_messages: bool,
}

struct Walk<'s> {
    path: String,
    scope: Option<&'s BlockScope>,
    in_loop: bool,
    usage: DbUsage,
    delegated_schema_allowed: bool,
}

impl<'a> Validator<'a> {
    /// Structural checks only
    #[must_use]
    pub fn new() -> Self {
        Self {
            lookup: None,
            strict_messages: true,
        }
    }

    /// Also check references against registered components
    #[must_use]
    pub fn with_lookup(mut self, lookup: &'a dyn ComponentLookup) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Report unknown message ids as errors
    #[must_use]
    pub fn with_strict_messages(mut self, strict: bool) -> Self {
        self.strict_messages = strict;
        self
    }

    /// Validate a processor
    #[must_use]
    pub fn validate(&self, spec: &ProcessorSpec) -> ValidationReport {
        let mut report = ValidationReport::default();
        if spec.actions.is_empty() {
            report.messages.push(ValidationMessage::error(
                &spec.name,
                EngineError::InvalidDefinition {
                    component: spec.name.clone(),
                    reason: "a processor needs at least one action".to_string(),
                },
            ));
        }
        self.check_block(
            &spec.name,
            &spec.actions,
            false,
            spec.db_usage,
            spec.db_usage == DbUsage::Delegated,
            &mut report,
        );
        tracing::debug!(
            processor = %spec.name,
            errors = report.count(Severity::Error),
            notes = report.messages.len(),
            "definition validated"
        );
        report
    }

    fn check_block(
        &self,
        path: &str,
        actions: &[ActionSpec],
        in_loop: bool,
        usage: DbUsage,
        delegated_schema_allowed: bool,
        report: &mut ValidationReport,
    ) {
        let names = actions.iter().map(|a| a.header.name.as_deref());
        let scope = match BlockScope::build(path, names, in_loop) {
            Ok(scope) => Some(scope),
            Err(e) => {
                report.messages.push(ValidationMessage::error(path, e));
                None
            }
        };
        for (index, action) in actions.iter().enumerate() {
            let walk = Walk {
                path: format!("{}/{}", path, action.display_name(index)),
                scope: scope.as_ref(),
                in_loop,
                usage,
                delegated_schema_allowed,
            };
            self.check_action(action, &walk, report);
        }
    }

    fn check_action(&self, spec: &ActionSpec, walk: &Walk<'_>, report: &mut ValidationReport) {
        let path = walk.path.as_str();
        let header = &spec.header;
        let name = path.rsplit('/').next().unwrap_or(path);

        if let Some(source) = &header.execute_on_condition {
            if let Err(e) = Condition::compile(name, source) {
                report.messages.push(ValidationMessage::error(path, e));
            }
        }

        if let Some(scope) = walk.scope {
            for directive in [&header.on_success_jump_to, &header.on_failure_jump_to]
                .into_iter()
                .flatten()
            {
                if let Err(e) = scope.resolve(name, directive) {
                    report.messages.push(ValidationMessage::error(path, e));
                }
            }
        }

        for id in [&header.success_message, &header.failure_message].into_iter().flatten() {
            self.check_message(path, id, report);
        }

        match &spec.kind {
            ActionKind::SetValue {
                field_value,
                expression,
                ..
            } => {
                if field_value.is_some() && expression.is_some() {
                    report.messages.push(ValidationMessage::error(
                        path,
                        EngineError::InvalidDefinition {
                            component: name.to_string(),
                            reason: "only one of field_value and expression may be specified"
                                .to_string(),
                        },
                    ));
                }
                if let Some(source) = expression {
                    if let Err(e) = Condition::compile(name, source) {
                        report.messages.push(ValidationMessage::error(path, e));
                    }
                }
            }
            ActionKind::AddMessage { message_id, .. } => self.check_message(path, message_id, report),
            ActionKind::Logic { logic_name } => {
                if self.lookup.is_some_and(|l| !l.has_logic(logic_name)) {
                    report.messages.push(unknown(path, "logic", logic_name));
                }
            }
            ActionKind::DbLogic {
                logic_name,
                db_usage,
                schema_name,
            } => {
                if self.lookup.is_some_and(|l| !l.has_db_logic(logic_name)) {
                    report.messages.push(unknown(path, "db logic", logic_name));
                }
                self.check_db_usage(path, name, walk, *db_usage, schema_name.as_deref(), report);
            }
            ActionKind::ExecuteSql {
                db_usage,
                schema_name,
                ..
            } => self.check_db_usage(path, name, walk, *db_usage, schema_name.as_deref(), report),
            ActionKind::ExecuteService { service_name } => {
                if self.lookup.is_some_and(|l| !l.has_processor(service_name)) {
                    report.messages.push(unknown(path, "processor", service_name));
                }
            }
            ActionKind::Block { actions } => {
                self.check_children(path, actions, walk.in_loop, walk, report);
            }
            ActionKind::Loop {
                data_sheet_name,
                actions,
                ..
            } => {
                if header.execute_if_rows_in_sheet.is_some()
                    || header.execute_if_no_rows_in_sheet.is_some()
                {
                    report.messages.push(ValidationMessage::error(
                        path,
                        EngineError::InvalidDefinition {
                            component: name.to_string(),
                            reason: "sheet guards are not allowed on a loop".to_string(),
                        },
                    ));
                }
                match (data_sheet_name, &header.execute_on_condition) {
                    (None, None) => report.messages.push(ValidationMessage::warning(
                        path,
                        "loop has neither a data sheet nor a condition; it will only end through a break or stop",
                    )),
                    (Some(sheet), Some(_)) => report.messages.push(ValidationMessage::info(
                        path,
                        format!("loop iterates sheet {sheet}; its condition is checked only once, before the first row"),
                    )),
                    _ => {}
                }
                self.check_children(path, actions, true, walk, report);
            }
            ActionKind::Synchronize {
                initial_action,
                final_action,
                actions,
            } => {
                if actions.is_empty() {
                    report.messages.push(ValidationMessage::error(
                        path,
                        EngineError::InvalidDefinition {
                            component: name.to_string(),
                            reason: "a parallel block needs at least one action".to_string(),
                        },
                    ));
                }
                let detached = BlockScope::detached(path, false);
                if let Some(initial) = initial_action {
                    let child = Walk {
                        path: format!("{path}/initial"),
                        scope: Some(&detached),
                        in_loop: false,
                        usage: walk.usage,
                        delegated_schema_allowed: walk.delegated_schema_allowed,
                    };
                    self.check_action(initial, &child, report);
                }
                for (index, action) in actions.iter().enumerate() {
                    let child = Walk {
                        path: format!("{}/{}", path, action.display_name(index)),
                        scope: Some(&detached),
                        in_loop: false,
                        usage: walk.usage,
                        delegated_schema_allowed: walk.delegated_schema_allowed,
                    };
                    self.check_action(action, &child, report);
                }
                if let Some(last) = final_action {
                    let child = Walk {
                        path: format!("{path}/final"),
                        scope: walk.scope,
                        in_loop: walk.in_loop,
                        usage: walk.usage,
                        delegated_schema_allowed: walk.delegated_schema_allowed,
                    };
                    self.check_action(last, &child, report);
                }
            }
            ActionKind::RemoveValue { .. } | ActionKind::RenameSheet { .. } | ActionKind::Publish { .. } => {}
        }
    }

    fn check_children(
        &self,
        path: &str,
        actions: &[ActionSpec],
        in_loop: bool,
        walk: &Walk<'_>,
        report: &mut ValidationReport,
    ) {
        if actions.is_empty() {
            report
                .messages
                .push(ValidationMessage::warning(path, "block has no actions"));
        }
        self.check_block(
            path,
            actions,
            in_loop,
            walk.usage,
            walk.delegated_schema_allowed,
            report,
        );
    }

    fn check_db_usage(
        &self,
        path: &str,
        name: &str,
        walk: &Walk<'_>,
        usage: DbUsage,
        schema: Option<&str>,
        report: &mut ValidationReport,
    ) {
        if usage == DbUsage::None || usage == DbUsage::Delegated {
            report.messages.push(ValidationMessage::error(
                path,
                EngineError::InvalidDefinition {
                    component: name.to_string(),
                    reason: format!("db usage {usage:?} is not valid for a db action"),
                },
            ));
        } else if !walk.usage.can_host(usage) {
            report.messages.push(ValidationMessage::error(
                path,
                EngineError::IncompatibleUsage {
                    action: name.to_string(),
                    parent: walk.usage,
                    child: usage,
                },
            ));
        }
        if schema.is_some() && !walk.delegated_schema_allowed {
            report.messages.push(ValidationMessage::error(
                path,
                EngineError::InvalidDefinition {
                    component: name.to_string(),
                    reason: "a schema may be specified only when the processor delegates transactions"
                        .to_string(),
                },
            ));
        }
    }

    fn check_message(&self, path: &str, id: &str, report: &mut ValidationReport) {
        let Some(lookup) = self.lookup else {
            return;
        };
        if lookup.has_message(id) {
            return;
        }
        if self.strict_messages {
            report.messages.push(unknown(path, "message", id));
        } else {
            report.messages.push(ValidationMessage::warning(
                path,
                format!("message {id} is not in the catalog"),
            ));
        }
    }
}

impl Default for Validator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn unknown(path: &str, kind: &str, name: &str) -> ValidationMessage {
    ValidationMessage::error(
        path,
        EngineError::UnknownComponent {
            kind: kind.to_string(),
            name: name.to_string(),
        },
    )
}
